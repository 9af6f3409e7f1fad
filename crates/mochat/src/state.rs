use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use {tokio::task::JoinHandle, tokio_util::sync::CancellationToken};

use crate::{
    config::MochatAccount, outbound::ReplySender, pipeline::Pipeline, routing::PendingRoutes,
    status::StatusTracker,
};

/// Shared account state map.
pub type AccountStateMap = Arc<RwLock<HashMap<String, AccountState>>>;

/// Per-account runtime state.
pub struct AccountState {
    pub account: MochatAccount,
    pub replies: ReplySender,
    pub routes: PendingRoutes,
    pub status: StatusTracker,
    pub pipeline: Pipeline,
    pub cancel: CancellationToken,
    pub tasks: Vec<JoinHandle<()>>,
}
