//! Wiring of one account: cursor restore, pipeline, transport tasks, and
//! orderly shutdown.

use std::{path::Path, sync::Arc};

use {
    clawlink_channels::ChannelEventSink,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{
    api::MochatApi,
    config::{MochatAccount, TransportMode},
    cursor_store::{CursorPersister, CursorStore},
    error::Result,
    event_log::NotifyEventLog,
    inbound::{Dispatcher, InboundHandler},
    outbound::ReplySender,
    pipeline::Pipeline,
    poller::SessionPoller,
    registry::ConversationRegistry,
    routing::PendingRoutes,
    socket::{SocketClient, SocketOptions},
    state::AccountState,
    status::StatusTracker,
    subscription::SubscriptionManager,
    types::ConversationKind,
};

/// Start every task of `account` and return its runtime state.
pub async fn start_account(
    account: MochatAccount,
    state_dir: &Path,
    sink: Arc<dyn ChannelEventSink>,
) -> Result<AccountState> {
    account.validate()?;
    let account_id = account.account_id.clone();
    let api = MochatApi::for_account(&account)?;
    let status = StatusTracker::new();
    status.mark_started();

    let store = CursorStore::for_account(state_dir, &account_id);
    let registry = Arc::new(ConversationRegistry::new());
    let restored = store.load().await;
    registry.restore_cursors(&restored);
    registry.track_many(ConversationKind::Session, &account.sessions);
    registry.track_many(ConversationKind::Panel, &account.panels);

    let snapshot_registry = Arc::clone(&registry);
    let persister = CursorPersister::new(store, Arc::new(move || snapshot_registry.cursor_map()));

    let routes = PendingRoutes::new();
    let replies = ReplySender::new(api.clone(), status.clone());
    let dispatcher = Dispatcher::new(
        &account_id,
        Arc::clone(&sink),
        routes.clone(),
        replies.clone(),
        status.clone(),
    );
    let inbound = Arc::new(InboundHandler::new(&account, dispatcher));
    let pipeline = Pipeline::new(registry, persister, inbound);

    let cancel = CancellationToken::new();
    let mut tasks = vec![routes.spawn_sweeper(cancel.child_token())];

    match account.transport {
        TransportMode::Socket => {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (client, handle) = SocketClient::spawn(
                SocketOptions::for_account(&account),
                events_tx,
                cancel.child_token(),
            );
            let manager = SubscriptionManager::new(
                account.clone(),
                Arc::new(client),
                pipeline.clone(),
                api.clone(),
                NotifyEventLog::new(state_dir, &account_id),
                status.clone(),
                Arc::clone(&sink),
            );
            tasks.push(handle);
            tasks.push(tokio::spawn(manager.run(events_rx, cancel.child_token())));
        },
        TransportMode::Poll => {
            if !account.panels.is_empty() || account.auto_discover_panels {
                warn!(account_id = %account_id, "panels are not watched in poll mode");
            }
            let registry = pipeline.registry();
            if account.auto_discover_sessions {
                match api.list_sessions(None, None).await {
                    Ok(listing) => {
                        registry.track_many(
                            ConversationKind::Session,
                            listing.sessions.iter().map(|s| s.session_id.as_str()),
                        );
                    },
                    Err(e) => {
                        warn!(account_id = %account_id, error = %e, "mochat session discovery failed");
                        status.set_error(e.to_string());
                    },
                }
            }
            let sessions = registry.tracked(ConversationKind::Session);
            registry.mark_cold_missing(&sessions);
            for session_id in sessions {
                let poller =
                    SessionPoller::new(&account, session_id, api.clone(), pipeline.clone(), status.clone());
                tasks.push(poller.spawn(cancel.child_token()));
            }
        },
    }

    info!(
        account_id = %account_id,
        transport = ?account.transport,
        sessions = account.sessions.len(),
        panels = account.panels.len(),
        auto_sessions = account.auto_discover_sessions,
        auto_panels = account.auto_discover_panels,
        restored_cursors = restored.len(),
        "mochat account started"
    );

    Ok(AccountState {
        account,
        replies,
        routes,
        status,
        pipeline,
        cancel,
        tasks,
    })
}

impl AccountState {
    /// Cancel every task, flush delayed batches, and write cursors one last
    /// time.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(account_id = %self.account.account_id, error = %e, "mochat task ended abnormally");
            }
        }
        self.pipeline.shutdown().await;
        self.status.mark_stopped();
        info!(account_id = %self.account.account_id, "mochat account stopped");
    }
}
