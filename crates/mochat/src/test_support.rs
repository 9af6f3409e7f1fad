//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};

use {
    async_trait::async_trait,
    clawlink_channels::{ChannelEvent, ChannelEventSink, ChannelMessageMeta, ChannelReplyTarget},
    clawlink_common::types::ReplyPayload,
    secrecy::Secret,
    serde_json::{Value, json},
};

use crate::{
    api::MochatApi,
    config::MochatAccount,
    inbound::{Dispatcher, InboundHandler},
    outbound::ReplySender,
    routing::PendingRoutes,
    status::StatusTracker,
};

#[derive(Debug, Clone)]
pub struct Dispatched {
    pub text: String,
    pub target: ChannelReplyTarget,
    pub meta: ChannelMessageMeta,
}

/// Sink that records everything and answers with a fixed reply.
#[derive(Default)]
pub struct RecordingSink {
    pub dispatched: Mutex<Vec<Dispatched>>,
    pub events: Mutex<Vec<ChannelEvent>>,
    pub disabled: Mutex<Vec<(String, String)>>,
    pub reply: Option<ReplyPayload>,
}

impl RecordingSink {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Some(ReplyPayload::text(text)),
            ..Default::default()
        }
    }

    pub fn bodies(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.text.clone())
            .collect()
    }

    pub fn dispatches(&self) -> Vec<Dispatched> {
        self.dispatched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelEventSink for RecordingSink {
    async fn emit(&self, event: ChannelEvent) {
        self.events.lock().unwrap().push(event);
    }

    async fn dispatch_to_chat(
        &self,
        text: &str,
        reply_to: ChannelReplyTarget,
        meta: ChannelMessageMeta,
    ) -> anyhow::Result<Option<ReplyPayload>> {
        self.dispatched.lock().unwrap().push(Dispatched {
            text: text.to_string(),
            target: reply_to,
            meta,
        });
        Ok(self.reply.clone())
    }

    async fn request_disable_account(&self, channel_type: &str, account_id: &str, _reason: &str) {
        self.disabled
            .lock()
            .unwrap()
            .push((channel_type.to_string(), account_id.to_string()));
    }
}

/// Configured account pointing at `base_url`, with `overrides` merged in.
pub fn account(base_url: &str, overrides: Value) -> MochatAccount {
    let mut config = json!({
        "baseUrl": base_url,
        "clawToken": "tok",
        "agentUserId": "bot",
        "sessions": ["s1"],
    });
    if let (Some(base), Some(extra)) = (config.as_object_mut(), overrides.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    MochatAccount::from_value("default", config).unwrap()
}

pub struct Harness {
    pub sink: Arc<RecordingSink>,
    pub routes: PendingRoutes,
    pub status: StatusTracker,
    pub inbound: Arc<InboundHandler>,
}

pub fn harness(account: &MochatAccount, sink: RecordingSink) -> Harness {
    let sink = Arc::new(sink);
    let routes = PendingRoutes::new();
    let status = StatusTracker::new();
    let api = MochatApi::new(&account.base_url, Secret::new("tok".into())).unwrap();
    let dispatcher = Dispatcher::new(
        &account.account_id,
        sink.clone(),
        routes.clone(),
        ReplySender::new(api, status.clone()),
        status.clone(),
    );
    let inbound = Arc::new(InboundHandler::new(account, dispatcher));
    Harness {
        sink,
        routes,
        status,
        inbound,
    }
}
