use {
    anyhow::Result,
    async_trait::async_trait,
    clawlink_common::types::{ChatType, ReplyPayload},
};

// ── Channel events (pub/sub) ────────────────────────────────────────────────

/// Events emitted by channel plugins for observers (status pages, audit logs).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelEvent {
    InboundMessage {
        channel_type: String,
        account_id: String,
        conversation_id: String,
        sender_id: String,
        sender_name: Option<String>,
        message_count: usize,
        was_mentioned: bool,
    },
    /// Transport connectivity changed for an account.
    ConnectionChanged {
        channel_type: String,
        account_id: String,
        connected: bool,
        reason: Option<String>,
    },
    /// A channel account stopped itself after an unrecoverable runtime error.
    AccountDisabled {
        channel_type: String,
        account_id: String,
        reason: String,
    },
}

/// Sink for channel events and inbound dispatch. The host provides the
/// concrete implementation (a responder process, an agent runtime, a test
/// recorder).
#[async_trait]
pub trait ChannelEventSink: Send + Sync {
    /// Broadcast a channel event.
    async fn emit(&self, event: ChannelEvent);

    /// Hand an inbound batch to the responder.
    ///
    /// Returning `Some` delivers the reply immediately through `reply_to`.
    /// Returning `None` means the responder will answer later (or not at all)
    /// via [`ChannelOutbound::send_reply`] with the same target.
    async fn dispatch_to_chat(
        &self,
        text: &str,
        reply_to: ChannelReplyTarget,
        meta: ChannelMessageMeta,
    ) -> Result<Option<ReplyPayload>>;

    /// Request disabling a channel account due to a runtime error.
    async fn request_disable_account(&self, channel_type: &str, account_id: &str, reason: &str);
}

/// Context describing an inbound batch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelMessageMeta {
    pub channel_type: String,
    /// Backend-specific conversation kind (mochat: `session` or `panel`).
    pub conversation_kind: String,
    pub chat_type: ChatType,
    /// Author id of the last message in the batch.
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub username: Option<String>,
    pub was_mentioned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Timestamp of the last message (RFC 3339), when the backend supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Number of backend messages merged into this batch.
    pub message_count: usize,
}

/// Where to send the response back.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChannelReplyTarget {
    pub channel_type: String,
    pub account_id: String,
    /// Conversation the batch came from.
    pub chat_id: String,
    /// Correlation id of the pending route registered for this batch.
    pub correlation_id: String,
}

/// Core channel plugin trait. Each messaging backend implements this.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    /// Channel identifier (e.g. "mochat").
    fn id(&self) -> &str;

    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Start an account connection.
    async fn start_account(&mut self, account_id: &str, config: serde_json::Value) -> Result<()>;

    /// Stop an account connection, flushing any state it owns.
    async fn stop_account(&mut self, account_id: &str) -> Result<()>;

    /// Get outbound adapter for sending messages.
    fn outbound(&self) -> Option<&dyn ChannelOutbound>;

    /// Get status adapter for health checks.
    fn status(&self) -> Option<&dyn ChannelStatus>;
}

/// Send messages to a channel.
#[async_trait]
pub trait ChannelOutbound: Send + Sync {
    async fn send_text(
        &self,
        account_id: &str,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> crate::Result<()>;

    async fn send_media(
        &self,
        account_id: &str,
        to: &str,
        payload: &ReplyPayload,
    ) -> crate::Result<()>;

    /// Deliver a reply for a previously dispatched inbound batch.
    async fn send_reply(
        &self,
        target: &ChannelReplyTarget,
        payload: &ReplyPayload,
    ) -> crate::Result<()>;
}

/// Probe channel account health.
#[async_trait]
pub trait ChannelStatus: Send + Sync {
    async fn probe(&self, account_id: &str) -> Result<ChannelHealthSnapshot>;
}

/// Channel health snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelHealthSnapshot {
    pub connected: bool,
    pub account_id: String,
    pub details: Option<String>,
}
