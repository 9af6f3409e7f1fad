//! Host side of the channel: turns dispatched batches into replies.
//!
//! With a configured command, each inbound context is written as JSON to the
//! command's stdin (`sh -c`):
//!
//! - stdout that parses as a reply object (`{"text", "media", "silent", ...}`)
//!   is delivered as-is
//! - any other non-empty stdout is delivered as reply text
//! - empty stdout sends nothing
//!
//! Without a command, inbound contexts are only logged.

use std::time::Duration;

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    clawlink_channels::{ChannelEvent, ChannelEventSink, ChannelMessageMeta, ChannelReplyTarget},
    clawlink_common::types::{ChatType, ReplyPayload},
    clawlink_config::ResponderConfig,
    serde::Serialize,
    tokio::{io::AsyncWriteExt, process::Command},
    tracing::{debug, info, warn},
};

/// What the responder command receives on stdin.
#[derive(Debug, Serialize)]
pub struct InboundContext<'a> {
    pub account_id: &'a str,
    pub correlation_id: &'a str,
    pub conversation_id: &'a str,
    pub kind: &'a str,
    pub chat_type: ChatType,
    pub sender_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<&'a str>,
    pub body: &'a str,
    pub was_mentioned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<&'a str>,
    pub message_count: usize,
}

impl<'a> InboundContext<'a> {
    pub fn new(body: &'a str, target: &'a ChannelReplyTarget, meta: &'a ChannelMessageMeta) -> Self {
        Self {
            account_id: &target.account_id,
            correlation_id: &target.correlation_id,
            conversation_id: &target.chat_id,
            kind: &meta.conversation_kind,
            chat_type: meta.chat_type,
            sender_id: &meta.sender_id,
            sender_name: meta.sender_name.as_deref(),
            sender_username: meta.username.as_deref(),
            body,
            was_mentioned: meta.was_mentioned,
            group_id: meta.group_id.as_deref(),
            message_id: meta.message_id.as_deref(),
            timestamp: meta.timestamp.as_deref(),
            message_count: meta.message_count,
        }
    }
}

/// [`ChannelEventSink`] backed by an optional shell command.
pub struct CommandResponder {
    command: Option<String>,
    timeout: Duration,
}

impl CommandResponder {
    pub fn new(command: Option<String>, timeout: Duration) -> Self {
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
            timeout,
        }
    }

    pub fn from_config(config: &ResponderConfig) -> Self {
        Self::new(
            config.command.clone(),
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }

    async fn run_command(&self, command: &str, input: &str) -> Result<String> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn responder command: {command}"))?;

        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(input.as_bytes()).await
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("responder timed out after {:?}", self.timeout))?
            .context("responder failed to complete")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "responder exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Interpret responder stdout.
pub fn parse_reply(stdout: &str) -> Option<ReplyPayload> {
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return None;
    }
    if stdout.starts_with('{')
        && let Ok(reply) = serde_json::from_str::<ReplyPayload>(stdout)
    {
        return Some(reply);
    }
    Some(ReplyPayload::text(stdout))
}

#[async_trait]
impl ChannelEventSink for CommandResponder {
    async fn emit(&self, event: ChannelEvent) {
        match &event {
            ChannelEvent::AccountDisabled {
                account_id, reason, ..
            } => warn!(account_id = %account_id, reason = %reason, "channel account disabled"),
            ChannelEvent::ConnectionChanged {
                account_id,
                connected,
                reason,
                ..
            } => info!(account_id = %account_id, connected, reason = ?reason, "channel connection changed"),
            ChannelEvent::InboundMessage { .. } => {
                debug!(event = ?event, "channel inbound message");
            },
        }
    }

    async fn dispatch_to_chat(
        &self,
        text: &str,
        reply_to: ChannelReplyTarget,
        meta: ChannelMessageMeta,
    ) -> Result<Option<ReplyPayload>> {
        let context = InboundContext::new(text, &reply_to, &meta);
        let Some(command) = self.command.as_deref() else {
            info!(
                account_id = context.account_id,
                conversation_id = context.conversation_id,
                sender_id = context.sender_id,
                body = context.body,
                "inbound message (no responder configured)"
            );
            return Ok(None);
        };

        let input = serde_json::to_string(&context).context("failed to serialize inbound context")?;
        let stdout = self.run_command(command, &input).await?;
        Ok(parse_reply(&stdout))
    }

    async fn request_disable_account(&self, channel_type: &str, account_id: &str, reason: &str) {
        warn!(channel_type, account_id, reason, "account requested to be disabled");
    }
}
