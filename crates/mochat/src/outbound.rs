use {
    async_trait::async_trait,
    clawlink_channels::{ChannelOutbound, ChannelReplyTarget, Error as ChannelError},
    clawlink_common::types::ReplyPayload,
    tracing::{debug, info},
};

use crate::{
    api::MochatApi,
    error::Result,
    routing::{PendingRoute, PendingRoutes},
    state::AccountStateMap,
    status::StatusTracker,
    types::ConversationKind,
};

/// Prefixes accepted on ad hoc send targets. All but `mochat:` force a panel.
const TARGET_PREFIXES: [&str; 4] = ["mochat:", "group:", "channel:", "panel:"];

/// Session ids carry this prefix; bare ids without it are panels.
const SESSION_ID_PREFIX: &str = "session_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub kind: ConversationKind,
    pub id: String,
}

/// Resolve a user-supplied target string. Returns `None` for blank targets.
pub fn resolve_target(raw: &str, configured_panels: &[String]) -> Option<ResolvedTarget> {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    let (id, force_panel) = TARGET_PREFIXES
        .iter()
        .find(|prefix| lower.starts_with(*prefix))
        .map_or((trimmed, false), |prefix| {
            (trimmed[prefix.len()..].trim(), *prefix != "mochat:")
        });
    if id.is_empty() {
        return None;
    }
    let is_panel = force_panel
        || !id.starts_with(SESSION_ID_PREFIX)
        || configured_panels.iter().any(|p| p == id);
    Some(ResolvedTarget {
        kind: if is_panel {
            ConversationKind::Panel
        } else {
            ConversationKind::Session
        },
        id: id.to_string(),
    })
}

/// Sends content back through the REST API and records outbound activity.
#[derive(Debug, Clone)]
pub struct ReplySender {
    api: MochatApi,
    status: StatusTracker,
}

impl ReplySender {
    pub fn new(api: MochatApi, status: StatusTracker) -> Self {
        Self { api, status }
    }

    /// Send `content` to a session or panel. Blank content sends nothing and
    /// returns `false`.
    pub async fn send(
        &self,
        kind: ConversationKind,
        target_id: &str,
        content: &str,
        reply_to: Option<&str>,
        group_id: Option<&str>,
    ) -> Result<bool> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(false);
        }
        match kind {
            ConversationKind::Panel => {
                self.api
                    .send_panel(target_id, content, reply_to, group_id)
                    .await?;
            },
            ConversationKind::Session => {
                self.api.send_session(target_id, content, reply_to).await?;
            },
        }
        self.status.mark_outbound();
        info!(kind = %kind, target_id, chars = content.len(), "mochat message sent");
        Ok(true)
    }

    /// Deliver a responder reply to the conversation a batch came from.
    pub async fn deliver(&self, route: &PendingRoute, reply: &ReplyPayload) -> Result<bool> {
        if reply.silent {
            debug!(target_id = %route.target_id, "responder chose not to reply");
            return Ok(false);
        }
        self.send(
            route.kind,
            &route.target_id,
            &reply.flattened_content(),
            reply.reply_to_id.as_deref(),
            route.group_id.as_deref(),
        )
        .await
    }
}

/// [`ChannelOutbound`] over every running account.
pub struct MochatOutbound {
    pub(crate) accounts: AccountStateMap,
}

impl MochatOutbound {
    fn snapshot(
        &self,
        account_id: &str,
    ) -> std::result::Result<(ReplySender, Vec<String>, PendingRoutes), ChannelError> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        let state = accounts
            .get(account_id)
            .ok_or_else(|| ChannelError::unknown_account(account_id))?;
        Ok((
            state.replies.clone(),
            state.account.panels.clone(),
            state.routes.clone(),
        ))
    }

    async fn send_content(
        &self,
        account_id: &str,
        to: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> clawlink_channels::Result<()> {
        let (replies, panels, _) = self.snapshot(account_id)?;
        let target = resolve_target(to, &panels)
            .ok_or_else(|| ChannelError::invalid_input(format!("empty mochat target: {to:?}")))?;
        replies
            .send(target.kind, &target.id, content, reply_to, None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelOutbound for MochatOutbound {
    async fn send_text(
        &self,
        account_id: &str,
        to: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> clawlink_channels::Result<()> {
        self.send_content(account_id, to, text, reply_to).await
    }

    async fn send_media(
        &self,
        account_id: &str,
        to: &str,
        payload: &ReplyPayload,
    ) -> clawlink_channels::Result<()> {
        self.send_content(
            account_id,
            to,
            &payload.flattened_content(),
            payload.reply_to_id.as_deref(),
        )
        .await
    }

    async fn send_reply(
        &self,
        target: &ChannelReplyTarget,
        payload: &ReplyPayload,
    ) -> clawlink_channels::Result<()> {
        let (replies, _, routes) = self.snapshot(&target.account_id)?;
        let route = routes
            .take(&target.correlation_id)
            .ok_or_else(|| ChannelError::route_not_found(&target.correlation_id))?;
        replies.deliver(&route, payload).await?;
        Ok(())
    }
}
