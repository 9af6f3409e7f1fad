//! Gating, batching and dispatch of accepted inbound messages.

use std::{sync::Arc, time::Duration};

use {
    chrono::{DateTime, Utc},
    clawlink_channels::{
        ChannelEvent, ChannelEventSink, ChannelMessageMeta, ChannelReplyTarget,
        gating::{self, GateDecision, MentionPolicy, ReplyDelayMode},
    },
    clawlink_common::types::ChatType,
    futures::FutureExt,
    tokio::time::Instant,
    tracing::{info, warn},
};

use crate::{
    config::MochatAccount,
    delay_buffer::{BufferedEntry, DelayBuffer, FlushHandler, FlushReason, build_buffered_body},
    outbound::ReplySender,
    routing::{PendingRoute, PendingRoutes},
    status::StatusTracker,
    types::{ConversationKind, MochatEvent},
};

/// Channel type reported to the host.
pub const CHANNEL_TYPE: &str = "mochat";

/// One batch ready for the responder.
#[derive(Debug, Clone)]
pub struct Batch {
    pub kind: ConversationKind,
    pub conversation_id: String,
    pub entries: Vec<BufferedEntry>,
    pub is_group: bool,
    pub was_mentioned: bool,
    /// Record `last_inbound_at` now. Delayed batches recorded it at enqueue.
    pub mark_inbound: bool,
}

/// Hands batches to the [`ChannelEventSink`] and delivers immediate replies.
#[derive(Clone)]
pub struct Dispatcher {
    account_id: String,
    sink: Arc<dyn ChannelEventSink>,
    routes: PendingRoutes,
    replies: ReplySender,
    status: StatusTracker,
}

impl Dispatcher {
    pub fn new(
        account_id: &str,
        sink: Arc<dyn ChannelEventSink>,
        routes: PendingRoutes,
        replies: ReplySender,
        status: StatusTracker,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            sink,
            routes,
            replies,
            status,
        }
    }

    pub async fn dispatch(&self, batch: Batch) {
        let Some(last) = batch.entries.last() else {
            return;
        };
        let body = build_buffered_body(&batch.entries, batch.is_group);
        if batch.mark_inbound {
            self.status.mark_inbound();
        }

        let correlation_id = uuid::Uuid::new_v4().to_string();
        self.routes.insert(correlation_id.clone(), PendingRoute {
            kind: batch.kind,
            target_id: batch.conversation_id.clone(),
            group_id: last.group_id.clone(),
            reply_to: last.message_id.clone(),
            created_at: Instant::now(),
        });

        let target = ChannelReplyTarget {
            channel_type: CHANNEL_TYPE.into(),
            account_id: self.account_id.clone(),
            chat_id: batch.conversation_id.clone(),
            correlation_id: correlation_id.clone(),
        };
        let meta = ChannelMessageMeta {
            channel_type: CHANNEL_TYPE.into(),
            conversation_kind: batch.kind.as_str().into(),
            chat_type: if batch.is_group {
                ChatType::Group
            } else {
                ChatType::Direct
            },
            sender_id: last.author.clone(),
            sender_name: last.sender_name.clone(),
            username: last.sender_username.clone(),
            was_mentioned: batch.was_mentioned,
            group_id: last.group_id.clone(),
            message_id: last.message_id.clone(),
            timestamp: last.timestamp.map(|ts| ts.to_rfc3339()),
            message_count: batch.entries.len(),
        };

        info!(
            account_id = %self.account_id,
            kind = %batch.kind,
            conversation_id = %batch.conversation_id,
            messages = batch.entries.len(),
            was_mentioned = batch.was_mentioned,
            "dispatching inbound batch"
        );
        self.sink
            .emit(ChannelEvent::InboundMessage {
                channel_type: CHANNEL_TYPE.into(),
                account_id: self.account_id.clone(),
                conversation_id: batch.conversation_id.clone(),
                sender_id: last.author.clone(),
                sender_name: last.sender_name.clone(),
                message_count: batch.entries.len(),
                was_mentioned: batch.was_mentioned,
            })
            .await;

        match self.sink.dispatch_to_chat(&body, target, meta).await {
            Ok(Some(reply)) => {
                let Some(route) = self.routes.take(&correlation_id) else {
                    warn!(%correlation_id, "reply route expired before delivery");
                    return;
                };
                if let Err(e) = self.replies.deliver(&route, &reply).await {
                    warn!(
                        account_id = %self.account_id,
                        target_id = %route.target_id,
                        error = %e,
                        "mochat reply failed"
                    );
                    self.status.set_error(e.to_string());
                }
            },
            Ok(None) => {},
            Err(e) => {
                self.routes.take(&correlation_id);
                warn!(
                    account_id = %self.account_id,
                    conversation_id = %batch.conversation_id,
                    error = %e,
                    "responder failed"
                );
            },
        }
    }
}

/// Applies sender filters and mention policy, then dispatches directly or
/// through the delay buffer.
pub struct InboundHandler {
    account_id: String,
    agent_user_id: String,
    policy: MentionPolicy,
    reply_delay_mode: ReplyDelayMode,
    reply_delay: Duration,
    delay: DelayBuffer,
    dispatcher: Dispatcher,
}

impl InboundHandler {
    pub fn new(account: &MochatAccount, dispatcher: Dispatcher) -> Self {
        Self {
            account_id: account.account_id.clone(),
            agent_user_id: account.agent_user_id.clone(),
            policy: account.mention.clone(),
            reply_delay_mode: account.reply_delay_mode,
            reply_delay: account.reply_delay,
            delay: DelayBuffer::new(),
            dispatcher,
        }
    }

    pub async fn handle(&self, kind: ConversationKind, conversation_id: &str, event: &MochatEvent) {
        let message_id = event.message_id().unwrap_or_default();
        let Some(payload) = event.payload.as_ref() else {
            info!(kind = %kind, conversation_id, "inbound dropped: missing payload");
            return;
        };
        let author = payload.author.as_deref().map(str::trim).unwrap_or_default();
        if author.is_empty() {
            info!(kind = %kind, conversation_id, message_id, "inbound dropped: missing author");
            return;
        }
        if !self.agent_user_id.is_empty() && author == self.agent_user_id {
            info!(kind = %kind, conversation_id, message_id, "inbound dropped: self author");
            return;
        }

        let group_id = payload
            .group_id
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty());
        let is_group = group_id.is_some() || kind == ConversationKind::Panel;
        let was_mentioned =
            gating::was_mentioned(payload.meta.as_ref(), &payload.content, &self.agent_user_id);
        let require_mention = kind == ConversationKind::Panel
            && self.policy.require_mention(conversation_id, group_id);
        let use_delay = kind == ConversationKind::Panel
            && self.reply_delay_mode == ReplyDelayMode::NonMention;

        let decision = gating::gate(is_group, require_mention, was_mentioned, use_delay);
        if decision == GateDecision::Drop {
            info!(kind = %kind, conversation_id, message_id, "inbound dropped: mention required");
            return;
        }

        let author_info = payload.author_info.as_ref();
        let sender_name = author_info
            .and_then(|info| {
                [info.nickname.as_deref(), info.email.as_deref()]
                    .into_iter()
                    .flatten()
                    .map(str::trim)
                    .find(|s| !s.is_empty())
            })
            .map(str::to_string);
        let entry = BufferedEntry {
            raw_body: payload.content_text(),
            author: author.to_string(),
            sender_name,
            sender_username: author_info
                .and_then(|info| info.agent_id.clone())
                .filter(|s| !s.is_empty()),
            timestamp: event.timestamp.as_deref().and_then(parse_timestamp),
            message_id: event.message_id().map(str::to_string),
            group_id: is_group
                .then(|| group_id.unwrap_or(conversation_id).to_string()),
        };

        match decision {
            GateDecision::Buffer { flush_now } => {
                info!(
                    kind = %kind,
                    conversation_id,
                    message_id,
                    mentioned = was_mentioned,
                    "inbound queued for delayed reply"
                );
                self.dispatcher.status.mark_inbound();
                let key = format!("{}:{kind}:{conversation_id}", self.account_id);
                let on_flush = self.flush_handler(kind, conversation_id, is_group);
                if flush_now {
                    self.delay
                        .flush_now(&key, Some(entry), FlushReason::Mention, on_flush)
                        .await;
                } else {
                    self.delay
                        .enqueue(&key, entry, self.reply_delay, on_flush)
                        .await;
                }
            },
            GateDecision::Dispatch => {
                self.dispatcher
                    .dispatch(Batch {
                        kind,
                        conversation_id: conversation_id.to_string(),
                        entries: vec![entry],
                        is_group,
                        was_mentioned,
                        mark_inbound: true,
                    })
                    .await;
            },
            GateDecision::Drop => {},
        }
    }

    fn flush_handler(
        &self,
        kind: ConversationKind,
        conversation_id: &str,
        is_group: bool,
    ) -> FlushHandler {
        let dispatcher = self.dispatcher.clone();
        let conversation_id = conversation_id.to_string();
        Arc::new(move |entries: Vec<BufferedEntry>, reason: FlushReason| {
            let dispatcher = dispatcher.clone();
            let conversation_id = conversation_id.clone();
            async move {
                dispatcher
                    .dispatch(Batch {
                        kind,
                        conversation_id,
                        entries,
                        is_group,
                        was_mentioned: reason == FlushReason::Mention,
                        mark_inbound: false,
                    })
                    .await;
            }
            .boxed()
        })
    }

    /// Flush every delayed batch still waiting.
    pub async fn shutdown(&self) {
        self.delay.shutdown().await;
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
