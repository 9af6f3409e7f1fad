//! Cursor step, per-conversation ordering and dedup in front of the
//! [`InboundHandler`].

use std::sync::Arc;

use tracing::debug;

use crate::{
    cursor_store::CursorPersister,
    inbound::InboundHandler,
    queue::KeyedQueue,
    registry::{ConversationRegistry, DeliveryOutcome},
    types::{ConversationKind, MochatEvent, WatchResponse},
};

#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<ConversationRegistry>,
    persister: CursorPersister,
    inbound: Arc<InboundHandler>,
    mailboxes: KeyedQueue,
}

impl Pipeline {
    pub fn new(
        registry: Arc<ConversationRegistry>,
        persister: CursorPersister,
        inbound: Arc<InboundHandler>,
    ) -> Self {
        Self {
            registry,
            persister,
            inbound,
            mailboxes: KeyedQueue::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ConversationRegistry> {
        &self.registry
    }

    /// Advance the cursor for one delivery, schedule a persist, and queue
    /// the surviving events on the conversation's mailbox.
    pub fn apply_delivery(
        &self,
        kind: ConversationKind,
        delivery: &WatchResponse,
    ) -> Option<DeliveryOutcome> {
        let Some(outcome) = self.registry.apply_delivery(kind, delivery) else {
            debug!(kind = %kind, "ignoring delivery without a conversation id");
            return None;
        };
        self.persister.schedule();
        for event in &outcome.accepted {
            self.enqueue_event(kind, &outcome.conversation_id, event.clone());
        }
        Some(outcome)
    }

    /// Queue one event behind everything already queued for its
    /// conversation. Bypasses the cursor step.
    pub fn enqueue_event(&self, kind: ConversationKind, conversation_id: &str, event: MochatEvent) {
        let registry = Arc::clone(&self.registry);
        let inbound = Arc::clone(&self.inbound);
        let conversation_id = conversation_id.to_string();
        let key = format!("{kind}:{conversation_id}");
        self.mailboxes.push(&key, async move {
            if !event.is_message_add() {
                debug!(
                    kind = %kind,
                    conversation_id = %conversation_id,
                    event_type = %event.event_type,
                    "skipping non-message event"
                );
                return;
            }
            if let Some(message_id) = event.message_id()
                && registry.remember(&conversation_id, message_id)
            {
                debug!(
                    kind = %kind,
                    conversation_id = %conversation_id,
                    message_id,
                    "dropping duplicate message"
                );
                return;
            }
            inbound.handle(kind, &conversation_id, &event).await;
        });
    }

    /// Wait until every queued event has been handled.
    pub async fn idle(&self) {
        self.mailboxes.idle().await;
    }

    /// Drain mailboxes, flush delayed batches, and write cursors one last
    /// time.
    pub async fn shutdown(&self) {
        self.mailboxes.idle().await;
        self.inbound.shutdown().await;
        self.persister.shutdown().await;
    }
}
