//! Owner of per-conversation sync state for one account.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Mutex, MutexGuard},
};

use tracing::info;

use crate::{
    dedup::DedupWindow,
    types::{ConversationKind, MochatEvent, WatchResponse, floor_i64},
};

#[derive(Debug, Default)]
struct ConversationState {
    cursor: Option<i64>,
    cold: bool,
    seen: DedupWindow,
}

#[derive(Debug, Default)]
struct Inner {
    conversations: HashMap<String, ConversationState>,
    sessions: BTreeSet<String>,
    panels: BTreeSet<String>,
}

impl Inner {
    fn tracked_mut(&mut self, kind: ConversationKind) -> &mut BTreeSet<String> {
        match kind {
            ConversationKind::Session => &mut self.sessions,
            ConversationKind::Panel => &mut self.panels,
        }
    }
}

/// Result of applying the cursor step of one delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub conversation_id: String,
    pub last_cursor: i64,
    pub next_cursor: i64,
    /// Backend reported a cursor behind the known one.
    pub regressed: bool,
    /// First delivery of a cold session: cursor advanced, nothing dispatched.
    pub bootstrap: bool,
    /// Events that passed the seq filter, in arrival order.
    pub accepted: Vec<MochatEvent>,
}

/// Tracked conversations, cursors, cold flags and dedup windows.
///
/// Guarded by a plain mutex that is never held across an await.
#[derive(Debug, Default)]
pub struct ConversationRegistry {
    inner: Mutex<Inner>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed cursors loaded from the cursor store.
    pub fn restore_cursors(&self, cursors: &BTreeMap<String, i64>) {
        let mut inner = self.lock();
        for (id, cursor) in cursors {
            inner.conversations.entry(id.clone()).or_default().cursor = Some(*cursor);
        }
    }

    /// Start tracking `id`. Returns `true` if it was not tracked before.
    pub fn track(&self, kind: ConversationKind, id: &str) -> bool {
        let id = id.trim();
        if id.is_empty() {
            return false;
        }
        let mut inner = self.lock();
        inner.conversations.entry(id.to_string()).or_default();
        inner.tracked_mut(kind).insert(id.to_string())
    }

    /// Track several ids, returning the ones that are new.
    pub fn track_many<I, S>(&self, kind: ConversationKind, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ids.into_iter()
            .filter(|id| self.track(kind, id.as_ref()))
            .map(|id| id.as_ref().trim().to_string())
            .collect()
    }

    pub fn is_tracked(&self, kind: ConversationKind, id: &str) -> bool {
        let mut inner = self.lock();
        inner.tracked_mut(kind).contains(id)
    }

    pub fn tracked(&self, kind: ConversationKind) -> Vec<String> {
        let mut inner = self.lock();
        inner.tracked_mut(kind).iter().cloned().collect()
    }

    /// Snapshot of all known cursors.
    pub fn cursor_map(&self) -> BTreeMap<String, i64> {
        self.lock()
            .conversations
            .iter()
            .filter_map(|(id, state)| state.cursor.map(|c| (id.clone(), c)))
            .collect()
    }

    /// Mark every listed session without a cursor as cold. Returns how many
    /// were marked.
    pub fn mark_cold_missing(&self, session_ids: &[String]) -> usize {
        let mut inner = self.lock();
        let mut marked = 0;
        for id in session_ids {
            let state = inner.conversations.entry(id.clone()).or_default();
            if state.cursor.is_none() {
                state.cold = true;
                marked += 1;
            }
        }
        marked
    }

    pub fn is_cold(&self, id: &str) -> bool {
        self.lock().conversations.get(id).is_some_and(|s| s.cold)
    }

    pub fn cursor(&self, id: &str) -> Option<i64> {
        self.lock().conversations.get(id).and_then(|s| s.cursor)
    }

    pub fn set_cursor(&self, id: &str, cursor: i64) {
        self.lock().conversations.entry(id.to_string()).or_default().cursor = Some(cursor);
    }

    /// Record `message_id` in the conversation's dedup window. Returns `true`
    /// if it was already seen.
    pub fn remember(&self, conversation_id: &str, message_id: &str) -> bool {
        self.lock()
            .conversations
            .entry(conversation_id.to_string())
            .or_default()
            .seen
            .remember(message_id)
    }

    /// Cursor step of a delivery.
    ///
    /// Advances (or, on regression, resets) the stored cursor, consumes the
    /// cold flag of a session's first delivery, and returns the events that
    /// survive the seq filter. Returns `None` for deliveries without a
    /// conversation id.
    pub fn apply_delivery(
        &self,
        kind: ConversationKind,
        delivery: &WatchResponse,
    ) -> Option<DeliveryOutcome> {
        let conversation_id = delivery.session_id.trim();
        if conversation_id.is_empty() {
            return None;
        }
        let payload_cursor = delivery.cursor.and_then(floor_i64);

        let mut inner = self.lock();
        let state = inner
            .conversations
            .entry(conversation_id.to_string())
            .or_default();
        let last_cursor = state.cursor.unwrap_or(0);
        let regressed = delivery
            .cursor
            .is_some_and(|c| c.is_finite() && c < last_cursor as f64);

        let next_cursor = if regressed {
            payload_cursor.unwrap_or(0).max(0)
        } else {
            delivery
                .events
                .iter()
                .filter_map(|e| e.seq)
                .chain(payload_cursor)
                .fold(last_cursor, i64::max)
        };
        state.cursor = Some(next_cursor);

        let bootstrap = kind == ConversationKind::Session && state.cold;
        if bootstrap {
            state.cold = false;
        }
        drop(inner);

        if regressed {
            info!(
                conversation_id,
                last_cursor, next_cursor, "cursor regressed, relying on message id dedup"
            );
        }

        let accepted = if bootstrap {
            if !delivery.events.is_empty() {
                info!(
                    conversation_id,
                    count = delivery.events.len(),
                    "skipped bootstrap history"
                );
            }
            Vec::new()
        } else {
            delivery
                .events
                .iter()
                .filter(|e| regressed || e.seq.is_none_or(|seq| seq > last_cursor))
                .cloned()
                .collect()
        };

        Some(DeliveryOutcome {
            conversation_id: conversation_id.to_string(),
            last_cursor,
            next_cursor,
            regressed,
            bootstrap,
            accepted,
        })
    }
}
