use std::collections::{HashSet, VecDeque};

/// Number of message ids remembered per conversation.
pub const DEDUP_CAPACITY: usize = 2000;

/// Bounded FIFO set of recently seen message ids.
#[derive(Debug, Clone)]
pub struct DedupWindow {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self::with_capacity(DEDUP_CAPACITY)
    }
}

impl DedupWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(64)),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record `message_id`. Returns `true` if it was already present.
    ///
    /// Empty ids are never recorded and always return `false`.
    pub fn remember(&mut self, message_id: &str) -> bool {
        if message_id.is_empty() {
            return false;
        }
        if self.ids.contains(message_id) {
            return true;
        }
        self.ids.insert(message_id.to_string());
        self.order.push_back(message_id.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
