//! Per-key message batching with a re-armable timer.
//!
//! All state changes for one key run on that key's [`KeyedQueue`] worker, so
//! an enqueue, a mention flush and a timer flush can never interleave.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    futures::future::BoxFuture,
    tokio::{task::JoinHandle, time::Instant},
    tracing::debug,
};

use crate::queue::KeyedQueue;

/// One message waiting in the buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferedEntry {
    pub raw_body: String,
    pub author: String,
    pub sender_name: Option<String>,
    pub sender_username: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    pub group_id: Option<String>,
}

impl BufferedEntry {
    /// Display label in merged group bodies.
    pub fn sender_label(&self) -> &str {
        [self.sender_name.as_deref(), self.sender_username.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or(&self.author)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Timer,
    Mention,
    Shutdown,
}

pub type FlushHandler =
    Arc<dyn Fn(Vec<BufferedEntry>, FlushReason) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct Slot {
    entries: Vec<BufferedEntry>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
    on_flush: Option<FlushHandler>,
}

impl Slot {
    fn disarm(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct Inner {
    queue: KeyedQueue,
    slots: Mutex<HashMap<String, Slot>>,
}

/// Keyed delay buffer. Cheap to clone.
#[derive(Clone, Default)]
pub struct DelayBuffer {
    inner: Arc<Inner>,
}

impl DelayBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` and (re)arm the key's timer for `delay`.
    pub async fn enqueue(
        &self,
        key: &str,
        entry: BufferedEntry,
        delay: Duration,
        on_flush: FlushHandler,
    ) {
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        self.inner
            .queue
            .run(key, async move {
                let mut slots = inner.slots.lock().unwrap_or_else(|e| e.into_inner());
                let slot = slots.entry(owned_key.clone()).or_default();
                slot.on_flush = Some(on_flush);
                slot.entries.push(entry);
                slot.disarm();
                let generation = slot.generation;
                let deadline = Instant::now() + delay;
                let timer_inner = Arc::clone(&inner);
                slot.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep_until(deadline).await;
                    let flush_inner = Arc::clone(&timer_inner);
                    let flush_key = owned_key.clone();
                    timer_inner.queue.push(&owned_key, async move {
                        flush_inner
                            .flush(&flush_key, FlushReason::Timer, Some(generation))
                            .await;
                    });
                }));
            })
            .await;
    }

    /// Cancel the key's timer, append `entry` if given, and flush now.
    pub async fn flush_now(
        &self,
        key: &str,
        entry: Option<BufferedEntry>,
        reason: FlushReason,
        on_flush: FlushHandler,
    ) {
        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        self.inner
            .queue
            .run(key, async move {
                {
                    let mut slots = inner.slots.lock().unwrap_or_else(|e| e.into_inner());
                    let slot = slots.entry(owned_key.clone()).or_default();
                    slot.on_flush = Some(on_flush);
                    slot.entries.extend(entry);
                }
                inner.flush(&owned_key, reason, None).await;
            })
            .await;
    }

    /// Drop buffered entries for `key` and disarm its timer.
    pub fn clear(&self, key: &str) {
        let mut slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get_mut(key) {
            slot.disarm();
            slot.entries.clear();
        }
    }

    /// Flush every key that still holds entries.
    pub async fn shutdown(&self) {
        let keys: Vec<String> = {
            let slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots
                .iter()
                .filter(|(_, slot)| !slot.entries.is_empty())
                .map(|(key, _)| key.clone())
                .collect()
        };
        for key in keys {
            let inner = Arc::clone(&self.inner);
            let owned_key = key.clone();
            self.inner
                .queue
                .run(&key, async move {
                    inner.flush(&owned_key, FlushReason::Shutdown, None).await;
                })
                .await;
        }
    }

    /// Number of entries waiting under `key`.
    pub fn pending(&self, key: &str) -> usize {
        let slots = self.inner.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(key).map_or(0, |slot| slot.entries.len())
    }
}

impl Inner {
    /// Take the key's entries and hand them to its handler. A timer flush
    /// carries the generation it was armed with and is ignored if the slot
    /// has been re-armed or flushed since.
    async fn flush(&self, key: &str, reason: FlushReason, armed_generation: Option<u64>) {
        let (entries, handler) = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let Some(slot) = slots.get_mut(key) else {
                return;
            };
            if armed_generation.is_some_and(|g| g != slot.generation) {
                return;
            }
            if armed_generation.is_some() {
                slot.timer = None;
                slot.generation += 1;
            } else {
                slot.disarm();
            }
            (std::mem::take(&mut slot.entries), slot.on_flush.clone())
        };
        if entries.is_empty() {
            return;
        }
        let Some(handler) = handler else {
            return;
        };
        debug!(key, count = entries.len(), ?reason, "flushing delayed entries");
        handler(entries, reason).await;
    }
}

/// Merge a batch into one message body.
///
/// A single entry keeps its body verbatim. Several entries are joined with
/// newlines, skipping empty bodies, and in groups each line is prefixed with
/// its sender label.
pub fn build_buffered_body(entries: &[BufferedEntry], is_group: bool) -> String {
    if let [single] = entries {
        return single.raw_body.clone();
    }
    entries
        .iter()
        .filter(|entry| !entry.raw_body.is_empty())
        .map(|entry| {
            let label = entry.sender_label();
            if is_group && !label.is_empty() {
                format!("{label}: {}", entry.raw_body)
            } else {
                entry.raw_body.clone()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
