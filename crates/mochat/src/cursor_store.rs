//! Per-account cursor persistence with debounced writes.

use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tokio::{fs, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
};

use crate::{error::Result, types::floor_i64};

/// Version written into every cursor file.
pub const CURSOR_SCHEMA_VERSION: u32 = 1;

/// Cursor value written by older builds to mean "bootstrap"; never a real
/// position.
pub const LEGACY_BOOTSTRAP_CURSOR: i64 = 2_147_483_647;

/// Delay between a cursor change and the write that persists it.
pub const PERSIST_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorFile {
    schema_version: u32,
    updated_at: String,
    cursors: BTreeMap<String, i64>,
}

/// JSON file holding one account's conversation cursors.
#[derive(Debug, Clone)]
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<state_dir>/mochat/cursors/<account_id>.json`
    pub fn for_account(state_dir: &Path, account_id: &str) -> Self {
        Self::new(
            state_dir
                .join("mochat")
                .join("cursors")
                .join(format!("{account_id}.json")),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted cursors. Never fails: a missing file is an empty map,
    /// an unreadable or corrupt one is logged and treated as empty.
    pub async fn load(&self) -> BTreeMap<String, i64> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read cursor store");
                return BTreeMap::new();
            },
        };

        let parsed: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to parse cursor store");
                return BTreeMap::new();
            },
        };

        let Some(cursors) = parsed.get("cursors").and_then(Value::as_object) else {
            return BTreeMap::new();
        };
        cursors
            .iter()
            .filter_map(|(id, raw)| {
                let value = raw.as_f64()?;
                let cursor = floor_i64(value)?;
                is_storable(cursor).then(|| (id.clone(), cursor))
            })
            .collect()
    }

    /// Atomically replace the file with `cursors`.
    pub async fn save(&self, cursors: &BTreeMap<String, i64>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = CursorFile {
            schema_version: CURSOR_SCHEMA_VERSION,
            updated_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            cursors: cursors
                .iter()
                .filter(|(_, cursor)| is_storable(**cursor))
                .map(|(id, cursor)| (id.clone(), *cursor))
                .collect(),
        };
        let mut json = serde_json::to_string_pretty(&file)?;
        json.push('\n');

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn is_storable(cursor: i64) -> bool {
    (0..LEGACY_BOOTSTRAP_CURSOR).contains(&cursor)
}

// ── Debounced persister ─────────────────────────────────────────────────────

/// Produces the cursor map to persist at write time.
pub type CursorSnapshot = Arc<dyn Fn() -> BTreeMap<String, i64> + Send + Sync>;

/// Scheduled-flush wrapper around a [`CursorStore`].
///
/// `schedule()` arms at most one pending write; `flush_now()` cancels it and
/// writes immediately. Writes are serialized and always persist the snapshot
/// taken when the write starts.
#[derive(Clone)]
pub struct CursorPersister {
    inner: Arc<PersisterInner>,
}

struct PersisterInner {
    store: CursorStore,
    snapshot: CursorSnapshot,
    debounce: Duration,
    armed: Mutex<Armed>,
    write_lock: tokio::sync::Mutex<()>,
    closed: CancellationToken,
}

#[derive(Default)]
struct Armed {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl CursorPersister {
    pub fn new(store: CursorStore, snapshot: CursorSnapshot) -> Self {
        Self::with_debounce(store, snapshot, PERSIST_DEBOUNCE)
    }

    pub fn with_debounce(store: CursorStore, snapshot: CursorSnapshot, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(PersisterInner {
                store,
                snapshot,
                debounce,
                armed: Mutex::new(Armed::default()),
                write_lock: tokio::sync::Mutex::new(()),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Arm a debounced write unless one is already pending.
    pub fn schedule(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        let mut armed = self.inner.armed.lock().unwrap_or_else(|e| e.into_inner());
        if armed.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        armed.generation += 1;
        let generation = armed.generation;
        let inner = Arc::clone(&self.inner);
        armed.task = Some(tokio::spawn(async move {
            tokio::select! {
                _ = inner.closed.cancelled() => return,
                _ = tokio::time::sleep(inner.debounce) => {},
            }
            {
                let mut armed = inner.armed.lock().unwrap_or_else(|e| e.into_inner());
                if armed.generation != generation {
                    return;
                }
                armed.task = None;
            }
            inner.write().await;
        }));
    }

    /// Cancel any pending write and persist the current snapshot now.
    pub async fn flush_now(&self) {
        let pending = {
            let mut armed = self.inner.armed.lock().unwrap_or_else(|e| e.into_inner());
            armed.generation += 1;
            armed.task.take()
        };
        if let Some(task) = pending {
            task.abort();
        }
        self.inner.write().await;
    }

    /// Final flush; later `schedule()` calls are ignored.
    pub async fn shutdown(&self) {
        self.inner.closed.cancel();
        self.flush_now().await;
    }

    pub fn store(&self) -> &CursorStore {
        &self.inner.store
    }
}

impl PersisterInner {
    async fn write(&self) {
        let _guard = self.write_lock.lock().await;
        let cursors = (self.snapshot)();
        match self.store.save(&cursors).await {
            Ok(()) => debug!(
                path = %self.store.path().display(),
                count = cursors.len(),
                "persisted cursors"
            ),
            Err(e) => warn!(
                path = %self.store.path().display(),
                error = %e,
                "failed to write cursor store"
            ),
        }
    }
}
