//! JSONL log of `notify:*` socket events the pipeline does not act on.

use std::path::{Path, PathBuf};

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    serde_json::Value,
    tokio::{fs, io::AsyncWriteExt, sync::Mutex},
};

use crate::error::Result;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventRecord<'a> {
    ts: String,
    account_id: &'a str,
    event_name: &'a str,
    payload: &'a Value,
}

/// Appends one record per line to `<state_dir>/mochat/events/YYYY-MM-DD.jsonl`.
#[derive(Debug)]
pub struct NotifyEventLog {
    dir: PathBuf,
    account_id: String,
    write_lock: Mutex<()>,
}

impl NotifyEventLog {
    pub fn new(state_dir: &Path, account_id: impl Into<String>) -> Self {
        Self {
            dir: state_dir.join("mochat").join("events"),
            account_id: account_id.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// File holding records written at `at` (UTC day).
    pub fn path_for(&self, at: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{}.jsonl", at.format("%Y-%m-%d")))
    }

    pub async fn record(&self, event_name: &str, payload: &Value) -> Result<()> {
        self.record_at(Utc::now(), event_name, payload).await
    }

    async fn record_at(&self, at: DateTime<Utc>, event_name: &str, payload: &Value) -> Result<()> {
        let record = EventRecord {
            ts: at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            account_id: &self.account_id,
            event_name,
            payload,
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(at))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
