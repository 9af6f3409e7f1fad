use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::types::SessionInfo;

/// Minimum gap between two directory refreshes for the same converse id.
pub const CONVERSE_LOOKUP_RETRY: Duration = Duration::from_millis(15_000);

#[derive(Debug, Default)]
struct Inner {
    by_converse: HashMap<String, String>,
    retry_at: HashMap<String, Instant>,
}

/// Maps backend converse ids to session ids.
#[derive(Debug, Default)]
pub struct ConverseDirectory {
    inner: Mutex<Inner>,
}

impl ConverseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, converse_id: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.by_converse.get(converse_id).cloned()
    }

    /// Claim the right to refresh the directory for an unresolved converse
    /// id. Returns `false` while a previous attempt is within the retry
    /// window.
    pub fn begin_refresh(&self, converse_id: &str, now: Instant) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner
            .retry_at
            .get(converse_id)
            .is_some_and(|retry_at| *retry_at > now)
        {
            return false;
        }
        inner
            .retry_at
            .insert(converse_id.to_string(), now + CONVERSE_LOOKUP_RETRY);
        true
    }

    /// Record converse mappings from a session listing. Returns how many
    /// sessions carried a converse id.
    pub fn record(&self, sessions: &[SessionInfo]) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut mapped = 0;
        for session in sessions {
            let session_id = session.session_id.trim();
            let converse_id = session.converse_id.as_deref().map(str::trim).unwrap_or("");
            if session_id.is_empty() || converse_id.is_empty() {
                continue;
            }
            inner
                .by_converse
                .insert(converse_id.to_string(), session_id.to_string());
            mapped += 1;
        }
        mapped
    }
}
