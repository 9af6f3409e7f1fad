use std::sync::{Arc, RwLock};

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
};

/// Point-in-time health of one account.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    pub running: bool,
    pub connected: bool,
    pub last_start_at: Option<DateTime<Utc>>,
    pub last_stop_at: Option<DateTime<Utc>>,
    pub last_inbound_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Shared, cheaply cloned status cell.
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    inner: Arc<RwLock<AccountStatus>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> AccountStatus {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update(&self, f: impl FnOnce(&mut AccountStatus)) {
        let mut status = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut status);
    }

    pub fn mark_started(&self) {
        self.update(|s| {
            s.running = true;
            s.last_start_at = Some(Utc::now());
            s.last_error = None;
        });
    }

    pub fn mark_stopped(&self) {
        self.update(|s| {
            s.running = false;
            s.connected = false;
            s.last_stop_at = Some(Utc::now());
        });
    }

    pub fn set_connected(&self, connected: bool) {
        self.update(|s| {
            s.connected = connected;
            if connected {
                s.last_error = None;
            }
        });
    }

    pub fn mark_inbound(&self) {
        self.update(|s| {
            s.last_inbound_at = Some(Utc::now());
            s.last_error = None;
        });
    }

    pub fn mark_outbound(&self) {
        self.update(|s| {
            s.last_outbound_at = Some(Utc::now());
            s.last_error = None;
        });
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| s.last_error = Some(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_clears_last_error() {
        let status = StatusTracker::new();
        status.mark_started();
        status.set_error("subscribe failed");
        assert_eq!(
            status.snapshot().last_error.as_deref(),
            Some("subscribe failed")
        );

        status.mark_inbound();
        let snap = status.snapshot();
        assert!(snap.last_error.is_none());
        assert!(snap.last_inbound_at.is_some());
        assert!(snap.running);
    }

    #[test]
    fn stop_clears_connected() {
        let status = StatusTracker::new();
        status.set_connected(true);
        status.mark_stopped();
        let snap = status.snapshot();
        assert!(!snap.connected);
        assert!(!snap.running);
        assert!(snap.last_stop_at.is_some());
    }
}
