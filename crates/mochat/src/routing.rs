//! Correlation id → reply target map for responses that arrive later.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    tokio::{task::JoinHandle, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::types::ConversationKind;

/// How long a dispatched batch may wait for its reply.
pub const PENDING_ROUTE_TTL: Duration = Duration::from_secs(10 * 60);

/// Interval of the expiry sweep.
pub const PENDING_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Where the reply to one dispatched batch goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRoute {
    pub kind: ConversationKind,
    pub target_id: String,
    pub group_id: Option<String>,
    pub reply_to: Option<String>,
    pub created_at: Instant,
}

/// Shared pending-route table with a fixed TTL.
#[derive(Debug, Clone)]
pub struct PendingRoutes {
    routes: Arc<Mutex<HashMap<String, PendingRoute>>>,
    ttl: Duration,
}

impl Default for PendingRoutes {
    fn default() -> Self {
        Self::with_ttl(PENDING_ROUTE_TTL)
    }
}

impl PendingRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            routes: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub fn insert(&self, correlation_id: impl Into<String>, route: PendingRoute) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.insert(correlation_id.into(), route);
    }

    /// Consume the route for `correlation_id`. Expired routes are treated
    /// as absent.
    pub fn take(&self, correlation_id: &str) -> Option<PendingRoute> {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let route = routes.remove(correlation_id)?;
        (route.created_at.elapsed() <= self.ttl).then_some(route)
    }

    /// Drop expired routes. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let before = routes.len();
        routes.retain(|_, route| route.created_at.elapsed() <= self.ttl);
        before - routes.len()
    }

    pub fn len(&self) -> usize {
        self.routes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep every [`PENDING_SWEEP_INTERVAL`] until `cancel` fires.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let routes = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PENDING_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = routes.sweep();
                        if removed > 0 {
                            debug!(removed, "expired pending reply routes");
                        }
                    },
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(target: &str) -> PendingRoute {
        PendingRoute {
            kind: ConversationKind::Session,
            target_id: target.into(),
            group_id: None,
            reply_to: Some("m1".into()),
            created_at: Instant::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn take_consumes_route() {
        let routes = PendingRoutes::new();
        routes.insert("c1", route("s1"));
        assert_eq!(routes.take("c1").unwrap().target_id, "s1");
        assert!(routes.take("c1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_route_cannot_be_taken() {
        let routes = PendingRoutes::new();
        routes.insert("old", route("s1"));
        tokio::time::advance(PENDING_ROUTE_TTL + Duration::from_secs(1)).await;
        assert!(routes.take("old").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired() {
        let routes = PendingRoutes::new();
        routes.insert("old", route("s1"));
        tokio::time::advance(PENDING_ROUTE_TTL + Duration::from_secs(1)).await;
        routes.insert("new", route("s2"));

        assert_eq!(routes.sweep(), 1);
        assert_eq!(routes.len(), 1);
        assert!(routes.take("new").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_cancelled() {
        let routes = PendingRoutes::with_ttl(Duration::from_secs(5));
        routes.insert("c1", route("s1"));
        let cancel = CancellationToken::new();
        let handle = routes.spawn_sweeper(cancel.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(routes.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
