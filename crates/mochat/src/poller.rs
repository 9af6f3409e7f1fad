//! HTTP long-poll fallback, one loop per session.

use std::time::Duration;

use {
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    api::MochatApi,
    backoff::backoff_delay,
    config::MochatAccount,
    error::Result,
    pipeline::Pipeline,
    registry::DeliveryOutcome,
    status::StatusTracker,
    types::ConversationKind,
};

/// Upper bound on the delay between failed polls.
pub const POLL_BACKOFF_CAP: Duration = Duration::from_millis(30_000);

#[derive(Clone)]
pub struct SessionPoller {
    session_id: String,
    api: MochatApi,
    pipeline: Pipeline,
    status: StatusTracker,
    watch_timeout: Duration,
    watch_limit: u32,
    retry_delay: Duration,
}

impl SessionPoller {
    pub fn new(
        account: &MochatAccount,
        session_id: impl Into<String>,
        api: MochatApi,
        pipeline: Pipeline,
        status: StatusTracker,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            api,
            pipeline,
            status,
            watch_timeout: account.watch_timeout,
            watch_limit: account.watch_limit,
            retry_delay: account.retry_delay,
        }
    }

    /// One watch call from the current registry cursor.
    pub async fn poll_once(&self) -> Result<Option<DeliveryOutcome>> {
        let cursor = self
            .pipeline
            .registry()
            .cursor(&self.session_id)
            .unwrap_or(0);
        let delivery = self
            .api
            .watch(&self.session_id, cursor, self.watch_timeout, self.watch_limit)
            .await?;
        Ok(self
            .pipeline
            .apply_delivery(ConversationKind::Session, &delivery))
    }

    /// Poll until `cancel` fires. An in-flight watch is dropped on cancel.
    pub async fn run(self, cancel: CancellationToken) {
        let session_id = self.session_id.as_str();
        let mut errors: u32 = 0;
        info!(session_id, "mochat poller started");

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.poll_once() => result,
            };
            match result {
                Ok(_) => {
                    errors = 0;
                    self.status.set_connected(true);
                },
                Err(e) => {
                    errors = errors.saturating_add(1);
                    let delay = backoff_delay(self.retry_delay, errors, POLL_BACKOFF_CAP);
                    warn!(session_id, errors, delay_ms = delay.as_millis() as u64, error = %e, "mochat watch failed");
                    self.status.set_error(e.to_string());
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {},
                    }
                },
            }
        }
        debug!(session_id, "mochat poller stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            cursor_store::{CursorPersister, CursorStore},
            registry::ConversationRegistry,
            test_support::{RecordingSink, account, harness},
        },
        mockito::Matcher,
        serde_json::json,
        std::sync::Arc,
    };

    #[tokio::test]
    async fn poll_advances_cursor_and_dispatches() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/claw/sessions/watch")
            .match_header("x-claw-token", "tok")
            .match_body(Matcher::PartialJson(json!({"sessionId": "s1", "cursor": 5, "limit": 100})))
            .with_status(200)
            .with_body(
                json!({"code": 200, "data": {
                    "sessionId": "s1",
                    "cursor": 6,
                    "events": [
                        {"seq": 6, "type": "message.add", "payload": {"messageId": "m6", "author": "u1", "content": "polled"}},
                        {"seq": 6, "type": "message.read", "payload": {"messageId": "m6"}}
                    ]
                }})
                .to_string(),
            )
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let acct = account(&server.url(), json!({"transport": "poll"}));
        let h = harness(&acct, RecordingSink::default());
        let registry = Arc::new(ConversationRegistry::new());
        registry.set_cursor("s1", 5);
        let snapshot = Arc::clone(&registry);
        let pipeline = Pipeline::new(
            registry,
            CursorPersister::new(
                CursorStore::for_account(dir.path(), "default"),
                Arc::new(move || snapshot.cursor_map()),
            ),
            Arc::clone(&h.inbound),
        );
        let poller = SessionPoller::new(
            &acct,
            "s1",
            MochatApi::for_account(&acct).unwrap(),
            pipeline.clone(),
            h.status.clone(),
        );

        let outcome = poller.poll_once().await.unwrap().unwrap();
        assert_eq!(outcome.next_cursor, 6);
        pipeline.idle().await;
        assert_eq!(h.sink.bodies(), vec!["polled"]);
        assert_eq!(pipeline.registry().cursor("s1"), Some(6));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failures_back_off_until_cancelled() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/claw/sessions/watch")
            .with_status(503)
            .with_body("unavailable")
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let acct = account(&server.url(), json!({"retryDelayMs": 60_000}));
        let h = harness(&acct, RecordingSink::default());
        let registry = Arc::new(ConversationRegistry::new());
        let snapshot = Arc::clone(&registry);
        let pipeline = Pipeline::new(
            registry,
            CursorPersister::new(
                CursorStore::for_account(dir.path(), "default"),
                Arc::new(move || snapshot.cursor_map()),
            ),
            Arc::clone(&h.inbound),
        );
        let cancel = CancellationToken::new();
        let handle = SessionPoller::new(
            &acct,
            "s1",
            MochatApi::for_account(&acct).unwrap(),
            pipeline,
            h.status.clone(),
        )
        .spawn(cancel.clone());

        while h.status.snapshot().last_error.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.status.snapshot().last_error.unwrap().contains("503"));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        mock.assert_async().await;
    }
}
