//! Socket-driven sync: subscribe with cursors, route pushes into the
//! [`Pipeline`], and keep the tracked target set fresh.

use std::sync::Arc;

use {
    clawlink_channels::{ChannelEvent, ChannelEventSink},
    serde_json::{Value, json},
    tokio::{sync::mpsc, task::JoinHandle, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    api::MochatApi,
    config::MochatAccount,
    directory::ConverseDirectory,
    event_log::NotifyEventLog,
    inbound::CHANNEL_TYPE,
    normalize::{
        InboxSkip, NotifyKind, classify, normalize_ack_sessions, parse_delivery,
        parse_inbox_append, parse_panel_message,
    },
    pipeline::Pipeline,
    queue::KeyedQueue,
    socket::{CLIENT_DISCONNECT, SocketEmitter, SocketEvent},
    status::StatusTracker,
    types::{ConversationKind, SessionInfo, SubscribeAck},
};

pub const SESSION_EVENTS: &str = "claw.session.events";
pub const PANEL_EVENTS: &str = "claw.panel.events";
pub const SUBSCRIBE_SESSIONS: &str = "com.claw.im.subscribeSessions";
pub const SUBSCRIBE_PANELS: &str = "com.claw.im.subscribePanels";

struct Inner {
    account: MochatAccount,
    emitter: Arc<dyn SocketEmitter>,
    pipeline: Pipeline,
    api: MochatApi,
    directory: ConverseDirectory,
    /// Inbox-append lookups, one worker per converse id.
    lookups: KeyedQueue,
    event_log: NotifyEventLog,
    status: StatusTracker,
    sink: Arc<dyn ChannelEventSink>,
}

/// Reacts to [`SocketEvent`]s for one account.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    pub fn new(
        account: MochatAccount,
        emitter: Arc<dyn SocketEmitter>,
        pipeline: Pipeline,
        api: MochatApi,
        event_log: NotifyEventLog,
        status: StatusTracker,
        sink: Arc<dyn ChannelEventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                account,
                emitter,
                pipeline,
                api,
                directory: ConverseDirectory::new(),
                lookups: KeyedQueue::new(),
                event_log,
                status,
                sink,
            }),
        }
    }

    fn account_id(&self) -> &str {
        &self.inner.account.account_id
    }

    fn discovery_enabled(&self) -> bool {
        self.inner.account.auto_discover_sessions || self.inner.account.auto_discover_panels
    }

    /// Consume socket events until `cancel` fires, the channel closes, or the
    /// client gives up reconnecting.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<SocketEvent>, cancel: CancellationToken) {
        let mut refresh: Option<(CancellationToken, JoinHandle<()>)> = None;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                SocketEvent::Connected => {
                    stop_refresh(refresh.take()).await;
                    self.on_connected().await;
                    if self.discovery_enabled() {
                        refresh = Some(self.spawn_refresh(cancel.child_token()));
                    }
                },
                SocketEvent::Disconnected { reason } => {
                    stop_refresh(refresh.take()).await;
                    if reason != CLIENT_DISCONNECT {
                        self.inner.status.set_error(reason.clone());
                    }
                    self.connection_changed(false, Some(reason)).await;
                },
                SocketEvent::ConnectError { message } => {
                    warn!(account_id = %self.account_id(), error = %message, "mochat socket connect error");
                    self.inner.status.set_error(message.clone());
                    self.connection_changed(false, Some(message)).await;
                },
                SocketEvent::GaveUp { attempts } => {
                    self.on_gave_up(attempts).await;
                    break;
                },
                SocketEvent::Event { name, payload } => self.on_event(&name, &payload).await,
            }
        }

        stop_refresh(refresh.take()).await;
        debug!(account_id = %self.account_id(), "mochat subscription manager stopped");
    }

    // ── Connection lifecycle ────────────────────────────────────────────────

    async fn on_connected(&self) {
        info!(account_id = %self.account_id(), "mochat socket connected");
        self.connection_changed(true, None).await;

        let registry = self.inner.pipeline.registry();
        let sessions = registry.tracked(ConversationKind::Session);
        self.subscribe_sessions(&sessions).await;

        let panels = registry.tracked(ConversationKind::Panel);
        if self.inner.account.auto_discover_panels || !panels.is_empty() {
            self.subscribe_panels(&panels).await;
        }

        if self.discovery_enabled() {
            self.refresh_targets().await;
        }
    }

    async fn on_gave_up(&self, attempts: u32) {
        let reason = format!("reconnect attempts exhausted after {attempts} attempts");
        warn!(account_id = %self.account_id(), attempts, "mochat socket gave up reconnecting");
        self.inner.status.set_error(reason.clone());
        self.inner.status.set_connected(false);
        self.inner
            .sink
            .emit(ChannelEvent::AccountDisabled {
                channel_type: CHANNEL_TYPE.into(),
                account_id: self.account_id().to_string(),
                reason: reason.clone(),
            })
            .await;
        self.inner
            .sink
            .request_disable_account(CHANNEL_TYPE, self.account_id(), &reason)
            .await;
    }

    async fn connection_changed(&self, connected: bool, reason: Option<String>) {
        self.inner.status.set_connected(connected);
        self.inner
            .sink
            .emit(ChannelEvent::ConnectionChanged {
                channel_type: CHANNEL_TYPE.into(),
                account_id: self.account_id().to_string(),
                connected,
                reason,
            })
            .await;
    }

    fn spawn_refresh(&self, token: CancellationToken) -> (CancellationToken, JoinHandle<()>) {
        let manager = self.clone();
        let period = self.inner.account.refresh_interval;
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => manager.refresh_targets().await,
                }
            }
        });
        (token, handle)
    }

    // ── Subscribe calls ─────────────────────────────────────────────────────

    /// Subscribe `session_ids` with the full cursor map. Sessions without a
    /// cursor are marked cold first so their history is not dispatched.
    pub async fn subscribe_sessions(&self, session_ids: &[String]) -> bool {
        if session_ids.is_empty() {
            return true;
        }
        let registry = self.inner.pipeline.registry();
        let cold = registry.mark_cold_missing(session_ids);
        let payload = json!({
            "sessionIds": session_ids,
            "cursors": registry.cursor_map(),
            "limit": self.inner.account.watch_limit,
        });
        let Some(ack) = self.request(SUBSCRIBE_SESSIONS, payload).await else {
            return false;
        };
        info!(
            account_id = %self.account_id(),
            count = session_ids.len(),
            cold,
            "subscribed mochat sessions"
        );

        if let Some(data) = ack.data {
            for delivery in normalize_ack_sessions(&data) {
                self.inner
                    .pipeline
                    .apply_delivery(ConversationKind::Session, &delivery);
            }
        }
        true
    }

    pub async fn subscribe_panels(&self, panel_ids: &[String]) -> bool {
        let ok = self
            .request(SUBSCRIBE_PANELS, json!({ "panelIds": panel_ids }))
            .await
            .is_some();
        if ok {
            info!(account_id = %self.account_id(), count = panel_ids.len(), "subscribed mochat panels");
        }
        ok
    }

    async fn request(&self, event: &str, payload: Value) -> Option<SubscribeAck> {
        let timeout = self.inner.account.ack_timeout;
        let ack = match self.inner.emitter.emit_with_ack(event, payload, timeout).await {
            Ok(value) => serde_json::from_value::<SubscribeAck>(value).unwrap_or_default(),
            Err(e) => {
                warn!(account_id = %self.account_id(), event, error = %e, "mochat subscribe failed");
                self.inner.status.set_error(e.to_string());
                return None;
            },
        };
        if !ack.result {
            let message = ack
                .message
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("{event} rejected"));
            warn!(account_id = %self.account_id(), event, error = %message, "mochat subscribe rejected");
            self.inner.status.set_error(message);
            return None;
        }
        Some(ack)
    }

    // ── Discovery ───────────────────────────────────────────────────────────

    /// One discovery pass over sessions and panels, as configured.
    pub async fn refresh_targets(&self) {
        if self.inner.account.auto_discover_sessions {
            self.refresh_sessions().await;
        }
        if self.inner.account.auto_discover_panels {
            self.refresh_panels().await;
        }
    }

    async fn list_sessions(&self) -> Option<Vec<SessionInfo>> {
        match self.inner.api.list_sessions(None, None).await {
            Ok(listing) => {
                let mapped = self.inner.directory.record(&listing.sessions);
                debug!(
                    account_id = %self.account_id(),
                    sessions = listing.sessions.len(),
                    mapped,
                    "refreshed mochat session directory"
                );
                Some(listing.sessions)
            },
            Err(e) => {
                warn!(account_id = %self.account_id(), error = %e, "mochat session listing failed");
                self.inner.status.set_error(e.to_string());
                None
            },
        }
    }

    async fn refresh_sessions(&self) {
        let Some(sessions) = self.list_sessions().await else {
            return;
        };
        let discovered = self.inner.pipeline.registry().track_many(
            ConversationKind::Session,
            sessions.iter().map(|s| s.session_id.as_str()),
        );
        if !discovered.is_empty() {
            info!(account_id = %self.account_id(), count = discovered.len(), "discovered mochat sessions");
            self.subscribe_sessions(&discovered).await;
        }
    }

    async fn refresh_panels(&self) {
        let group = match self.inner.api.get_group(None).await {
            Ok(group) => group,
            Err(e) => {
                warn!(account_id = %self.account_id(), error = %e, "mochat panel discovery failed");
                self.inner.status.set_error(e.to_string());
                return;
            },
        };
        let discovered = self.inner.pipeline.registry().track_many(
            ConversationKind::Panel,
            group
                .panels
                .iter()
                .filter(|p| p.is_text())
                .filter_map(|p| p.resolved_id()),
        );
        if !discovered.is_empty() {
            info!(account_id = %self.account_id(), count = discovered.len(), "discovered mochat panels");
            self.subscribe_panels(&discovered).await;
        }
    }

    // ── Pushes ──────────────────────────────────────────────────────────────

    async fn on_event(&self, name: &str, payload: &Value) {
        match name {
            SESSION_EVENTS => {
                let delivery = parse_delivery(payload, None);
                self.inner
                    .pipeline
                    .apply_delivery(ConversationKind::Session, &delivery);
            },
            PANEL_EVENTS => {
                let delivery = parse_delivery(payload, None);
                self.inner
                    .pipeline
                    .apply_delivery(ConversationKind::Panel, &delivery);
            },
            _ => match classify(name) {
                Some(NotifyKind::InboxAppend) => self.on_inbox_append(name, payload),
                Some(NotifyKind::PanelMessage) => self.on_panel_message(payload),
                Some(NotifyKind::Other) => {
                    if let Err(e) = self.inner.event_log.record(name, payload).await {
                        warn!(account_id = %self.account_id(), event = name, error = %e, "failed to record notify event");
                    }
                },
                None => debug!(account_id = %self.account_id(), event = name, "ignoring socket event"),
            },
        }
    }

    /// Converse resolution runs on the converse id's lookup worker, off the
    /// event loop.
    fn on_inbox_append(&self, name: &str, payload: &Value) {
        let message = match parse_inbox_append(payload) {
            Ok(message) => message,
            Err(InboxSkip::NotMessage) => return,
            Err(skip) => {
                debug!(account_id = %self.account_id(), reason = ?skip, "skipping inbox append");
                return;
            },
        };
        let manager = self.clone();
        let name = name.to_string();
        let converse_id = message.converse_id.clone();
        self.inner.lookups.push(&converse_id, async move {
            let Some(session_id) = manager.resolve_session(&message.converse_id).await else {
                debug!(
                    account_id = %manager.account_id(),
                    converse_id = %message.converse_id,
                    "no session for inbox append"
                );
                return;
            };
            let event = message.into_event(&session_id, &name);
            manager
                .inner
                .pipeline
                .enqueue_event(ConversationKind::Session, &session_id, event);
        });
    }

    /// Map a converse id to its session. A miss triggers a rate-limited
    /// directory refresh, which also tracks and subscribes new sessions.
    async fn resolve_session(&self, converse_id: &str) -> Option<String> {
        let directory = &self.inner.directory;
        if let Some(session_id) = directory.lookup(converse_id) {
            return Some(session_id);
        }
        if !directory.begin_refresh(converse_id, std::time::Instant::now()) {
            return None;
        }
        self.refresh_sessions().await;
        directory.lookup(converse_id)
    }

    /// Wait for pending inbox-append lookups.
    pub async fn idle(&self) {
        self.inner.lookups.idle().await;
    }

    fn on_panel_message(&self, payload: &Value) {
        let Some(event) = parse_panel_message(payload) else {
            debug!(account_id = %self.account_id(), "skipping panel notify without group or panel id");
            return;
        };
        let panel_id = event.session_id.clone();
        let registry = self.inner.pipeline.registry();
        if !registry.tracked(ConversationKind::Panel).is_empty()
            && !registry.is_tracked(ConversationKind::Panel, &panel_id)
        {
            debug!(account_id = %self.account_id(), panel_id = %panel_id, "ignoring untracked panel");
            return;
        }
        self.inner
            .pipeline
            .enqueue_event(ConversationKind::Panel, &panel_id, event);
    }
}

async fn stop_refresh(refresh: Option<(CancellationToken, JoinHandle<()>)>) {
    if let Some((token, handle)) = refresh {
        token.cancel();
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            cursor_store::{CursorPersister, CursorStore},
            error::{Error, Result},
            registry::ConversationRegistry,
            test_support::{Harness, RecordingSink, account, harness},
        },
        async_trait::async_trait,
        std::{collections::HashMap, sync::Mutex, time::Duration},
    };

    #[derive(Default)]
    struct FakeEmitter {
        calls: Mutex<Vec<(String, Value)>>,
        acks: Mutex<HashMap<String, Value>>,
    }

    impl FakeEmitter {
        fn ack(self, event: &str, ack: Value) -> Self {
            self.acks.lock().unwrap().insert(event.into(), ack);
            self
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SocketEmitter for FakeEmitter {
        async fn emit_with_ack(&self, event: &str, payload: Value, timeout: Duration) -> Result<Value> {
            self.calls.lock().unwrap().push((event.into(), payload));
            match self.acks.lock().unwrap().get(event) {
                Some(Value::Null) => Err(Error::AckTimeout {
                    event: event.into(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
                Some(ack) => Ok(ack.clone()),
                None => Ok(json!({"result": true})),
            }
        }
    }

    struct Fixture {
        manager: SubscriptionManager,
        pipeline: Pipeline,
        emitter: Arc<FakeEmitter>,
        h: Harness,
        _dir: tempfile::TempDir,
        dir: std::path::PathBuf,
    }

    fn fixture(base_url: &str, overrides: Value, emitter: FakeEmitter) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let acct = account(base_url, overrides);
        let h = harness(&acct, RecordingSink::default());
        let registry = Arc::new(ConversationRegistry::new());
        for session in &acct.sessions {
            registry.track(ConversationKind::Session, session);
        }
        for panel in &acct.panels {
            registry.track(ConversationKind::Panel, panel);
        }
        let snapshot_registry = Arc::clone(&registry);
        let persister = CursorPersister::new(
            CursorStore::for_account(dir.path(), "default"),
            Arc::new(move || snapshot_registry.cursor_map()),
        );
        let pipeline = Pipeline::new(registry, persister, Arc::clone(&h.inbound));
        let emitter = Arc::new(emitter);
        let manager = SubscriptionManager::new(
            acct.clone(),
            emitter.clone(),
            pipeline.clone(),
            MochatApi::for_account(&acct).unwrap(),
            NotifyEventLog::new(dir.path(), "default"),
            h.status.clone(),
            h.sink.clone(),
        );
        Fixture {
            manager,
            pipeline,
            emitter,
            h,
            dir: dir.path().to_path_buf(),
            _dir: dir,
        }
    }

    /// Feed `events` through a manager and wait for every mailbox to drain.
    async fn drive(f: &Fixture, events: Vec<SocketEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in events {
            tx.send(event).unwrap();
        }
        drop(tx);
        f.manager
            .clone()
            .run(rx, CancellationToken::new())
            .await;
        f.manager.idle().await;
        f.pipeline.idle().await;
    }

    fn push(name: &str, payload: Value) -> SocketEvent {
        SocketEvent::Event {
            name: name.into(),
            payload,
        }
    }

    #[tokio::test]
    async fn connect_subscribes_with_cursors_and_skips_cold_history() {
        let emitter = FakeEmitter::default().ack(
            SUBSCRIBE_SESSIONS,
            json!({
                "result": true,
                "data": [
                    {"sessionId": "s1", "cursor": 6, "events": [
                        {"seq": 6, "type": "message.add", "payload": {"messageId": "m6", "author": "u1", "content": "hi"}}
                    ]},
                    {"sessionId": "s2", "cursor": 3, "events": [
                        {"seq": 3, "type": "message.add", "payload": {"messageId": "m3", "author": "u1", "content": "old"}}
                    ]}
                ]
            }),
        );
        let f = fixture(
            "http://127.0.0.1:9",
            json!({"sessions": ["s1", "s2"]}),
            emitter,
        );
        f.pipeline.registry().set_cursor("s1", 5);

        drive(&f, vec![SocketEvent::Connected]).await;

        let calls = f.emitter.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, SUBSCRIBE_SESSIONS);
        assert_eq!(
            calls[0].1,
            json!({"sessionIds": ["s1", "s2"], "cursors": {"s1": 5}, "limit": 100})
        );
        assert_eq!(f.h.sink.bodies(), vec!["hi"]);
        assert_eq!(f.pipeline.registry().cursor("s2"), Some(3));
        assert!(f.h.status.snapshot().connected);
    }

    #[tokio::test]
    async fn rejected_ack_is_reported_as_last_error() {
        let emitter = FakeEmitter::default().ack(
            SUBSCRIBE_SESSIONS,
            json!({"result": false, "message": "forbidden"}),
        );
        let f = fixture("http://127.0.0.1:9", json!({}), emitter);
        drive(&f, vec![SocketEvent::Connected]).await;
        assert_eq!(f.h.status.snapshot().last_error.as_deref(), Some("forbidden"));
    }

    #[tokio::test]
    async fn ack_timeout_is_recoverable() {
        let emitter = FakeEmitter::default().ack(SUBSCRIBE_SESSIONS, Value::Null);
        let f = fixture("http://127.0.0.1:9", json!({"sessions": ["s1", "s2"]}), emitter);
        f.pipeline.registry().set_cursor("s1", 0);
        drive(&f, vec![SocketEvent::Connected]).await;
        // Marked cold before the emit, so a failed subscribe leaves it cold.
        assert!(f.pipeline.registry().is_cold("s2"));
        assert!(!f.pipeline.registry().is_cold("s1"));
        assert!(
            f.h.status
                .snapshot()
                .last_error
                .unwrap()
                .contains("subscribeSessions")
        );

        drive(&f, vec![push(SESSION_EVENTS, json!({
            "sessionId": "s1",
            "cursor": 1,
            "events": [{"seq": 1, "type": "message.add", "payload": {"messageId": "m1", "author": "u1", "content": "still flowing"}}]
        }))])
        .await;
        assert_eq!(f.h.sink.bodies(), vec!["still flowing"]);
    }

    #[tokio::test]
    async fn panels_are_subscribed_when_configured() {
        let f = fixture(
            "http://127.0.0.1:9",
            json!({"sessions": [], "panels": ["p1"]}),
            FakeEmitter::default(),
        );
        drive(&f, vec![SocketEvent::Connected]).await;
        assert_eq!(f.emitter.calls(), vec![(
            SUBSCRIBE_PANELS.to_string(),
            json!({"panelIds": ["p1"]})
        )]);
    }

    #[tokio::test]
    async fn panel_notify_respects_tracked_panels() {
        let f = fixture(
            "http://127.0.0.1:9",
            json!({"panels": ["p1"]}),
            FakeEmitter::default(),
        );
        let message = |panel: &str, id: &str, text: &str| {
            push("notify:chat.message.add", json!({
                "_id": id,
                "groupId": "g1",
                "converseId": panel,
                "author": "u1",
                "content": text,
            }))
        };
        drive(&f, vec![message("p2", "x1", "elsewhere"), message("p1", "x2", "here")]).await;
        let dispatches = f.h.sink.dispatches();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].target.chat_id, "p1");
    }

    #[tokio::test]
    async fn inbox_append_resolves_converse_through_session_listing() {
        let mut server = mockito::Server::new_async().await;
        let listing = server
            .mock("POST", "/api/claw/sessions/list")
            .with_status(200)
            .with_body(
                json!({"code": 200, "data": {"sessions": [{"sessionId": "session_9", "converseId": "c9"}]}})
                    .to_string(),
            )
            .expect(1)
            .create_async()
            .await;
        let f = fixture(&server.url(), json!({}), FakeEmitter::default());

        let append = |id: &str| {
            push("notify:chat.inbox.append", json!({
                "type": "message",
                "payload": {
                    "converseId": "c9",
                    "messageId": id,
                    "messageAuthor": "u1",
                    "messagePlainContent": "dm"
                }
            }))
        };
        drive(&f, vec![append("i1"), append("i1"), append("i2")]).await;

        let dispatches = f.h.sink.dispatches();
        assert_eq!(dispatches.len(), 2);
        assert!(dispatches.iter().all(|d| d.target.chat_id == "session_9"));
        listing.assert_async().await;

        let registry = f.pipeline.registry();
        assert!(registry.is_tracked(ConversationKind::Session, "session_9"));
        let calls = f.emitter.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, SUBSCRIBE_SESSIONS);
        assert_eq!(calls[0].1["sessionIds"], json!(["session_9"]));
    }

    #[tokio::test]
    async fn slow_inbox_lookup_does_not_block_other_pushes() {
        // Accepts connections but never answers, so the listing hangs.
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", silent.local_addr().unwrap());
        let f = fixture(&url, json!({}), FakeEmitter::default());
        f.pipeline.registry().set_cursor("s1", 0);

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let run = tokio::spawn(f.manager.clone().run(rx, cancel.clone()));

        tx.send(push("notify:chat.inbox.append", json!({
            "type": "message",
            "payload": {"converseId": "c-unknown", "messageAuthor": "u1", "messagePlainContent": "dm"}
        })))
        .unwrap();
        tx.send(push(SESSION_EVENTS, json!({
            "sessionId": "s1",
            "cursor": 1,
            "events": [{"seq": 1, "type": "message.add", "payload": {"messageId": "m1", "author": "u1", "content": "live"}}]
        })))
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while f.h.sink.bodies().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(f.h.sink.bodies(), vec!["live"]);

        cancel.cancel();
        run.await.unwrap();
        drop(silent);
    }

    #[tokio::test]
    async fn unknown_notify_events_go_to_the_event_log() {
        let f = fixture("http://127.0.0.1:9", json!({}), FakeEmitter::default());
        drive(&f, vec![push("notify:group.updated", json!({"groupId": "g1"}))]).await;

        let events_dir = f.dir.join("mochat").join("events");
        let mut entries = std::fs::read_dir(&events_dir).unwrap();
        let file = entries.next().unwrap().unwrap().path();
        let written = std::fs::read_to_string(file).unwrap();
        let record: Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(record["eventName"], "notify:group.updated");
        assert_eq!(record["accountId"], "default");
    }

    #[tokio::test]
    async fn disconnect_reasons_surface_except_client_initiated() {
        let f = fixture("http://127.0.0.1:9", json!({}), FakeEmitter::default());
        drive(&f, vec![
            SocketEvent::Connected,
            SocketEvent::Disconnected {
                reason: CLIENT_DISCONNECT.into(),
            },
        ])
        .await;
        let status = f.h.status.snapshot();
        assert!(!status.connected);
        assert!(status.last_error.is_none());

        drive(&f, vec![SocketEvent::Disconnected {
            reason: "transport close".into(),
        }])
        .await;
        assert_eq!(
            f.h.status.snapshot().last_error.as_deref(),
            Some("transport close")
        );
    }

    #[tokio::test]
    async fn giving_up_disables_the_account() {
        let f = fixture("http://127.0.0.1:9", json!({}), FakeEmitter::default());
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(SocketEvent::GaveUp { attempts: 3 }).unwrap();
        // The manager must return without the sender being dropped.
        f.manager.clone().run(rx, CancellationToken::new()).await;

        assert_eq!(f.h.sink.disabled.lock().unwrap().clone(), vec![(
            "mochat".to_string(),
            "default".to_string()
        )]);
        assert!(
            f.h.sink
                .events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, ChannelEvent::AccountDisabled { .. }))
        );
        drop(tx);
    }
}
