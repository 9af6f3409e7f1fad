use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    secrecy::{ExposeSecret, Secret},
    serde_json::{Value, json},
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot},
        time::Instant,
    },
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{
    backoff::backoff_delay,
    config::MochatAccount,
    error::{Error, Result},
    socket::packet::{EnginePacket, OpenInfo, SocketPacket, connect_error_message},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Disconnect reason reported when the client itself closes the socket.
pub const CLIENT_DISCONNECT: &str = "io client disconnect";

/// Lifecycle and data events surfaced by [`SocketClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Connected,
    Disconnected { reason: String },
    ConnectError { message: String },
    Event { name: String, payload: Value },
    /// Reconnect attempts exhausted; the client has stopped.
    GaveUp { attempts: u32 },
}

/// Request/response emit over the socket.
#[async_trait]
pub trait SocketEmitter: Send + Sync {
    /// Emit `event` and wait up to `timeout` for the server's ack.
    async fn emit_with_ack(&self, event: &str, payload: Value, timeout: Duration) -> Result<Value>;
}

#[derive(Clone)]
pub struct SocketOptions {
    pub url: String,
    pub path: String,
    pub token: Secret<String>,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub connect_timeout: Duration,
    /// Reconnects after a failure before giving up; `0` retries forever.
    pub max_attempts: u32,
}

impl std::fmt::Debug for SocketOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketOptions")
            .field("url", &self.url)
            .field("path", &self.path)
            .field("token", &"[REDACTED]")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl SocketOptions {
    pub fn for_account(account: &MochatAccount) -> Self {
        Self {
            url: account.socket_url.clone(),
            path: account.socket_path.clone(),
            token: account.claw_token.clone(),
            reconnect_delay: account.socket_reconnect_delay,
            max_reconnect_delay: account.socket_max_reconnect_delay,
            connect_timeout: account.socket_connect_timeout,
            max_attempts: account.max_retry_attempts,
        }
    }

    /// WebSocket endpoint: `<url><path>/?EIO=4&transport=websocket`.
    pub fn websocket_url(&self) -> Result<Url> {
        let mut url = Url::parse(self.url.trim())
            .map_err(|e| Error::config(format!("invalid socketUrl {:?}: {e}", self.url)))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(Error::config(format!("unsupported socketUrl scheme {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::config("cannot rewrite socketUrl scheme"))?;

        let base = url.path().trim_end_matches('/').to_string();
        let path = self.path.trim().trim_matches('/');
        let full = if path.is_empty() {
            format!("{base}/")
        } else {
            format!("{base}/{path}/")
        };
        url.set_path(&full);
        url.set_query(Some("EIO=4&transport=websocket"));
        Ok(url)
    }
}

type AckTable = HashMap<u64, oneshot::Sender<Vec<Value>>>;

struct Shared {
    connected: AtomicBool,
    next_ack: AtomicU64,
    acks: Mutex<AckTable>,
}

impl Shared {
    fn fail_pending(&self) {
        let mut acks = self.acks.lock().unwrap_or_else(|e| e.into_inner());
        acks.clear();
    }

    fn forget(&self, id: u64) {
        let mut acks = self.acks.lock().unwrap_or_else(|e| e.into_inner());
        acks.remove(&id);
    }

    fn resolve(&self, id: u64, args: Vec<Value>) {
        let sender = {
            let mut acks = self.acks.lock().unwrap_or_else(|e| e.into_inner());
            acks.remove(&id)
        };
        match sender {
            Some(tx) => {
                let _ = tx.send(args);
            },
            None => debug!(id, "ack for unknown or expired request"),
        }
    }
}

/// Socket.IO client with automatic reconnect. Events are delivered on the
/// channel handed to [`SocketClient::spawn`].
#[derive(Clone)]
pub struct SocketClient {
    write_tx: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
}

impl SocketClient {
    /// Start the connection loop. It runs until `cancel` fires or reconnects
    /// are exhausted.
    pub fn spawn(
        options: SocketOptions,
        events: mpsc::UnboundedSender<SocketEvent>,
        cancel: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (write_tx, write_rx) = mpsc::unbounded_channel::<String>();
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            next_ack: AtomicU64::new(0),
            acks: Mutex::new(HashMap::new()),
        });
        let handle = tokio::spawn(connection_loop(
            options,
            events,
            write_rx,
            Arc::clone(&shared),
            cancel,
        ));
        (Self { write_tx, shared }, handle)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SocketEmitter for SocketClient {
    async fn emit_with_ack(&self, event: &str, payload: Value, timeout: Duration) -> Result<Value> {
        if !self.is_connected() {
            return Err(Error::transport("socket is not connected"));
        }
        let id = self.shared.next_ack.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut acks = self.shared.acks.lock().unwrap_or_else(|e| e.into_inner());
            acks.insert(id, tx);
        }
        if self
            .write_tx
            .send(SocketPacket::event(event, payload, Some(id)).to_frame())
            .is_err()
        {
            self.shared.forget(id);
            return Err(Error::transport("socket task has stopped"));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(args)) => Ok(args.into_iter().next().unwrap_or(Value::Null)),
            Ok(Err(_)) => Err(Error::transport(format!(
                "connection closed before {event} was acknowledged"
            ))),
            Err(_) => {
                self.shared.forget(id);
                Err(Error::AckTimeout {
                    event: event.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            },
        }
    }
}

// ── Connection loop ─────────────────────────────────────────────────────────

async fn connection_loop(
    options: SocketOptions,
    events: mpsc::UnboundedSender<SocketEvent>,
    mut write_rx: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let url = match options.websocket_url() {
        Ok(url) => url,
        Err(e) => {
            let _ = events.send(SocketEvent::ConnectError {
                message: e.to_string(),
            });
            let _ = events.send(SocketEvent::GaveUp { attempts: 0 });
            return;
        },
    };
    let mut failures: u32 = 0;

    loop {
        info!(%url, "connecting socket");
        let handshake = tokio::select! {
            _ = cancel.cancelled() => return,
            result = tokio::time::timeout(options.connect_timeout, handshake(&url, &options.token)) => result,
        };

        match handshake {
            Ok(Ok((ws, open))) => {
                failures = 0;
                while write_rx.try_recv().is_ok() {}
                shared.connected.store(true, Ordering::SeqCst);
                info!(sid = %open.sid, "socket connected");
                let _ = events.send(SocketEvent::Connected);

                let reason = pump(ws, &open, &events, &mut write_rx, &shared, &cancel).await;
                shared.connected.store(false, Ordering::SeqCst);
                shared.fail_pending();
                if reason == CLIENT_DISCONNECT {
                    debug!("socket closed by client");
                    return;
                }
                info!(%reason, "socket disconnected");
                let _ = events.send(SocketEvent::Disconnected { reason });
            },
            Ok(Err(e)) => {
                failures += 1;
                warn!(error = %e, failures, "socket connect failed");
                let _ = events.send(SocketEvent::ConnectError {
                    message: e.to_string(),
                });
            },
            Err(_) => {
                failures += 1;
                warn!(failures, "socket connect timed out");
                let _ = events.send(SocketEvent::ConnectError {
                    message: "timeout".into(),
                });
            },
        }

        if options.max_attempts > 0 && failures > options.max_attempts {
            warn!(attempts = failures, "socket reconnect attempts exhausted");
            let _ = events.send(SocketEvent::GaveUp { attempts: failures });
            return;
        }

        let delay = backoff_delay(
            options.reconnect_delay,
            failures.max(1),
            options.max_reconnect_delay,
        );
        debug!(delay_ms = delay.as_millis(), "socket reconnect scheduled");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {},
        }
    }
}

/// Open the WebSocket and complete the Engine.IO and Socket.IO handshakes.
async fn handshake(url: &Url, token: &Secret<String>) -> Result<(WsStream, OpenInfo)> {
    let (mut ws, _response) = connect_async(url.as_str()).await?;

    let open = loop {
        let text = next_text(&mut ws).await?;
        match EnginePacket::decode(&text)? {
            EnginePacket::Open(info) => break info,
            EnginePacket::Ping(data) => {
                ws.send(Message::Text(EnginePacket::Pong(data).encode().into()))
                    .await?;
            },
            other => debug!(?other, "ignoring packet before open"),
        }
    };

    let connect = SocketPacket::Connect {
        namespace: "/".into(),
        data: Some(json!({ "token": token.expose_secret() })),
    };
    ws.send(Message::Text(connect.to_frame().into())).await?;

    loop {
        let text = next_text(&mut ws).await?;
        match EnginePacket::decode(&text)? {
            EnginePacket::Ping(data) => {
                ws.send(Message::Text(EnginePacket::Pong(data).encode().into()))
                    .await?;
            },
            EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                SocketPacket::Connect { .. } => return Ok((ws, open)),
                SocketPacket::ConnectError { data, .. } => {
                    return Err(Error::transport(connect_error_message(&data)));
                },
                other => debug!(?other, "ignoring packet before connect"),
            },
            EnginePacket::Close => return Err(Error::transport("server closed during handshake")),
            _ => {},
        }
    }
}

async fn next_text(ws: &mut WsStream) -> Result<String> {
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => return Ok(text.to_string()),
            Message::Ping(data) => ws.send(Message::Pong(data)).await?,
            Message::Close(_) => break,
            _ => {},
        }
    }
    Err(Error::transport("connection closed during handshake"))
}

/// Forward frames until the connection ends. Returns the disconnect reason.
async fn pump(
    ws: WsStream,
    open: &OpenInfo,
    events: &mpsc::UnboundedSender<SocketEvent>,
    write_rx: &mut mpsc::UnboundedReceiver<String>,
    shared: &Shared,
    cancel: &CancellationToken,
) -> String {
    let (mut sink, mut reader) = ws.split();
    let ping_window = Duration::from_millis(open.ping_interval + open.ping_timeout);
    let mut deadline = Instant::now() + ping_window;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Text(
                    EnginePacket::Message(SocketPacket::Disconnect { namespace: "/".into() }.encode())
                        .encode()
                        .into(),
                )).await;
                let _ = sink.send(Message::Close(None)).await;
                return CLIENT_DISCONNECT.into();
            },
            _ = tokio::time::sleep_until(deadline) => {
                return "ping timeout".into();
            },
            frame = write_rx.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.send(Message::Close(None)).await;
                    return CLIENT_DISCONNECT.into();
                };
                if let Err(e) = sink.send(Message::Text(frame.into())).await {
                    return format!("transport error: {e}");
                }
            },
            msg = reader.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return "transport close".into(),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return format!("transport error: {e}"),
                };
                let packet = match EnginePacket::decode(&text) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!(error = %e, "ignoring undecodable frame");
                        continue;
                    },
                };
                match packet {
                    EnginePacket::Ping(data) => {
                        deadline = Instant::now() + ping_window;
                        let pong = EnginePacket::Pong(data).encode();
                        if let Err(e) = sink.send(Message::Text(pong.into())).await {
                            return format!("transport error: {e}");
                        }
                    },
                    EnginePacket::Close => return "transport close".into(),
                    EnginePacket::Message(body) => match SocketPacket::decode(&body) {
                        Ok(SocketPacket::Event { name, mut args, .. }) => {
                            let payload = if args.is_empty() { Value::Null } else { args.swap_remove(0) };
                            let _ = events.send(SocketEvent::Event { name, payload });
                        },
                        Ok(SocketPacket::Ack { id, args, .. }) => shared.resolve(id, args),
                        Ok(SocketPacket::Disconnect { .. }) => return "io server disconnect".into(),
                        Ok(other) => debug!(?other, "ignoring socket packet"),
                        Err(e) => warn!(error = %e, "ignoring undecodable socket packet"),
                    },
                    _ => {},
                }
            },
        }
    }
}
