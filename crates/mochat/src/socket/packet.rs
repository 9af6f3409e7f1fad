//! Engine.IO v4 / Socket.IO v5 text framing.

use {
    serde::Deserialize,
    serde_json::{Value, json},
};

use crate::error::{Error, Result};

/// Handshake data carried by the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| malformed("empty engine packet"))?;
        let body = chars.as_str();
        Ok(match kind {
            '0' => Self::Open(serde_json::from_str(body)?),
            '1' => Self::Close,
            '2' => Self::Ping(body.to_string()),
            '3' => Self::Pong(body.to_string()),
            '4' => Self::Message(body.to_string()),
            '5' => Self::Upgrade,
            '6' => Self::Noop,
            other => return Err(malformed(format!("unknown engine packet type {other:?}"))),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Open(info) => format!(
                "0{}",
                json!({"sid": info.sid, "pingInterval": info.ping_interval, "pingTimeout": info.ping_timeout})
            ),
            Self::Close => "1".into(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".into(),
            Self::Noop => "6".into(),
        }
    }
}

/// Socket.IO packet, carried inside an Engine.IO `message`.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        data: Value,
    },
}

const DEFAULT_NAMESPACE: &str = "/";

impl SocketPacket {
    /// Event on the default namespace.
    pub fn event(name: &str, payload: Value, id: Option<u64>) -> Self {
        Self::Event {
            namespace: DEFAULT_NAMESPACE.into(),
            id,
            name: name.into(),
            args: vec![payload],
        }
    }

    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| malformed("empty socket packet"))?;
        let mut rest = chars.as_str();

        let mut namespace = DEFAULT_NAMESPACE.to_string();
        if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            namespace = rest[..end].to_string();
            rest = rest.get(end + 1..).unwrap_or_default();
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            Some(
                rest[..digits]
                    .parse::<u64>()
                    .map_err(|e| malformed(format!("bad ack id: {e}")))?,
            )
        } else {
            None
        };
        let data = &rest[digits..];
        let data: Option<Value> = if data.is_empty() {
            None
        } else {
            Some(serde_json::from_str(data)?)
        };

        match kind {
            '0' => Ok(Self::Connect { namespace, data }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => {
                let mut items = into_array(data)?;
                if items.is_empty() {
                    return Err(malformed("event without a name"));
                }
                let name = match items.remove(0) {
                    Value::String(name) => name,
                    other => return Err(malformed(format!("event name is not a string: {other}"))),
                };
                Ok(Self::Event {
                    namespace,
                    id,
                    name,
                    args: items,
                })
            },
            '3' => Ok(Self::Ack {
                namespace,
                id: id.ok_or_else(|| malformed("ack without id"))?,
                args: into_array(data)?,
            }),
            '4' => Ok(Self::ConnectError {
                namespace,
                data: data.unwrap_or(Value::Null),
            }),
            '5' | '6' => Err(malformed("binary packets are not supported")),
            other => Err(malformed(format!("unknown socket packet type {other:?}"))),
        }
    }

    pub fn encode(&self) -> String {
        fn prefix(kind: char, namespace: &str) -> String {
            if namespace == DEFAULT_NAMESPACE {
                kind.to_string()
            } else {
                format!("{kind}{namespace},")
            }
        }

        match self {
            Self::Connect { namespace, data } => {
                let mut out = prefix('0', namespace);
                if let Some(data) = data {
                    out.push_str(&data.to_string());
                }
                out
            },
            Self::Disconnect { namespace } => prefix('1', namespace),
            Self::Event {
                namespace,
                id,
                name,
                args,
            } => {
                let mut out = prefix('2', namespace);
                if let Some(id) = id {
                    out.push_str(&id.to_string());
                }
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                out.push_str(&Value::Array(items).to_string());
                out
            },
            Self::Ack {
                namespace,
                id,
                args,
            } => format!(
                "{}{id}{}",
                prefix('3', namespace),
                Value::Array(args.clone())
            ),
            Self::ConnectError { namespace, data } => format!("{}{data}", prefix('4', namespace)),
        }
    }

    /// Wrap in an Engine.IO `message` frame.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

/// Human-readable reason from a `connect_error` payload.
pub fn connect_error_message(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match data {
            Value::String(s) => s.clone(),
            Value::Null => "connection refused".into(),
            other => other.to_string(),
        })
}

fn into_array(data: Option<Value>) -> Result<Vec<Value>> {
    match data {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(malformed(format!("expected array payload, got {other}"))),
    }
}

fn malformed(message: impl std::fmt::Display) -> Error {
    Error::transport(format!("malformed packet: {message}"))
}
