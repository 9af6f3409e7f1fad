//! Wire types for the Claw IM API and socket payloads.
//!
//! The backend is loose with numeric and id fields, so ids accept strings or
//! numbers and sequence positions accept integers or floats.

use {
    serde::{Deserialize, Deserializer, Serialize},
    serde_json::Value,
    std::fmt,
};

/// Event type carrying a user-visible message.
pub const MESSAGE_ADD: &str = "message.add";

/// Panel `type` of a plain text channel.
pub const PANEL_TYPE_TEXT: i64 = 0;

/// Kind of conversation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// Direct conversation, addressed by `sessionId`.
    Session,
    /// Group channel, addressed by `panelId`.
    Panel,
}

impl ConversationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Panel => "panel",
        }
    }
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthorInfo {
    #[serde(deserialize_with = "lenient_string")]
    pub user_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub agent_id: Option<String>,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
    #[serde(rename = "type")]
    pub author_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(deserialize_with = "lenient_string")]
    pub message_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub author: Option<String>,
    pub author_info: Option<AuthorInfo>,
    /// Message body; non-strings are JSON-stringified when rendered.
    pub content: Value,
    pub meta: Option<Value>,
    #[serde(deserialize_with = "lenient_string")]
    pub group_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub converse_id: Option<String>,
}

impl EventPayload {
    /// Render `content` as the plain text body of a message.
    pub fn content_text(&self) -> String {
        match &self.content {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Canonical event record, whatever transport delivered it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MochatEvent {
    #[serde(deserialize_with = "lenient_i64")]
    pub seq: Option<i64>,
    pub session_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: Option<String>,
    pub payload: Option<EventPayload>,
}

impl MochatEvent {
    pub fn is_message_add(&self) -> bool {
        self.event_type == MESSAGE_ADD
    }

    pub fn message_id(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.message_id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// One delivery: a batch of events for a conversation plus the server cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchResponse {
    pub session_id: String,
    pub cursor: Option<f64>,
    pub events: Vec<MochatEvent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub workspace_id: Option<String>,
    pub converse_id: Option<String>,
    pub participants: Vec<String>,
    pub visibility: Option<String>,
    pub status: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelInfo {
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(rename = "_id", deserialize_with = "lenient_string")]
    pub object_id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub panel_type: Option<i64>,
}

impl PanelInfo {
    /// Panel id from `id`, else `_id`.
    pub fn resolved_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.object_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Only text panels carry chat messages.
    pub fn is_text(&self) -> bool {
        self.panel_type.is_none_or(|t| t == PANEL_TYPE_TEXT)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupInfo {
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(rename = "_id", deserialize_with = "lenient_string")]
    pub object_id: Option<String>,
    pub panels: Vec<PanelInfo>,
}

/// Ack payload of `com.claw.im.subscribe*` calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribeAck {
    pub result: bool,
    pub data: Option<Value>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    Agent,
    User,
}

/// Participant reference for session create / membership calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(rename = "type")]
    pub kind: ParticipantKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Participant {
    /// Parse `agent:<id>` / `user:<id>`; a bare id is taken as a user.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (kind, id) = match raw.split_once(':') {
            Some(("agent", id)) => (ParticipantKind::Agent, id),
            Some(("user", id)) => (ParticipantKind::User, id),
            _ => (ParticipantKind::User, raw),
        };
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        Some(Self {
            kind,
            id: Some(id.to_string()),
            unique_name: None,
            name: None,
            avatar: None,
            metadata: None,
        })
    }
}

// ── Lenient field parsers ───────────────────────────────────────────────────

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(Value::deserialize(d)?.as_f64().and_then(floor_i64))
}

/// Floor a finite float into an `i64`.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn floor_i64(value: f64) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    Some(value.floor() as i64)
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn event_accepts_loose_shapes() {
        let event: MochatEvent = serde_json::from_value(json!({
            "seq": 12.0,
            "sessionId": "s1",
            "type": "message.add",
            "payload": {
                "messageId": 991,
                "author": "u1",
                "authorInfo": {"nickname": "Ann", "agentId": null},
                "content": {"text": "hi"}
            }
        }))
        .unwrap();
        assert_eq!(event.seq, Some(12));
        assert!(event.is_message_add());
        assert_eq!(event.message_id(), Some("991"));
        let payload = event.payload.unwrap();
        assert_eq!(payload.content_text(), r#"{"text":"hi"}"#);
        assert_eq!(payload.author_info.unwrap().nickname.as_deref(), Some("Ann"));
    }

    #[test]
    fn event_without_seq() {
        let event: MochatEvent =
            serde_json::from_value(json!({"sessionId": "s1", "type": "typing"})).unwrap();
        assert_eq!(event.seq, None);
        assert!(!event.is_message_add());
        assert_eq!(event.message_id(), None);
    }

    #[test]
    fn panel_id_and_text_filter() {
        let group: GroupInfo = serde_json::from_value(json!({
            "_id": "g1",
            "panels": [
                {"_id": "p1", "type": 0},
                {"id": "p2"},
                {"id": "p3", "type": 2},
                {"name": "nameless"}
            ]
        }))
        .unwrap();
        let text_ids: Vec<_> = group
            .panels
            .iter()
            .filter(|p| p.is_text())
            .filter_map(PanelInfo::resolved_id)
            .collect();
        assert_eq!(text_ids, vec!["p1", "p2"]);
    }

    #[test]
    fn participant_parsing() {
        let agent = Participant::parse("agent:bot-1").unwrap();
        assert_eq!(agent.kind, ParticipantKind::Agent);
        assert_eq!(agent.id.as_deref(), Some("bot-1"));
        let user = Participant::parse("u42").unwrap();
        assert_eq!(user.kind, ParticipantKind::User);
        assert!(Participant::parse("agent:").is_none());
        assert_eq!(
            serde_json::to_value(&agent).unwrap(),
            json!({"type": "agent", "id": "bot-1"})
        );
    }

    #[test]
    fn floor_rejects_non_finite() {
        assert_eq!(floor_i64(4.9), Some(4));
        assert_eq!(floor_i64(f64::NAN), None);
        assert_eq!(floor_i64(f64::INFINITY), None);
    }
}
