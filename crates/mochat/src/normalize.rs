//! Turns the backend's event shapes into [`MochatEvent`] / [`WatchResponse`].

use {
    serde_json::{Value, json},
    tracing::warn,
};

use crate::types::{AuthorInfo, EventPayload, MESSAGE_ADD, MochatEvent, WatchResponse};

/// Socket event carrying new direct-message notifications.
pub const INBOX_APPEND_EVENT: &str = "notify:chat.inbox.append";

/// Prefix of socket events carrying panel messages.
pub const PANEL_MESSAGE_PREFIX: &str = "notify:chat.message.";

/// Parse one delivery (`{sessionId, cursor, events}`).
///
/// Events that fail to parse are logged and skipped; the rest of the
/// delivery is kept. Events without their own `sessionId` inherit the
/// delivery's.
pub fn parse_delivery(value: &Value, fallback_session: Option<&str>) -> WatchResponse {
    let session_id = value
        .get("sessionId")
        .and_then(id_string)
        .or_else(|| fallback_session.map(str::to_string))
        .unwrap_or_default();
    let cursor = value.get("cursor").and_then(Value::as_f64);

    let events = value
        .get("events")
        .and_then(Value::as_array)
        .map(|raw| {
            raw.iter()
                .filter_map(|event| match serde_json::from_value::<MochatEvent>(event.clone()) {
                    Ok(mut parsed) => {
                        if parsed.session_id.is_empty() {
                            parsed.session_id.clone_from(&session_id);
                        }
                        Some(parsed)
                    },
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "dropping malformed event");
                        None
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    WatchResponse {
        session_id,
        cursor,
        events,
    }
}

/// Normalize a subscribe ack's `data` into a list of deliveries. Accepts an
/// array, `{sessions: [...]}`, or a single delivery.
pub fn normalize_ack_sessions(data: &Value) -> Vec<WatchResponse> {
    match data {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(|v| parse_delivery(v, None)).collect(),
        Value::Object(obj) => match obj.get("sessions").and_then(Value::as_array) {
            Some(items) => items.iter().map(|v| parse_delivery(v, None)).collect(),
            None => vec![parse_delivery(data, None)],
        },
        _ => Vec::new(),
    }
}

/// Kinds of `notify:*` socket events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    InboxAppend,
    PanelMessage,
    Other,
}

/// Classify a socket event name. Returns `None` for non-notify events.
pub fn classify(event_name: &str) -> Option<NotifyKind> {
    if !event_name.starts_with("notify:") {
        return None;
    }
    Some(if event_name == INBOX_APPEND_EVENT {
        NotifyKind::InboxAppend
    } else if event_name.starts_with(PANEL_MESSAGE_PREFIX) {
        NotifyKind::PanelMessage
    } else {
        NotifyKind::Other
    })
}

// ── Inbox append ────────────────────────────────────────────────────────────

/// Direct message announced by an inbox append, before its converse id is
/// resolved to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxMessage {
    pub converse_id: String,
    pub message_id: Option<String>,
    pub author: String,
    pub content: String,
    pub created_at: Option<String>,
}

/// Why an inbox append was not turned into a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxSkip {
    /// Not a `message` notification.
    NotMessage,
    MissingDetail,
    MissingConverse,
    MissingAuthor { converse_id: String },
    /// Group traffic; it arrives through panel events instead.
    Group {
        converse_id: String,
        group_id: String,
    },
}

pub fn parse_inbox_append(payload: &Value) -> Result<InboxMessage, InboxSkip> {
    if payload.get("type").and_then(Value::as_str) != Some("message") {
        return Err(InboxSkip::NotMessage);
    }
    let Some(detail) = payload.get("payload").filter(|d| d.is_object()) else {
        return Err(InboxSkip::MissingDetail);
    };

    let converse_id = trimmed_str(detail, "converseId").ok_or(InboxSkip::MissingConverse)?;
    if let Some(group_id) = trimmed_str(detail, "groupId") {
        return Err(InboxSkip::Group {
            converse_id,
            group_id,
        });
    }
    let author = trimmed_str(detail, "messageAuthor").ok_or_else(|| InboxSkip::MissingAuthor {
        converse_id: converse_id.clone(),
    })?;

    let message_id = trimmed_str(detail, "messageId").or_else(|| trimmed_str(payload, "_id"));
    let content = detail
        .get("messagePlainContent")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| detail.get("messageSnippet").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    Ok(InboxMessage {
        converse_id,
        message_id,
        author,
        content,
        created_at: payload
            .get("createdAt")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

impl InboxMessage {
    /// Synthesize a `message.add` event for the resolved session.
    pub fn into_event(self, session_id: &str, event_name: &str) -> MochatEvent {
        MochatEvent {
            seq: Some(0),
            session_id: session_id.to_string(),
            event_type: MESSAGE_ADD.to_string(),
            timestamp: Some(self.created_at.unwrap_or_else(now_rfc3339)),
            payload: Some(EventPayload {
                message_id: self.message_id,
                author: Some(self.author),
                author_info: None,
                content: Value::String(self.content),
                meta: Some(json!({
                    "sourceEvent": event_name,
                    "sourceType": "inbox-append",
                    "converseId": self.converse_id,
                })),
                group_id: None,
                converse_id: Some(self.converse_id),
            }),
        }
    }
}

// ── Panel messages ──────────────────────────────────────────────────────────

/// Build a panel `message.add` event from a `notify:chat.message.*` payload.
/// The panel id is the payload's `converseId`. Returns `None` unless both
/// `groupId` and `converseId` are present.
pub fn parse_panel_message(payload: &Value) -> Option<MochatEvent> {
    let group_id = payload.get("groupId").and_then(id_string)?;
    let panel_id = payload.get("converseId").and_then(id_string)?;

    let message_id = payload
        .get("_id")
        .and_then(id_string)
        .or_else(|| payload.get("messageId").and_then(id_string));
    let author_info = payload
        .get("authorInfo")
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value::<AuthorInfo>(v.clone()).ok());

    Some(MochatEvent {
        seq: Some(0),
        session_id: panel_id.clone(),
        event_type: MESSAGE_ADD.to_string(),
        timestamp: Some(
            payload
                .get("createdAt")
                .and_then(Value::as_str)
                .map_or_else(now_rfc3339, str::to_string),
        ),
        payload: Some(EventPayload {
            message_id,
            author: payload.get("author").and_then(id_string),
            author_info,
            content: payload.get("content").cloned().unwrap_or(Value::Null),
            meta: Some(payload.get("meta").cloned().unwrap_or_else(|| json!({}))),
            group_id: Some(group_id),
            converse_id: Some(panel_id),
        }),
    })
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn trimmed_str(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn delivery_skips_malformed_events() {
        let delivery = parse_delivery(
            &json!({
                "sessionId": "s1",
                "cursor": 10,
                "events": [
                    {"seq": 10, "type": "message.add", "payload": {"messageId": "m1"}},
                    {"seq": 11, "type": 42},
                    "garbage",
                    {"seq": "eleven", "type": "typing"}
                ]
            }),
            None,
        );
        assert_eq!(delivery.session_id, "s1");
        assert_eq!(delivery.cursor, Some(10.0));
        assert_eq!(delivery.events.len(), 2);
        assert_eq!(delivery.events[0].session_id, "s1");
    }

    #[test]
    fn delivery_uses_fallback_session() {
        let delivery = parse_delivery(&json!({"events": []}), Some("s9"));
        assert_eq!(delivery.session_id, "s9");
        assert_eq!(delivery.cursor, None);
    }

    #[test]
    fn ack_data_shapes() {
        let one = json!({"sessionId": "a", "cursor": 1, "events": []});
        assert_eq!(normalize_ack_sessions(&one).len(), 1);
        assert_eq!(normalize_ack_sessions(&json!([one, one])).len(), 2);
        assert_eq!(
            normalize_ack_sessions(&json!({"sessions": [one, one, one]})).len(),
            3
        );
        assert!(normalize_ack_sessions(&Value::Null).is_empty());
    }

    #[rstest]
    #[case("notify:chat.inbox.append", Some(NotifyKind::InboxAppend))]
    #[case("notify:chat.message.add", Some(NotifyKind::PanelMessage))]
    #[case("notify:chat.message.update", Some(NotifyKind::PanelMessage))]
    #[case("notify:group.updated", Some(NotifyKind::Other))]
    #[case("claw.session.events", None)]
    fn classify_names(#[case] name: &str, #[case] expected: Option<NotifyKind>) {
        assert_eq!(classify(name), expected);
    }

    #[test]
    fn inbox_append_becomes_synthetic_event() {
        let payload = json!({
            "_id": "inbox-1",
            "type": "message",
            "createdAt": "2026-01-02T03:04:05.000Z",
            "payload": {
                "converseId": " c1 ",
                "messageAuthor": "u1",
                "messageSnippet": "snip",
                "messagePlainContent": "  "
            }
        });
        let message = parse_inbox_append(&payload).unwrap();
        assert_eq!(message.content, "snip");
        assert_eq!(message.message_id.as_deref(), Some("inbox-1"));

        let event = message.into_event("s1", INBOX_APPEND_EVENT);
        assert_eq!(event.seq, Some(0));
        assert_eq!(event.session_id, "s1");
        assert!(event.is_message_add());
        assert_eq!(event.timestamp.as_deref(), Some("2026-01-02T03:04:05.000Z"));
        let payload = event.payload.unwrap();
        assert_eq!(payload.converse_id.as_deref(), Some("c1"));
        assert_eq!(payload.meta.unwrap()["sourceType"], "inbox-append");
    }

    #[test]
    fn inbox_append_prefers_plain_content_and_message_id() {
        let payload = json!({
            "_id": "inbox-1",
            "type": "message",
            "payload": {
                "converseId": "c1",
                "messageId": "m7",
                "messageAuthor": "u1",
                "messageSnippet": "snip",
                "messagePlainContent": "full text"
            }
        });
        let message = parse_inbox_append(&payload).unwrap();
        assert_eq!(message.content, "full text");
        assert_eq!(message.message_id.as_deref(), Some("m7"));
    }

    #[rstest]
    #[case(json!({"type": "mention"}), InboxSkip::NotMessage)]
    #[case(json!({"type": "message"}), InboxSkip::MissingDetail)]
    #[case(json!({"type": "message", "payload": {}}), InboxSkip::MissingConverse)]
    #[case(
        json!({"type": "message", "payload": {"converseId": "c1", "groupId": "g1"}}),
        InboxSkip::Group { converse_id: "c1".into(), group_id: "g1".into() }
    )]
    #[case(
        json!({"type": "message", "payload": {"converseId": "c1"}}),
        InboxSkip::MissingAuthor { converse_id: "c1".into() }
    )]
    fn inbox_append_skips(#[case] payload: Value, #[case] expected: InboxSkip) {
        assert_eq!(parse_inbox_append(&payload), Err(expected));
    }

    #[test]
    fn panel_message_requires_group_and_converse() {
        assert!(parse_panel_message(&json!({"converseId": "p1"})).is_none());
        assert!(parse_panel_message(&json!({"groupId": "g1"})).is_none());

        let event = parse_panel_message(&json!({
            "_id": "m1",
            "groupId": "g1",
            "converseId": "p1",
            "author": "u1",
            "authorInfo": {"nickname": "Ann"},
            "content": "hello",
            "meta": {"mentioned": true}
        }))
        .unwrap();
        assert_eq!(event.session_id, "p1");
        assert_eq!(event.message_id(), Some("m1"));
        let payload = event.payload.unwrap();
        assert_eq!(payload.group_id.as_deref(), Some("g1"));
        assert_eq!(payload.author.as_deref(), Some("u1"));
        assert_eq!(
            payload.author_info.unwrap().nickname.as_deref(),
            Some("Ann")
        );
        assert_eq!(payload.meta.unwrap()["mentioned"], true);
    }
}
