//! Typed client for the backend's `/api/claw/*` POST endpoints.

use std::time::Duration;

use {
    reqwest::{Client, header::CONTENT_TYPE},
    secrecy::{ExposeSecret, Secret},
    serde_json::{Map, Value, json},
    tracing::debug,
    url::Url,
};

use crate::{
    config::MochatAccount,
    error::{Error, Result},
    normalize::parse_delivery,
    types::{GroupInfo, Participant, SessionListResponse, WatchResponse, floor_i64},
};

const TOKEN_HEADER: &str = "X-Claw-Token";

/// Extra HTTP time granted to a long-poll beyond its server-side timeout.
pub const WATCH_HTTP_GRACE: Duration = Duration::from_secs(10);

/// Client for one account's backend.
#[derive(Clone)]
pub struct MochatApi {
    http: Client,
    base_url: Url,
    token: Secret<String>,
}

impl std::fmt::Debug for MochatApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MochatApi")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl MochatApi {
    pub fn new(base_url: &str, token: Secret<String>) -> Result<Self> {
        Self::with_client(Client::new(), base_url, token)
    }

    pub fn with_client(http: Client, base_url: &str, token: Secret<String>) -> Result<Self> {
        let trimmed = base_url.trim();
        let normalized = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| Error::config(format!("invalid baseUrl {trimmed:?}: {e}")))?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn for_account(account: &MochatAccount) -> Result<Self> {
        Self::new(&account.base_url, account.claw_token.clone())
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let absolute = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        self.base_url
            .join(&absolute)
            .map_err(|e| Error::config(format!("invalid endpoint {path:?}: {e}")))
    }

    /// POST `body` to `path` and unwrap the response envelope.
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.post_with_timeout(path, body, None).await
    }

    async fn post_with_timeout(
        &self,
        path: &str,
        body: &Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let url = self.endpoint(path)?;
        debug!(%url, "claw api request");
        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(TOKEN_HEADER, self.token.expose_secret())
            .body(serde_json::to_vec(body)?);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let body = if text.is_empty() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                text
            };
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        match serde_json::from_str::<Value>(&text) {
            Ok(parsed) => unwrap_envelope(parsed),
            Err(_) => Ok(Value::String(text)),
        }
    }

    // ── Messaging ───────────────────────────────────────────────────────────

    pub async fn send_session(
        &self,
        session_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<Value> {
        let mut body = object(json!({ "sessionId": session_id, "content": content }));
        insert_str(&mut body, "replyTo", reply_to);
        self.post("/api/claw/sessions/send", &Value::Object(body))
            .await
    }

    pub async fn send_panel(
        &self,
        panel_id: &str,
        content: &str,
        reply_to: Option<&str>,
        group_id: Option<&str>,
    ) -> Result<Value> {
        let mut body = object(json!({ "panelId": panel_id, "content": content }));
        insert_str(&mut body, "replyTo", reply_to);
        insert_str(&mut body, "groupId", group_id);
        self.post("/api/claw/groups/panels/send", &Value::Object(body))
            .await
    }

    // ── Discovery ───────────────────────────────────────────────────────────

    pub async fn list_sessions(
        &self,
        updated_after: Option<&str>,
        limit: Option<u32>,
    ) -> Result<SessionListResponse> {
        let mut body = Map::new();
        insert_str(&mut body, "updatedAfter", updated_after);
        if let Some(limit) = limit {
            body.insert("limit".into(), limit.into());
        }
        let value = self
            .post("/api/claw/sessions/list", &Value::Object(body))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// The workspace group, or `group_id` when given.
    pub async fn get_group(&self, group_id: Option<&str>) -> Result<GroupInfo> {
        let mut body = Map::new();
        insert_str(&mut body, "groupId", group_id);
        let value = self
            .post("/api/claw/groups/get", &Value::Object(body))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Long-poll a session for events after `cursor`.
    pub async fn watch(
        &self,
        session_id: &str,
        cursor: i64,
        timeout: Duration,
        limit: u32,
    ) -> Result<WatchResponse> {
        let body = json!({
            "sessionId": session_id,
            "cursor": cursor,
            "timeoutMs": u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "limit": limit,
        });
        let value = self
            .post_with_timeout(
                "/api/claw/sessions/watch",
                &body,
                Some(timeout + WATCH_HTTP_GRACE),
            )
            .await?;
        Ok(parse_delivery(&value, Some(session_id)))
    }

    // ── Session management ──────────────────────────────────────────────────

    pub async fn get_session(&self, session_id: &str) -> Result<Value> {
        self.post("/api/claw/sessions/get", &json!({ "sessionId": session_id }))
            .await
    }

    pub async fn session_detail(&self, session_id: &str) -> Result<Value> {
        self.post(
            "/api/claw/sessions/detail",
            &json!({ "sessionId": session_id }),
        )
        .await
    }

    pub async fn session_messages(
        &self,
        session_id: &str,
        before_message_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Value> {
        let mut body = object(json!({ "sessionId": session_id }));
        insert_str(&mut body, "beforeMessageId", before_message_id);
        if let Some(limit) = limit {
            body.insert("limit".into(), limit.into());
        }
        self.post("/api/claw/sessions/messages", &Value::Object(body))
            .await
    }

    pub async fn create_session(
        &self,
        participants: &[Participant],
        visibility: Option<&str>,
        metadata: Option<Value>,
    ) -> Result<Value> {
        let mut body = object(json!({ "participants": participants }));
        insert_str(&mut body, "visibility", visibility);
        if let Some(metadata) = metadata {
            body.insert("metadata".into(), metadata);
        }
        self.post("/api/claw/sessions/create", &Value::Object(body))
            .await
    }

    pub async fn add_participants(
        &self,
        session_id: &str,
        participants: &[Participant],
    ) -> Result<Value> {
        self.post(
            "/api/claw/sessions/addParticipants",
            &json!({ "sessionId": session_id, "participants": participants }),
        )
        .await
    }

    pub async fn remove_participants(
        &self,
        session_id: &str,
        participants: &[Participant],
    ) -> Result<Value> {
        self.post(
            "/api/claw/sessions/removeParticipants",
            &json!({ "sessionId": session_id, "participants": participants }),
        )
        .await
    }

    pub async fn close_session(&self, session_id: &str, policy: Option<&str>) -> Result<Value> {
        let mut body = object(json!({ "sessionId": session_id }));
        insert_str(&mut body, "policy", policy);
        self.post("/api/claw/sessions/close", &Value::Object(body))
            .await
    }

    pub async fn panel_messages(
        &self,
        panel_id: &str,
        group_id: Option<&str>,
        before_message_id: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Value> {
        let mut body = object(json!({ "panelId": panel_id }));
        insert_str(&mut body, "groupId", group_id);
        insert_str(&mut body, "beforeMessageId", before_message_id);
        if let Some(limit) = limit {
            body.insert("limit".into(), limit.into());
        }
        self.post("/api/claw/groups/panels/messages", &Value::Object(body))
            .await
    }
}

/// Unwrap a `{code, data, message, name}` envelope. Values without a
/// numeric `code` pass through untouched.
pub fn unwrap_envelope(value: Value) -> Result<Value> {
    let Some(code) = value
        .as_object()
        .and_then(|obj| obj.get("code"))
        .and_then(Value::as_f64)
        .and_then(floor_i64)
    else {
        return Ok(value);
    };
    if code != 200 {
        let message = ["message", "name"]
            .iter()
            .filter_map(|key| value.get(*key).and_then(Value::as_str))
            .find(|s| !s.is_empty())
            .unwrap_or("Claw IM request failed")
            .to_string();
        return Err(Error::Api { code, message });
    }
    match value {
        Value::Object(mut obj) => Ok(match obj.remove("data") {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(data) => data,
        }),
        other => Ok(other),
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Insert `value` under `key` when it is present and non-empty.
fn insert_str(body: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        body.insert(key.to_string(), Value::String(value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher, rstest::rstest};

    fn client(server: &mockito::Server) -> MochatApi {
        MochatApi::new(&server.url(), Secret::new("tok".into())).unwrap()
    }

    #[rstest]
    #[case(json!({"code": 200, "data": {"ok": true}}), json!({"ok": true}))]
    #[case(json!({"code": 200}), json!({}))]
    #[case(json!({"code": 200, "data": null}), json!({}))]
    #[case(json!({"sessions": []}), json!({"sessions": []}))]
    #[case(json!({"code": "200", "x": 1}), json!({"code": "200", "x": 1}))]
    #[case(json!([1, 2]), json!([1, 2]))]
    fn envelope_passthrough_and_unwrap(#[case] input: Value, #[case] expected: Value) {
        assert_eq!(unwrap_envelope(input).unwrap(), expected);
    }

    #[rstest]
    #[case(json!({"code": 401, "message": "token expired"}), "token expired (code=401)")]
    #[case(json!({"code": 500, "message": "", "name": "ServerError"}), "ServerError (code=500)")]
    #[case(json!({"code": 404}), "Claw IM request failed (code=404)")]
    fn envelope_errors(#[case] input: Value, #[case] expected: &str) {
        assert_eq!(unwrap_envelope(input).unwrap_err().to_string(), expected);
    }

    #[tokio::test]
    async fn send_session_posts_with_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/claw/sessions/send")
            .match_header("x-claw-token", "tok")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({
                "sessionId": "s1",
                "content": "hello",
                "replyTo": "m1"
            })))
            .with_status(200)
            .with_body(json!({"code": 200, "data": {"sessionId": "s1"}}).to_string())
            .create_async()
            .await;

        let result = client(&server)
            .send_session("s1", "hello", Some("m1"))
            .await
            .unwrap();
        assert_eq!(result["sessionId"], "s1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn send_panel_omits_absent_fields() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/claw/groups/panels/send")
            .match_body(Matcher::Json(json!({"panelId": "p1", "content": "hi"})))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        client(&server)
            .send_panel("p1", "hi", None, Some(""))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_failure_carries_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/claw/sessions/get")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let err = client(&server).get_session("s1").await.unwrap_err();
        match err {
            Error::Http { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn envelope_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/claw/sessions/list")
            .with_status(200)
            .with_body(json!({"code": 403, "message": "forbidden"}).to_string())
            .create_async()
            .await;

        let err = client(&server).list_sessions(None, None).await.unwrap_err();
        assert!(matches!(err, Error::Api { code: 403, .. }));
    }

    #[tokio::test]
    async fn non_json_body_is_returned_raw() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/claw/sessions/close")
            .with_status(200)
            .with_body("closed")
            .create_async()
            .await;

        let result = client(&server).close_session("s1", None).await.unwrap();
        assert_eq!(result, Value::String("closed".into()));
    }

    #[tokio::test]
    async fn watch_parses_delivery_with_fallback_session() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/claw/sessions/watch")
            .match_body(Matcher::PartialJson(json!({
                "sessionId": "s1",
                "cursor": 7,
                "timeoutMs": 25000,
                "limit": 100
            })))
            .with_status(200)
            .with_body(
                json!({
                    "code": 200,
                    "data": {
                        "cursor": 9,
                        "events": [
                            {"seq": 8, "type": "message.add", "payload": {"messageId": "m8", "author": "u1", "content": "a"}},
                            {"seq": 9, "type": "message.add", "payload": {"messageId": "m9", "author": "u1", "content": "b"}}
                        ]
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let delivery = client(&server)
            .watch("s1", 7, Duration::from_millis(25_000), 100)
            .await
            .unwrap();
        assert_eq!(delivery.session_id, "s1");
        assert_eq!(delivery.cursor, Some(9.0));
        assert_eq!(delivery.events.len(), 2);
        assert_eq!(delivery.events[0].session_id, "s1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn group_panels_deserialize() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/claw/groups/get")
            .with_status(200)
            .with_body(
                json!({
                    "code": 200,
                    "data": {
                        "_id": "g1",
                        "panels": [
                            {"id": "p1", "name": "general", "type": 0},
                            {"_id": "p2", "name": "docs", "type": 2},
                            {"_id": "p3"}
                        ]
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let group = client(&server).get_group(None).await.unwrap();
        assert_eq!(group.object_id.as_deref(), Some("g1"));
        let text: Vec<&str> = group
            .panels
            .iter()
            .filter(|p| p.is_text())
            .filter_map(|p| p.resolved_id())
            .collect();
        assert_eq!(text, vec!["p1", "p3"]);
    }

    #[test]
    fn base_url_path_is_replaced_by_endpoint() {
        let api = MochatApi::new("https://claw.example/prefix", Secret::new("t".into())).unwrap();
        assert_eq!(
            api.endpoint("/api/claw/sessions/send").unwrap().as_str(),
            "https://claw.example/api/claw/sessions/send"
        );
        assert!(MochatApi::new("not a url", Secret::new("t".into())).is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let api = MochatApi::new("http://localhost:1", Secret::new("hunter2".into())).unwrap();
        assert!(!format!("{api:?}").contains("hunter2"));
    }
}
