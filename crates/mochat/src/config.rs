use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use {
    clawlink_channels::gating::{GroupRule, MentionPolicy, ReplyDelayMode},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
};

use crate::error::{Error, Result};

/// Account id used when the section has no `accounts` map.
pub const DEFAULT_ACCOUNT_ID: &str = "default";

const DEFAULT_BASE_URL: &str = "http://localhost:11000";
const DEFAULT_SOCKET_PATH: &str = "/socket.io";
const DEFAULT_SOCKET_RECONNECT_DELAY_MS: u64 = 1_000;
const DEFAULT_SOCKET_MAX_RECONNECT_DELAY_MS: u64 = 10_000;
const DEFAULT_SOCKET_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REFRESH_INTERVAL_MS: u64 = 30_000;
const MIN_REFRESH_INTERVAL_MS: u64 = 1_000;
const DEFAULT_WATCH_TIMEOUT_MS: u64 = 25_000;
const DEFAULT_WATCH_LIMIT: u32 = 100;
const DEFAULT_RETRY_DELAY_MS: u64 = 200;
const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_REPLY_DELAY_MS: u64 = 120_000;
const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;

/// Wildcard entry in `sessions` / `panels` enabling auto-discovery.
pub const WILDCARD: &str = "*";

/// How events reach the account.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Socket.IO push with cursor resume.
    #[default]
    Socket,
    /// HTTP long-poll per session.
    Poll,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct MentionConfig {
    pub require_in_groups: Option<bool>,
}

/// Raw Mochat account configuration as written in the config file. Every
/// field is optional; [`MochatAccount::resolve`] applies defaults.
#[derive(Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MochatAccountConfig {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub base_url: Option<String>,
    pub claw_token: Option<Secret<String>>,
    pub agent_user_id: Option<String>,
    pub sessions: Option<Vec<String>>,
    pub panels: Option<Vec<String>>,
    pub mention: Option<MentionConfig>,
    pub groups: Option<HashMap<String, GroupRule>>,
    pub socket_url: Option<String>,
    pub socket_path: Option<String>,
    pub socket_reconnect_delay_ms: Option<u64>,
    pub socket_max_reconnect_delay_ms: Option<u64>,
    pub socket_connect_timeout_ms: Option<u64>,
    pub refresh_interval_ms: Option<u64>,
    pub watch_timeout_ms: Option<u64>,
    pub watch_limit: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub max_retry_attempts: Option<u32>,
    pub reply_delay_mode: Option<ReplyDelayMode>,
    pub reply_delay_ms: Option<u64>,
    pub ack_timeout_ms: Option<u64>,
    pub transport: Option<TransportMode>,
}

impl std::fmt::Debug for MochatAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MochatAccountConfig")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("claw_token", &self.claw_token.as_ref().map(|_| "[REDACTED]"))
            .field("agent_user_id", &self.agent_user_id)
            .field("sessions", &self.sessions)
            .field("panels", &self.panels)
            .finish_non_exhaustive()
    }
}

// ── Section layout ──────────────────────────────────────────────────────────

/// Account ids declared in a `channels.mochat` section: the keys of its
/// `accounts` map, or [`DEFAULT_ACCOUNT_ID`].
pub fn account_ids(section: &Value) -> Vec<String> {
    match section.get("accounts").and_then(Value::as_object) {
        Some(accounts) if !accounts.is_empty() => accounts.keys().cloned().collect(),
        _ => vec![DEFAULT_ACCOUNT_ID.to_string()],
    }
}

/// Effective config for one account: top-level fields overlaid with the
/// account's own overrides, field by field.
pub fn account_value(section: &Value, account_id: &str) -> Value {
    let mut merged = section.as_object().cloned().unwrap_or_default();
    merged.remove("accounts");
    if let Some(overrides) = section
        .get("accounts")
        .and_then(|a| a.get(account_id))
        .and_then(Value::as_object)
    {
        for (key, value) in overrides {
            if !value.is_null() {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(merged)
}

/// Trim, drop blanks, dedupe (first occurrence wins), and split out the
/// wildcard.
pub fn normalize_id_list(values: &[String]) -> (Vec<String>, bool) {
    let mut items: Vec<String> = Vec::new();
    let mut wildcard = false;
    for value in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        if value == WILDCARD {
            wildcard = true;
        } else if !items.iter().any(|existing| existing == value) {
            items.push(value.to_string());
        }
    }
    (items, wildcard)
}

// ── Resolved account ────────────────────────────────────────────────────────

/// Fully resolved account settings.
#[derive(Clone)]
pub struct MochatAccount {
    pub account_id: String,
    pub name: Option<String>,
    pub enabled: bool,
    pub base_url: String,
    pub claw_token: Secret<String>,
    pub agent_user_id: String,
    pub sessions: Vec<String>,
    pub panels: Vec<String>,
    pub auto_discover_sessions: bool,
    pub auto_discover_panels: bool,
    pub mention: MentionPolicy,
    pub socket_url: String,
    pub socket_path: String,
    pub socket_reconnect_delay: Duration,
    pub socket_max_reconnect_delay: Duration,
    pub socket_connect_timeout: Duration,
    pub refresh_interval: Duration,
    pub watch_timeout: Duration,
    pub watch_limit: u32,
    pub retry_delay: Duration,
    /// Reconnect attempts before giving up; `0` retries forever.
    pub max_retry_attempts: u32,
    pub reply_delay_mode: ReplyDelayMode,
    pub reply_delay: Duration,
    pub ack_timeout: Duration,
    pub transport: TransportMode,
}

impl std::fmt::Debug for MochatAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MochatAccount")
            .field("account_id", &self.account_id)
            .field("base_url", &self.base_url)
            .field("claw_token", &"[REDACTED]")
            .field("agent_user_id", &self.agent_user_id)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

impl MochatAccount {
    /// Parse and resolve an account from its merged JSON config.
    pub fn from_value(account_id: &str, value: Value) -> Result<Self> {
        let raw: MochatAccountConfig = serde_json::from_value(value)?;
        Ok(Self::resolve(account_id, raw))
    }

    pub fn resolve(account_id: &str, raw: MochatAccountConfig) -> Self {
        let base_url = raw
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_BASE_URL)
            .to_string();
        let socket_url = raw
            .socket_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&base_url)
            .trim_end_matches('/')
            .to_string();
        let (sessions, auto_discover_sessions) =
            normalize_id_list(raw.sessions.as_deref().unwrap_or_default());
        let (panels, auto_discover_panels) =
            normalize_id_list(raw.panels.as_deref().unwrap_or_default());

        let ms = Duration::from_millis;
        Self {
            account_id: account_id.to_string(),
            name: raw.name,
            enabled: raw.enabled.unwrap_or(true),
            claw_token: raw.claw_token.unwrap_or_else(|| Secret::new(String::new())),
            agent_user_id: raw
                .agent_user_id
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            sessions,
            panels,
            auto_discover_sessions,
            auto_discover_panels,
            mention: MentionPolicy {
                require_in_groups: raw
                    .mention
                    .and_then(|m| m.require_in_groups)
                    .unwrap_or(false),
                rules: raw.groups.unwrap_or_default(),
            },
            socket_url,
            socket_path: raw
                .socket_path
                .unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string()),
            socket_reconnect_delay: ms(raw
                .socket_reconnect_delay_ms
                .unwrap_or(DEFAULT_SOCKET_RECONNECT_DELAY_MS)),
            socket_max_reconnect_delay: ms(raw
                .socket_max_reconnect_delay_ms
                .unwrap_or(DEFAULT_SOCKET_MAX_RECONNECT_DELAY_MS)),
            socket_connect_timeout: ms(raw
                .socket_connect_timeout_ms
                .unwrap_or(DEFAULT_SOCKET_CONNECT_TIMEOUT_MS)),
            refresh_interval: ms(raw
                .refresh_interval_ms
                .unwrap_or(DEFAULT_REFRESH_INTERVAL_MS)
                .max(MIN_REFRESH_INTERVAL_MS)),
            watch_timeout: ms(raw.watch_timeout_ms.unwrap_or(DEFAULT_WATCH_TIMEOUT_MS)),
            watch_limit: raw.watch_limit.unwrap_or(DEFAULT_WATCH_LIMIT).max(1),
            retry_delay: ms(raw.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS)),
            max_retry_attempts: raw
                .max_retry_attempts
                .unwrap_or(DEFAULT_MAX_RETRY_ATTEMPTS),
            reply_delay_mode: raw.reply_delay_mode.unwrap_or_default(),
            reply_delay: ms(raw.reply_delay_ms.unwrap_or(DEFAULT_REPLY_DELAY_MS)),
            ack_timeout: ms(raw.ack_timeout_ms.unwrap_or(DEFAULT_ACK_TIMEOUT_MS)),
            transport: raw.transport.unwrap_or_default(),
            base_url,
        }
    }

    /// Names of the settings an enabled account is missing.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.claw_token.expose_secret().trim().is_empty() {
            missing.push("clawToken");
        }
        if self.agent_user_id.is_empty() {
            missing.push("agentUserId");
        }
        if !self.has_targets() {
            missing.push("sessions or panels");
        }
        missing
    }

    pub fn has_targets(&self) -> bool {
        !self.sessions.is_empty()
            || !self.panels.is_empty()
            || self.auto_discover_sessions
            || self.auto_discover_panels
    }

    pub fn is_configured(&self) -> bool {
        self.missing().is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        let missing = self.missing();
        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::config(format!(
            "account {} is missing {}",
            self.account_id,
            missing.join(", ")
        )))
    }

    /// Delayed batching applies to panel conversations only.
    pub fn panel_delay_enabled(&self) -> bool {
        self.reply_delay_mode == ReplyDelayMode::NonMention
    }

    /// Config summary safe to print.
    pub fn redacted_summary(&self) -> Value {
        let rules: BTreeMap<&String, Option<bool>> = self
            .mention
            .rules
            .iter()
            .map(|(id, rule)| (id, rule.require_mention))
            .collect();
        json!({
            "accountId": self.account_id,
            "name": self.name,
            "enabled": self.enabled,
            "configured": self.is_configured(),
            "baseUrl": self.base_url,
            "socketUrl": self.socket_url,
            "socketPath": self.socket_path,
            "transport": self.transport,
            "clawToken": if self.claw_token.expose_secret().is_empty() { "(missing)" } else { "[REDACTED]" },
            "agentUserId": self.agent_user_id,
            "sessions": self.sessions,
            "panels": self.panels,
            "autoDiscoverSessions": self.auto_discover_sessions,
            "autoDiscoverPanels": self.auto_discover_panels,
            "requireMentionInGroups": self.mention.require_in_groups,
            "groups": rules,
            "replyDelayMode": self.reply_delay_mode,
            "replyDelayMs": self.reply_delay.as_millis(),
            "refreshIntervalMs": self.refresh_interval.as_millis(),
            "maxRetryAttempts": self.max_retry_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn defaults() {
        let account = MochatAccount::resolve("default", MochatAccountConfig::default());
        assert!(account.enabled);
        assert_eq!(account.base_url, "http://localhost:11000");
        assert_eq!(account.socket_url, "http://localhost:11000");
        assert_eq!(account.socket_path, "/socket.io");
        assert_eq!(account.socket_reconnect_delay, Duration::from_millis(1000));
        assert_eq!(account.socket_max_reconnect_delay, Duration::from_millis(10_000));
        assert_eq!(account.socket_connect_timeout, Duration::from_millis(10_000));
        assert_eq!(account.refresh_interval, Duration::from_millis(30_000));
        assert_eq!(account.watch_timeout, Duration::from_millis(25_000));
        assert_eq!(account.watch_limit, 100);
        assert_eq!(account.retry_delay, Duration::from_millis(200));
        assert_eq!(account.max_retry_attempts, 3);
        assert_eq!(account.reply_delay_mode, ReplyDelayMode::Off);
        assert_eq!(account.reply_delay, Duration::from_millis(120_000));
        assert_eq!(account.ack_timeout, Duration::from_millis(10_000));
        assert_eq!(account.transport, TransportMode::Socket);
        assert!(!account.mention.require_in_groups);
        assert!(!account.is_configured());
        assert_eq!(account.missing(), vec![
            "clawToken",
            "agentUserId",
            "sessions or panels"
        ]);
    }

    #[test]
    fn parses_camel_case_keys() {
        let account = MochatAccount::from_value(
            "ops",
            json!({
                "baseUrl": "https://claw.example/",
                "socketUrl": "https://push.example/",
                "clawToken": "tok",
                "agentUserId": " bot ",
                "sessions": ["s1", " s1 ", "", "*"],
                "panels": ["p1"],
                "mention": {"requireInGroups": true},
                "groups": {"p1": {"requireMention": false}},
                "refreshIntervalMs": 10,
                "replyDelayMode": "non-mention",
                "transport": "poll",
                "ackTimeoutMs": 2500
            }),
        )
        .unwrap();
        assert_eq!(account.account_id, "ops");
        assert_eq!(account.socket_url, "https://push.example");
        assert_eq!(account.agent_user_id, "bot");
        assert_eq!(account.sessions, vec!["s1"]);
        assert!(account.auto_discover_sessions);
        assert!(!account.auto_discover_panels);
        assert!(account.mention.require_in_groups);
        assert!(!account.mention.require_mention("p1", None));
        assert_eq!(account.refresh_interval, Duration::from_millis(1000));
        assert!(account.panel_delay_enabled());
        assert_eq!(account.transport, TransportMode::Poll);
        assert_eq!(account.ack_timeout, Duration::from_millis(2500));
        assert!(account.is_configured());
        assert!(account.validate().is_ok());
    }

    #[test]
    fn bad_enum_value_is_an_error() {
        let err = MochatAccount::from_value("a", json!({"transport": "carrier-pigeon"}));
        assert!(matches!(err, Err(Error::Json(_))));
    }

    #[test]
    fn validate_names_missing_pieces() {
        let account = MochatAccount::from_value("ops", json!({"clawToken": "tok"})).unwrap();
        let err = account.validate().unwrap_err().to_string();
        assert!(err.contains("account ops is missing agentUserId, sessions or panels"));
    }

    #[test]
    fn debug_and_summary_redact_token() {
        let account =
            MochatAccount::from_value("a", json!({"clawToken": "super-secret"})).unwrap();
        assert!(!format!("{account:?}").contains("super-secret"));
        let raw: MochatAccountConfig =
            serde_json::from_value(json!({"clawToken": "super-secret"})).unwrap();
        assert!(!format!("{raw:?}").contains("super-secret"));
        let summary = account.redacted_summary().to_string();
        assert!(!summary.contains("super-secret"));
        assert!(summary.contains("[REDACTED]"));
    }

    #[rstest]
    #[case(json!({}), vec!["default"])]
    #[case(json!({"accounts": {}}), vec!["default"])]
    #[case(json!({"accounts": {"b": {}, "a": {}}}), vec!["a", "b"])]
    fn account_id_listing(#[case] section: Value, #[case] expected: Vec<&str>) {
        assert_eq!(account_ids(&section), expected);
    }

    #[test]
    fn account_overrides_inherit_top_level() {
        let section = json!({
            "baseUrl": "https://claw.example",
            "clawToken": "shared",
            "sessions": ["*"],
            "accounts": {
                "ops": {"clawToken": "ops-token", "agentUserId": "ops-bot"},
                "sales": {"sessions": ["s9"], "baseUrl": null}
            }
        });
        let ops = account_value(&section, "ops");
        assert_eq!(ops["clawToken"], "ops-token");
        assert_eq!(ops["baseUrl"], "https://claw.example");
        assert_eq!(ops["sessions"], json!(["*"]));
        assert!(ops.get("accounts").is_none());

        let sales = account_value(&section, "sales");
        assert_eq!(sales["clawToken"], "shared");
        assert_eq!(sales["sessions"], json!(["s9"]));
        assert_eq!(sales["baseUrl"], "https://claw.example");

        let unknown = account_value(&section, "nope");
        assert_eq!(unknown["clawToken"], "shared");
    }

    #[rstest]
    #[case(&[], &[], false)]
    #[case(&["*"], &[], true)]
    #[case(&[" a ", "b", "a", " "], &["a", "b"], false)]
    fn id_list_normalization(
        #[case] input: &[&str],
        #[case] items: &[&str],
        #[case] wildcard: bool,
    ) {
        let input: Vec<String> = input.iter().map(|s| (*s).to_string()).collect();
        let (normalized, has_wildcard) = normalize_id_list(&input);
        assert_eq!(normalized, items);
        assert_eq!(has_wildcard, wildcard);
    }
}
