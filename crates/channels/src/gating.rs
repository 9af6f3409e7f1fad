use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::collections::HashMap,
};

/// Key of the rule that applies to every group without an id-specific rule.
pub const WILDCARD_RULE: &str = "*";

/// How group messages that do not mention the agent are handled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReplyDelayMode {
    /// Every accepted message is dispatched on its own.
    #[default]
    Off,
    /// Non-mention panel messages are buffered and flushed as one batch,
    /// either by a timer or by the next mention.
    NonMention,
}

/// Per-group override.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupRule {
    pub require_mention: Option<bool>,
}

/// Mention requirement for group conversations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MentionPolicy {
    /// Global default when no rule matches.
    pub require_in_groups: bool,
    /// Rules keyed by panel id, workspace group id, or [`WILDCARD_RULE`].
    pub rules: HashMap<String, GroupRule>,
}

impl MentionPolicy {
    /// Resolve whether a group conversation requires an explicit mention.
    ///
    /// Lookup order: the workspace group id, then the conversation's own id,
    /// then the wildcard rule, then the global default. A rule without a
    /// `requireMention` value falls through to the next layer.
    pub fn require_mention(&self, conversation_id: &str, group_id: Option<&str>) -> bool {
        let ids = [group_id, Some(conversation_id), Some(WILDCARD_RULE)];
        ids.into_iter()
            .flatten()
            .filter(|id| !id.is_empty())
            .find_map(|id| self.rules.get(id).and_then(|rule| rule.require_mention))
            .unwrap_or(self.require_in_groups)
    }
}

/// Outcome of gating one inbound group or direct message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Drop: mention required but absent, and no delayed batching.
    Drop,
    /// Dispatch the message on its own.
    Dispatch,
    /// Hand the message to the delay buffer.
    Buffer { flush_now: bool },
}

/// Combine the resolved policy with the mention check.
///
/// Direct conversations never require a mention. With delayed batching a
/// mention flushes the buffer immediately and anything else waits.
pub fn gate(
    is_group: bool,
    require_mention: bool,
    was_mentioned: bool,
    use_delay: bool,
) -> GateDecision {
    let require_mention = is_group && require_mention;
    if use_delay {
        return GateDecision::Buffer {
            flush_now: was_mentioned,
        };
    }
    if require_mention && !was_mentioned {
        return GateDecision::Drop;
    }
    GateDecision::Dispatch
}

/// Detect whether a message mentions `agent_user_id`.
///
/// Checks explicit boolean hints in `meta`, then the id lists the backend may
/// attach, then `<@id>` / `@id` in plain-text content.
pub fn was_mentioned(meta: Option<&Value>, content: &Value, agent_user_id: &str) -> bool {
    if let Some(meta) = meta.and_then(Value::as_object) {
        let flagged = ["mentioned", "wasMentioned"]
            .iter()
            .any(|key| meta.get(*key).and_then(Value::as_bool) == Some(true));
        if flagged {
            return true;
        }

        if !agent_user_id.is_empty() {
            let listed = [
                "mentions",
                "mentionIds",
                "mentionedUserIds",
                "mentionedUsers",
            ]
            .iter()
            .filter_map(|key| meta.get(*key))
            .any(|source| extract_mention_ids(source).iter().any(|id| id == agent_user_id));
            if listed {
                return true;
            }
        }
    }

    if agent_user_id.is_empty() {
        return false;
    }
    let Some(text) = content.as_str().filter(|t| !t.is_empty()) else {
        return false;
    };
    text.contains(&format!("<@{agent_user_id}>")) || text.contains(&format!("@{agent_user_id}"))
}

/// Collect ids from a mention list whose entries are strings or objects
/// carrying `id`, `userId`, or `_id`.
pub fn extract_mention_ids(value: &Value) -> Vec<String> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string),
            Value::Object(obj) => ["id", "userId", "_id"]
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_str))
                .map(str::to_string),
            _ => None,
        })
        .collect()
}
