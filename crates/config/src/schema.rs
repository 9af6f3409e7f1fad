//! Root config schema.
//!
//! Channel sections are kept as raw JSON here; each channel crate owns the
//! typed view of its own section.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClawlinkConfig {
    /// Directory for cursor files and event logs. Defaults to the user data dir.
    pub state_dir: Option<PathBuf>,
    pub responder: ResponderConfig,
    pub channels: ChannelsConfig,
}

/// How inbound batches are answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Shell command receiving the inbound context as JSON on stdin.
    /// When unset, inbound messages are logged and left unanswered.
    pub command: Option<String>,
    /// Upper bound on a single responder invocation.
    pub timeout_secs: u64,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Mochat (Claw IM) section: top-level defaults plus an optional
    /// `accounts` map of per-account overrides.
    pub mochat: Option<serde_json::Value>,
}
