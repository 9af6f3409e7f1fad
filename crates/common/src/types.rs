use serde::{Deserialize, Serialize};

/// Whether an inbound message came from a direct conversation or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
}

impl ChatType {
    #[must_use]
    pub fn is_group(self) -> bool {
        matches!(self, Self::Group)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

/// A media reference attached to an outbound reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Reply produced by a responder for a dispatched inbound batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyPayload {
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaAttachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    /// Suppress delivery entirely (the responder chose not to answer).
    pub silent: bool,
}

impl ReplyPayload {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Text followed by one line per media URL, trimmed.
    ///
    /// Backends without native attachments receive media as plain links.
    #[must_use]
    pub fn flattened_content(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(1 + self.media.len());
        let text = self.text.trim();
        if !text.is_empty() {
            parts.push(text);
        }
        parts.extend(
            self.media
                .iter()
                .map(|m| m.url.trim())
                .filter(|url| !url.is_empty()),
        );
        parts.join("\n").trim().to_string()
    }
}
