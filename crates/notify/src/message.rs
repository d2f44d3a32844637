//! Chat message type delivered by every channel.

use serde::{Deserialize, Serialize};

/// A plain-text chat message with optional mentions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Text body shown in the chat.
    pub content: String,
    /// User ids to mention (`@all` is accepted by most webhooks).
    #[serde(default)]
    pub mentioned: Vec<String>,
}

impl Message {
    /// Create a message without mentions.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            mentioned: Vec::new(),
        }
    }

    /// Attach a mention list.
    #[must_use]
    pub fn with_mentions(mut self, mentioned: Vec<String>) -> Self {
        self.mentioned = mentioned;
        self
    }
}
