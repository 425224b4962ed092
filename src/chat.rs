//! Chat session data model.
//!
//! Message content is a tagged union: plain text, or a list of structured
//! parts for multimodal messages. Embeddable text is extracted through
//! [`MessageContent::extract_text`], which only ever returns text-tagged
//! parts; image payloads never reach the embedder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Image { media_type: String, data: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MessagePart>),
}

impl MessageContent {
    /// Text portions of the message, trimmed. Empty string when the
    /// message carries no text at all (e.g., image-only).
    pub fn extract_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.trim().to_string(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    MessagePart::Text { text } => {
                        let text = text.trim();
                        (!text.is_empty()).then(|| text.to_string())
                    }
                    MessagePart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub role: Role,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn text(message_id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            role,
            content: MessageContent::Text(text.into()),
            timestamp: Utc::now(),
        }
    }
}
