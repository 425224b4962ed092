//! Embedded document types for the two per-user collections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which analysis field a content document was embedded from. Kept on the
/// document so search can tell *why* a result matched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentField {
    PageDescription,
    Title,
    MetaDescription,
    ScreenshotDescription,
}

impl ContentField {
    pub const ALL: [ContentField; 4] = [
        ContentField::PageDescription,
        ContentField::Title,
        ContentField::MetaDescription,
        ContentField::ScreenshotDescription,
    ];

    /// Stable suffix used in document ids.
    pub fn key(&self) -> &'static str {
        match self {
            ContentField::PageDescription => "page_description",
            ContentField::Title => "title",
            ContentField::MetaDescription => "meta_description",
            ContentField::ScreenshotDescription => "screenshot_description",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatField {
    UserMessage,
    AssistantMessage,
    SessionSummary,
}

/// One embedded unit of page content, id `{analysis_id}:{field}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    pub analysis_id: String,
    pub user_id: String,
    pub url: String,
    pub content_type: ContentField,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub vector: Vec<f32>,
}

/// One embedded unit of chat history: a message (`{session_id}:{message_id}`)
/// or the per-session summary (`{session_id}:summary`, at most one alive).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexedChatDocument {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub content_type: ChatField,
    pub content: String,
    pub message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub vector: Vec<f32>,
}

/// Record shape shared by both collections.
pub trait VectorRecord: Clone + Send + Sync {
    fn id(&self) -> &str;
    fn vector(&self) -> &[f32];
}

impl VectorRecord for IndexedDocument {
    fn id(&self) -> &str {
        &self.id
    }

    fn vector(&self) -> &[f32] {
        &self.vector
    }
}

impl VectorRecord for IndexedChatDocument {
    fn id(&self) -> &str {
        &self.id
    }

    fn vector(&self) -> &[f32] {
        &self.vector
    }
}

pub fn content_doc_id(analysis_id: &str, field: ContentField) -> String {
    format!("{analysis_id}:{}", field.key())
}

pub fn chat_message_doc_id(session_id: &str, message_id: &str) -> String {
    format!("{session_id}:{message_id}")
}

pub fn chat_summary_doc_id(session_id: &str) -> String {
    format!("{session_id}:summary")
}
