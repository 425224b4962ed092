//! Data model for the analysis pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::capture::{ScreenshotMetadata, StructuredText};
use crate::eid::Eid;

/// SHA-256 hex digest of raw bytes. Doubles as the content-addressed
/// storage key for HTML blobs.
pub fn content_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Dedup key for analyses: one analysis per distinct page content.
pub fn fingerprint(url: &str, html_hash: &str, screenshot_hash: &str) -> String {
    format!("{url}:{html_hash}:{screenshot_hash}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
}

/// One pending unit of work, persisted so it survives restarts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisQueueItem {
    pub queue_id: Eid,
    pub activity_id: String,
    pub user_id: String,
    pub url: String,
    pub history_entry_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: QueueStatus,
    #[serde(default)]
    pub retry_count: u8,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl AnalysisQueueItem {
    pub fn new(
        activity_id: impl Into<String>,
        user_id: impl Into<String>,
        url: impl Into<String>,
        history_entry_id: Option<String>,
    ) -> Self {
        Self {
            queue_id: Eid::new(),
            activity_id: activity_id.into(),
            user_id: user_id.into(),
            url: url.into(),
            history_entry_id,
            timestamp: Utc::now(),
            status: QueueStatus::Pending,
            retry_count: 0,
            last_error: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Completed,
    Failed,
}

/// Structured output requested from the model.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PageAnalysis {
    pub description: String,
    #[serde(default)]
    pub visual_description: String,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub primary_language: String,
}

/// The durable output of the pipeline. Created once per fingerprint,
/// mutated only to append activity ids, never deleted automatically.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContentAnalysisResult {
    pub analysis_id: Eid,
    /// Every page-visit event that produced or reused this result.
    pub activity_ids: Vec<String>,
    pub user_id: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,

    // extracted page text
    pub title: String,
    pub meta_description: Option<String>,
    pub text_length: usize,
    pub html_hash: String,

    // model output
    pub page_description: Option<String>,
    pub screenshot_description: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub brand: Option<String>,
    pub languages: Vec<String>,
    pub primary_language: Option<String>,

    // screenshot reference: blob key in the analysis store
    pub screenshot_activity_id: String,
    pub screenshot_hash: String,
    pub capture: ScreenshotMetadata,

    pub analysis_status: AnalysisStatus,
    pub model: String,
    pub analysis_time_ms: u64,
    pub error: Option<String>,
}

/// Extraction data captured at visit time and held until the worker runs.
///
/// Explicit lifecycle: created on enqueue, read once by the worker,
/// deleted when the queue item is finished either way.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingExtraction {
    pub activity_id: String,
    pub user_id: String,
    pub url: String,
    pub text: StructuredText,
    pub screenshot_metadata: ScreenshotMetadata,
    pub html_hash: String,
    pub screenshot_hash: String,
    pub stashed_at: DateTime<Utc>,
}

/// One provider exchange, recorded win or lose.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DebugLogRecord {
    pub activity_id: String,
    pub url: String,
    pub model: String,
    pub attempt: u8,
    pub prompt: String,
    pub raw_response: Option<String>,
    pub parse_ok: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}
