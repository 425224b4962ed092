//! Contract with the page capture source.
//!
//! The browser shell supplies one capture source per page visit; the
//! pipeline treats it as an opaque capability. Readiness waits and script
//! timeouts are the source's problem, not ours.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured text extracted from a rendered page.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StructuredText {
    pub title: String,
    pub meta_description: Option<String>,
    pub headings: Vec<String>,
    pub paragraphs: Vec<String>,
    pub links: Vec<String>,
    pub full_text: String,
    pub text_length: usize,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub x: i32,
    pub y: i32,
}

/// Viewport state at the moment the screenshot was taken.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScreenshotMetadata {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub document_height: u32,
    pub scroll_position: ScrollPosition,
    pub zoom_factor: f32,
    pub captured_at: DateTime<Utc>,
}

impl Default for ScreenshotMetadata {
    fn default() -> Self {
        Self {
            viewport_width: 0,
            viewport_height: 0,
            document_height: 0,
            scroll_position: ScrollPosition::default(),
            zoom_factor: 1.0,
            captured_at: Utc::now(),
        }
    }
}

pub struct ScreenshotCapture {
    pub image: Vec<u8>,
    pub metadata: ScreenshotMetadata,
}

/// A live page the pipeline can pull content from.
///
/// The page object may be gone by the time the worker runs, so everything
/// needed later is pulled up front during `on_page_visit` and stashed.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn html(&self) -> anyhow::Result<String>;

    async fn structured_text(&self) -> anyhow::Result<StructuredText>;

    async fn screenshot_with_metadata(&self) -> anyhow::Result<ScreenshotCapture>;
}
