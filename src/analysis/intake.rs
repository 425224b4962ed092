//! Page-visit intake: the enqueue side of the pipeline.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Notify;

use crate::analysis::queue::AnalysisQueue;
use crate::analysis::types::{content_hash, fingerprint, AnalysisQueueItem, PendingExtraction};
use crate::capture::CaptureSource;
use crate::config::Config;
use crate::store::{AnalysisStore, StoreError};

/// What a page visit turned into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VisitOutcome {
    /// Blacklisted URL or unusable capture; nothing recorded.
    Skipped,
    /// Content fingerprint already analyzed; the visit was attached to the
    /// existing result without any new work.
    Deduplicated { analysis_id: String },
    /// New fingerprint; a queue item now awaits the worker.
    Enqueued { queue_id: String },
}

/// Enqueue side of the analysis pipeline. Shares the queue and wake handle
/// with the worker; both are injected, nothing is ambient.
#[derive(Clone)]
pub struct AnalysisIntake {
    config: Arc<Config>,
    store: AnalysisStore,
    queue: Arc<AnalysisQueue>,
    wake: Arc<Notify>,
}

impl AnalysisIntake {
    pub fn new(
        config: Arc<Config>,
        store: AnalysisStore,
        queue: Arc<AnalysisQueue>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            wake,
        }
    }

    /// Non-content pages: exact blacklist entries plus internal schemes.
    pub fn is_blacklisted(&self, url: &str) -> bool {
        if self.config.url_blacklist.iter().any(|b| b == url) {
            return true;
        }

        match url::Url::parse(url) {
            Ok(parsed) => self
                .config
                .internal_schemes
                .iter()
                .any(|scheme| parsed.scheme() == scheme),
            // unparseable URLs can't be captured either
            Err(_) => true,
        }
    }

    /// React to a page visit. Capture problems abort silently: none of
    /// this pipeline's errors may interrupt browsing.
    pub async fn on_page_visit(
        &self,
        activity_id: &str,
        url: &str,
        user_id: &str,
        history_entry_id: Option<&str>,
        capture: &dyn CaptureSource,
    ) -> Result<VisitOutcome, StoreError> {
        if self.is_blacklisted(url) {
            log::debug!("skipping blacklisted url {url}");
            return Ok(VisitOutcome::Skipped);
        }

        let html = match capture.html().await {
            Ok(html) => html,
            Err(e) => {
                log::warn!("capture failed for {url}: {e}");
                return Ok(VisitOutcome::Skipped);
            }
        };
        if html.trim().is_empty() {
            log::debug!("empty html for {url}, nothing to analyze");
            return Ok(VisitOutcome::Skipped);
        }

        let (text, shot) = match (
            capture.structured_text().await,
            capture.screenshot_with_metadata().await,
        ) {
            (Ok(text), Ok(shot)) => (text, shot),
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("capture failed for {url}: {e}");
                return Ok(VisitOutcome::Skipped);
            }
        };

        let html_hash = content_hash(html.as_bytes());
        let screenshot_hash = content_hash(&shot.image);
        let key = fingerprint(url, &html_hash, &screenshot_hash);

        // dedup check happens before any expensive work is scheduled
        if let Some(analysis_id) = self.store.fingerprint_lookup(user_id, &key)? {
            if self.store.append_activity(user_id, &analysis_id, activity_id)? {
                log::debug!("visit {activity_id} deduplicated onto analysis {analysis_id}");
                return Ok(VisitOutcome::Deduplicated { analysis_id });
            }
            // index points at a missing analysis; fall through and redo it
            log::warn!("fingerprint index references missing analysis {analysis_id}");
        }

        self.store.store_screenshot(user_id, activity_id, &shot.image)?;
        self.store.store_html(user_id, &html_hash, &html)?;

        self.store.stash_extraction(&PendingExtraction {
            activity_id: activity_id.to_string(),
            user_id: user_id.to_string(),
            url: url.to_string(),
            text,
            screenshot_metadata: shot.metadata,
            html_hash,
            screenshot_hash,
            stashed_at: Utc::now(),
        })?;

        let item = AnalysisQueueItem::new(
            activity_id,
            user_id,
            url,
            history_entry_id.map(str::to_string),
        );
        let queue_id = item.queue_id.to_string();
        self.queue.enqueue(item)?;
        self.wake.notify_one();

        log::debug!("enqueued analysis for {url} as {queue_id}");
        Ok(VisitOutcome::Enqueued { queue_id })
    }
}
