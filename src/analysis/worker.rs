//! The analysis worker: single consumer of the queue.
//!
//! Strictly one item is in flight at a time, which serializes provider
//! calls and keeps fingerprint-index writes race-free. The loop wakes on
//! enqueue and otherwise polls on a fixed interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use crate::analysis::prompt::{build_prompt, corrective_prompt, parse_analysis};
use crate::analysis::queue::AnalysisQueue;
use crate::analysis::types::{
    AnalysisQueueItem, AnalysisStatus, ContentAnalysisResult, DebugLogRecord, PageAnalysis,
    PendingExtraction,
};
use crate::config::Config;
use crate::eid::Eid;
use crate::provider::AnalysisProvider;
use crate::registry::CategoryRegistry;
use crate::store::AnalysisStore;

/// Downstream vector indexing, decoupled so an index failure can never
/// fail the analysis it stems from.
#[async_trait]
pub trait ContentIndexer: Send + Sync {
    async fn index_analysis(&self, result: &ContentAnalysisResult) -> anyhow::Result<()>;
}

/// Wait before the next attempt after a rate-limit error: 2^retry_count
/// backoff units.
pub fn backoff_delay(retry_count: u8, unit: Duration) -> Duration {
    let exp = retry_count.min(16) as u32;
    unit * 2u32.pow(exp)
}

pub struct AnalysisWorker {
    config: Arc<Config>,
    queue: Arc<AnalysisQueue>,
    store: AnalysisStore,
    provider: Arc<dyn AnalysisProvider>,
    registry: Arc<dyn CategoryRegistry>,
    indexer: Option<Arc<dyn ContentIndexer>>,
    wake: Arc<Notify>,
}

impl AnalysisWorker {
    pub fn new(
        config: Arc<Config>,
        queue: Arc<AnalysisQueue>,
        store: AnalysisStore,
        provider: Arc<dyn AnalysisProvider>,
        registry: Arc<dyn CategoryRegistry>,
        indexer: Option<Arc<dyn ContentIndexer>>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            config,
            queue,
            store,
            provider,
            registry,
            indexer,
            wake,
        }
    }

    /// Run forever: drain pending items, then sleep until woken or the
    /// poll interval elapses.
    pub async fn run(&self) {
        match self.queue.recover() {
            Ok(0) => {}
            Ok(n) => log::info!("recovered {n} in-progress queue items from a previous run"),
            Err(e) => log::error!("queue recovery failed: {e}"),
        }

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            self.run_pending().await;

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move { worker.run().await })
    }

    /// Process everything currently pending, one item at a time. The queue
    /// is re-read after every item so visits reported mid-run are seen.
    pub async fn run_pending(&self) {
        while let Some(item) = self.queue.next_pending() {
            self.process_item(item).await;
        }
    }

    async fn process_item(&self, mut item: AnalysisQueueItem) {
        if let Err(e) = self.queue.mark_in_progress(item.queue_id.as_str()) {
            log::error!("failed to mark queue item in progress: {e}");
            return;
        }
        let started = Instant::now();
        log::debug!("processing analysis for {} ({})", item.url, item.activity_id);

        let extraction = self
            .store
            .stashed_extraction(&item.user_id, &item.activity_id)
            .unwrap_or_else(|e| {
                log::error!("failed to read extraction stash: {e}");
                None
            });
        let screenshot = self
            .store
            .screenshot(&item.user_id, &item.activity_id)
            .unwrap_or_else(|e| {
                log::error!("failed to read screenshot blob: {e}");
                None
            });

        // data loss from a crash mid-flight is a hard failure, not an
        // endless retry
        let (extraction, screenshot) = match (extraction, screenshot) {
            (Some(extraction), Some(screenshot)) => (extraction, screenshot),
            _ => {
                self.finalize_failure(&item, None, "extraction data lost before processing", started);
                return;
            }
        };

        let categories = self.registry.example_categories();
        let base_prompt = build_prompt(&item.url, &extraction.text, &categories);
        let mut prompt = base_prompt.clone();

        loop {
            let attempt = item.retry_count.saturating_add(1);
            let call_started = Instant::now();

            match self.provider.generate(&prompt, &screenshot).await {
                Ok(raw) => match parse_analysis(&raw) {
                    Ok(analysis) => {
                        self.log_exchange(&item, attempt, &prompt, Some(raw.as_str()), true, None, call_started);
                        self.finalize_success(&item, &extraction, analysis, started).await;
                        return;
                    }
                    Err(parse_err) => {
                        let msg = parse_err.to_string();
                        self.log_exchange(&item, attempt, &prompt, Some(raw.as_str()), false, Some(msg.as_str()), call_started);
                        item.retry_count = attempt;
                        item.last_error = Some(msg.clone());
                        self.persist_attempt(&item);

                        if item.retry_count >= self.config.max_attempts {
                            self.finalize_failure(&item, Some(&extraction), &msg, started);
                            return;
                        }
                        log::info!(
                            "malformed analysis output for {} (attempt {attempt}), re-prompting",
                            item.url
                        );
                        prompt = corrective_prompt(&base_prompt);
                    }
                },
                Err(provider_err) => {
                    let msg = provider_err.to_string();
                    self.log_exchange(&item, attempt, &prompt, None, false, Some(msg.as_str()), call_started);
                    item.retry_count = attempt;
                    item.last_error = Some(msg.clone());
                    self.persist_attempt(&item);

                    if item.retry_count >= self.config.max_attempts {
                        self.finalize_failure(&item, Some(&extraction), &msg, started);
                        return;
                    }

                    if provider_err.is_rate_limit() {
                        let delay = backoff_delay(
                            item.retry_count,
                            Duration::from_millis(self.config.backoff_unit_ms),
                        );
                        log::info!(
                            "provider rate limited, attempt {attempt}, backing off {}ms",
                            delay.as_millis()
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        log::info!("provider error on attempt {attempt}, retrying: {msg}");
                    }
                }
            }
        }
    }

    fn persist_attempt(&self, item: &AnalysisQueueItem) {
        let error = item.last_error.as_deref().unwrap_or("");
        if let Err(e) = self
            .queue
            .record_attempt(item.queue_id.as_str(), item.retry_count, error)
        {
            log::error!("failed to persist retry state: {e}");
        }
    }

    async fn finalize_success(
        &self,
        item: &AnalysisQueueItem,
        extraction: &PendingExtraction,
        analysis: PageAnalysis,
        started: Instant,
    ) {
        self.registry.record_use(&analysis.category);

        let result = ContentAnalysisResult {
            analysis_id: Eid::new(),
            activity_ids: vec![item.activity_id.clone()],
            user_id: item.user_id.clone(),
            url: item.url.clone(),
            timestamp: Utc::now(),
            title: extraction.text.title.clone(),
            meta_description: extraction.text.meta_description.clone(),
            text_length: extraction.text.text_length,
            html_hash: extraction.html_hash.clone(),
            page_description: Some(analysis.description),
            screenshot_description: non_empty(analysis.visual_description),
            category: Some(analysis.category),
            subcategory: analysis.subcategory,
            brand: analysis.brand,
            languages: analysis.languages,
            primary_language: non_empty(analysis.primary_language),
            screenshot_activity_id: item.activity_id.clone(),
            screenshot_hash: extraction.screenshot_hash.clone(),
            capture: extraction.screenshot_metadata.clone(),
            analysis_status: AnalysisStatus::Completed,
            model: self.provider.model_name().to_string(),
            analysis_time_ms: started.elapsed().as_millis() as u64,
            error: None,
        };

        if let Err(e) = self.store.save_analysis(&result) {
            // leave the queue item in progress; recovery re-runs it
            log::error!("failed to persist analysis result: {e}");
            return;
        }

        let key = crate::analysis::types::fingerprint(
            &item.url,
            &extraction.html_hash,
            &extraction.screenshot_hash,
        );
        if let Err(e) = self
            .store
            .fingerprint_insert(&item.user_id, &key, result.analysis_id.as_str())
        {
            log::error!("failed to update fingerprint index: {e}");
        }

        if let Some(history_entry_id) = &item.history_entry_id {
            if let Err(e) = self.store.link_history_entry(
                &item.user_id,
                history_entry_id,
                result.analysis_id.as_str(),
            ) {
                log::error!("failed to link history entry: {e}");
            }
        }

        // vector indexing must never fail the analysis itself
        if let Some(indexer) = &self.indexer {
            if let Err(e) = indexer.index_analysis(&result).await {
                log::warn!("vector indexing failed for {}: {e}", result.analysis_id);
            }
        }

        self.store.discard_stash(&item.user_id, &item.activity_id);
        if let Err(e) = self.queue.remove(item.queue_id.as_str()) {
            log::error!("failed to remove finished queue item: {e}");
        }

        log::info!(
            "analysis {} completed for {} in {}ms",
            result.analysis_id,
            item.url,
            result.analysis_time_ms
        );
    }

    /// Exhausted retries (or lost data): record a failed result so the
    /// outcome stays queryable, then drop the item from the live queue.
    fn finalize_failure(
        &self,
        item: &AnalysisQueueItem,
        extraction: Option<&PendingExtraction>,
        error: &str,
        started: Instant,
    ) {
        let result = ContentAnalysisResult {
            analysis_id: Eid::new(),
            activity_ids: vec![item.activity_id.clone()],
            user_id: item.user_id.clone(),
            url: item.url.clone(),
            timestamp: Utc::now(),
            title: extraction.map(|e| e.text.title.clone()).unwrap_or_default(),
            meta_description: extraction.and_then(|e| e.text.meta_description.clone()),
            text_length: extraction.map(|e| e.text.text_length).unwrap_or(0),
            html_hash: extraction.map(|e| e.html_hash.clone()).unwrap_or_default(),
            page_description: None,
            screenshot_description: None,
            category: None,
            subcategory: None,
            brand: None,
            languages: vec![],
            primary_language: None,
            screenshot_activity_id: item.activity_id.clone(),
            screenshot_hash: extraction
                .map(|e| e.screenshot_hash.clone())
                .unwrap_or_default(),
            capture: extraction
                .map(|e| e.screenshot_metadata.clone())
                .unwrap_or_default(),
            analysis_status: AnalysisStatus::Failed,
            model: self.provider.model_name().to_string(),
            analysis_time_ms: started.elapsed().as_millis() as u64,
            error: Some(error.to_string()),
        };

        if let Err(e) = self.store.save_analysis(&result) {
            log::error!("failed to persist failed analysis result: {e}");
        }

        self.store.discard_stash(&item.user_id, &item.activity_id);
        if let Err(e) = self.queue.remove(item.queue_id.as_str()) {
            log::error!("failed to remove exhausted queue item: {e}");
        }

        log::warn!("analysis failed terminally for {}: {error}", item.url);
    }

    fn log_exchange(
        &self,
        item: &AnalysisQueueItem,
        attempt: u8,
        prompt: &str,
        raw_response: Option<&str>,
        parse_ok: bool,
        error: Option<&str>,
        call_started: Instant,
    ) {
        if !self.config.debug_logging {
            return;
        }

        self.store.append_debug_log(
            &item.user_id,
            &DebugLogRecord {
                activity_id: item.activity_id.clone(),
                url: item.url.clone(),
                model: self.provider.model_name().to_string(),
                attempt,
                prompt: prompt.to_string(),
                raw_response: raw_response.map(str::to_string),
                parse_ok,
                error: error.map(str::to_string),
                duration_ms: call_started.elapsed().as_millis() as u64,
                success: parse_ok,
                timestamp: Utc::now(),
            },
        );
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_retry() {
        let unit = Duration::from_millis(100);
        assert_eq!(backoff_delay(1, unit), Duration::from_millis(200));
        assert_eq!(backoff_delay(2, unit), Duration::from_millis(400));
        assert_eq!(backoff_delay(3, unit), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_exponent_is_capped() {
        let unit = Duration::from_millis(1);
        assert_eq!(backoff_delay(200, unit), backoff_delay(16, unit));
    }

    #[test]
    fn test_non_empty_filters_whitespace() {
        assert_eq!(non_empty("  en  ".to_string()).as_deref(), Some("en"));
        assert!(non_empty("   ".to_string()).is_none());
    }
}
