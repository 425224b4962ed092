//! Per-user analysis store.
//!
//! A thin facade over [`StorageManager`] holding everything the pipeline
//! persists for a user: analysis results, the fingerprint dedup index, raw
//! content blobs, the extraction stash, history links and debug logs.
//!
//! Layout under the backend:
//!
//! - `users/<user>/analyses/<analysis_id>.json`
//! - `users/<user>/analysis-index.json`     fingerprint -> analysis id
//! - `users/<user>/activity-index.json`     activity id -> analysis id
//! - `users/<user>/history-links.json`      history entry id -> analysis id
//! - `users/<user>/html/<hash>.html`        content-addressed, write-once
//! - `users/<user>/screenshots/<activity_id>.png`
//! - `users/<user>/stash/<activity_id>.json`
//! - `users/<user>/debug-log.jsonl`

use std::collections::HashMap;
use std::sync::Arc;

use crate::analysis::types::{ContentAnalysisResult, DebugLogRecord, PendingExtraction};
use crate::storage::StorageManager;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed stored document: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct AnalysisStore {
    store: Arc<dyn StorageManager>,
}

impl AnalysisStore {
    pub fn new(store: Arc<dyn StorageManager>) -> Self {
        Self { store }
    }

    fn key(user_id: &str, rest: &str) -> String {
        format!("users/{user_id}/{rest}")
    }

    fn read_map(&self, ident: &str) -> Result<HashMap<String, String>, StoreError> {
        if !self.store.exists(ident) {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_slice(&self.store.read(ident)?)?)
    }

    fn write_map(&self, ident: &str, map: &HashMap<String, String>) -> Result<(), StoreError> {
        self.store.write(ident, &serde_json::to_vec_pretty(map)?)?;
        Ok(())
    }

    // --- analyses ---

    pub fn save_analysis(&self, result: &ContentAnalysisResult) -> Result<(), StoreError> {
        let ident = Self::key(
            &result.user_id,
            &format!("analyses/{}.json", result.analysis_id),
        );
        self.store.write(&ident, &serde_json::to_vec_pretty(result)?)?;

        let activity_ident = Self::key(&result.user_id, "activity-index.json");
        let mut index = self.read_map(&activity_ident)?;
        let mut dirty = false;
        for activity_id in &result.activity_ids {
            if index
                .insert(activity_id.clone(), result.analysis_id.to_string())
                .is_none()
            {
                dirty = true;
            }
        }
        if dirty {
            self.write_map(&activity_ident, &index)?;
        }

        Ok(())
    }

    pub fn analysis(
        &self,
        user_id: &str,
        analysis_id: &str,
    ) -> Result<Option<ContentAnalysisResult>, StoreError> {
        let ident = Self::key(user_id, &format!("analyses/{analysis_id}.json"));
        if !self.store.exists(&ident) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&self.store.read(&ident)?)?))
    }

    pub fn analysis_by_activity(
        &self,
        user_id: &str,
        activity_id: &str,
    ) -> Result<Option<ContentAnalysisResult>, StoreError> {
        let index = self.read_map(&Self::key(user_id, "activity-index.json"))?;
        match index.get(activity_id) {
            Some(analysis_id) => self.analysis(user_id, analysis_id),
            None => Ok(None),
        }
    }

    /// Append an activity id to an existing result. Idempotent: a visit id
    /// already on the result is a no-op. Returns false when the analysis
    /// does not exist.
    pub fn append_activity(
        &self,
        user_id: &str,
        analysis_id: &str,
        activity_id: &str,
    ) -> Result<bool, StoreError> {
        let mut result = match self.analysis(user_id, analysis_id)? {
            Some(result) => result,
            None => return Ok(false),
        };

        if !result.activity_ids.iter().any(|id| id == activity_id) {
            result.activity_ids.push(activity_id.to_string());
            self.save_analysis(&result)?;
        }
        Ok(true)
    }

    // --- fingerprint index ---

    pub fn fingerprint_lookup(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> Result<Option<String>, StoreError> {
        let index = self.read_map(&Self::key(user_id, "analysis-index.json"))?;
        Ok(index.get(fingerprint).cloned())
    }

    pub fn fingerprint_insert(
        &self,
        user_id: &str,
        fingerprint: &str,
        analysis_id: &str,
    ) -> Result<(), StoreError> {
        let ident = Self::key(user_id, "analysis-index.json");
        let mut index = self.read_map(&ident)?;
        index.insert(fingerprint.to_string(), analysis_id.to_string());
        self.write_map(&ident, &index)
    }

    // --- content blobs ---

    /// Content-addressed, write-once: identical markup across visits is
    /// stored exactly once.
    pub fn store_html(&self, user_id: &str, html_hash: &str, html: &str) -> Result<(), StoreError> {
        let ident = Self::key(user_id, &format!("html/{html_hash}.html"));
        if self.store.exists(&ident) {
            return Ok(());
        }
        self.store.write(&ident, html.as_bytes())?;
        Ok(())
    }

    pub fn html(&self, user_id: &str, html_hash: &str) -> Result<Option<String>, StoreError> {
        let ident = Self::key(user_id, &format!("html/{html_hash}.html"));
        if !self.store.exists(&ident) {
            return Ok(None);
        }
        let bytes = self.store.read(&ident)?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn store_screenshot(
        &self,
        user_id: &str,
        activity_id: &str,
        image: &[u8],
    ) -> Result<(), StoreError> {
        let ident = Self::key(user_id, &format!("screenshots/{activity_id}.png"));
        self.store.write(&ident, image)?;
        Ok(())
    }

    pub fn screenshot(&self, user_id: &str, activity_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let ident = Self::key(user_id, &format!("screenshots/{activity_id}.png"));
        if !self.store.exists(&ident) {
            return Ok(None);
        }
        Ok(Some(self.store.read(&ident)?))
    }

    // --- extraction stash ---

    pub fn stash_extraction(&self, extraction: &PendingExtraction) -> Result<(), StoreError> {
        let ident = Self::key(
            &extraction.user_id,
            &format!("stash/{}.json", extraction.activity_id),
        );
        self.store
            .write(&ident, &serde_json::to_vec_pretty(extraction)?)?;
        Ok(())
    }

    pub fn stashed_extraction(
        &self,
        user_id: &str,
        activity_id: &str,
    ) -> Result<Option<PendingExtraction>, StoreError> {
        let ident = Self::key(user_id, &format!("stash/{activity_id}.json"));
        if !self.store.exists(&ident) {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&self.store.read(&ident)?)?))
    }

    pub fn discard_stash(&self, user_id: &str, activity_id: &str) {
        let ident = Self::key(user_id, &format!("stash/{activity_id}.json"));
        if self.store.exists(&ident) {
            if let Err(e) = self.store.delete(&ident) {
                log::warn!("failed to discard extraction stash {ident}: {e}");
            }
        }
    }

    // --- history links ---

    pub fn link_history_entry(
        &self,
        user_id: &str,
        history_entry_id: &str,
        analysis_id: &str,
    ) -> Result<(), StoreError> {
        let ident = Self::key(user_id, "history-links.json");
        let mut links = self.read_map(&ident)?;
        links.insert(history_entry_id.to_string(), analysis_id.to_string());
        self.write_map(&ident, &links)
    }

    pub fn history_link(
        &self,
        user_id: &str,
        history_entry_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let links = self.read_map(&Self::key(user_id, "history-links.json"))?;
        Ok(links.get(history_entry_id).cloned())
    }

    // --- debug log ---

    pub fn append_debug_log(&self, user_id: &str, record: &DebugLogRecord) {
        let ident = Self::key(user_id, "debug-log.jsonl");
        let mut line = match serde_json::to_vec(record) {
            Ok(line) => line,
            Err(e) => {
                log::warn!("failed to serialize debug log record: {e}");
                return;
            }
        };
        line.push(b'\n');
        if let Err(e) = self.store.append(&ident, &line) {
            log::warn!("failed to append debug log: {e}");
        }
    }

    pub fn debug_log(&self, user_id: &str) -> Result<Vec<DebugLogRecord>, StoreError> {
        let ident = Self::key(user_id, "debug-log.jsonl");
        if !self.store.exists(&ident) {
            return Ok(vec![]);
        }
        let data = self.store.read(&ident)?;
        let text = String::from_utf8_lossy(&data);
        let mut records = vec![];
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::{content_hash, AnalysisStatus, ContentAnalysisResult};
    use crate::capture::{ScreenshotMetadata, StructuredText};
    use crate::eid::Eid;
    use crate::storage::BackendLocal;
    use chrono::Utc;

    fn store() -> (tempfile::TempDir, AnalysisStore) {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(BackendLocal::new(dir.path()).unwrap());
        (dir, AnalysisStore::new(backend))
    }

    fn result(user_id: &str, activity_id: &str) -> ContentAnalysisResult {
        ContentAnalysisResult {
            analysis_id: Eid::new(),
            activity_ids: vec![activity_id.to_string()],
            user_id: user_id.to_string(),
            url: "https://example.com".to_string(),
            timestamp: Utc::now(),
            title: "Example".to_string(),
            meta_description: None,
            text_length: 10,
            html_hash: content_hash(b"<html>"),
            page_description: Some("a page".to_string()),
            screenshot_description: None,
            category: Some("news".to_string()),
            subcategory: None,
            brand: None,
            languages: vec!["en".to_string()],
            primary_language: Some("en".to_string()),
            screenshot_activity_id: activity_id.to_string(),
            screenshot_hash: content_hash(b"png"),
            capture: ScreenshotMetadata::default(),
            analysis_status: AnalysisStatus::Completed,
            model: "test".to_string(),
            analysis_time_ms: 1,
            error: None,
        }
    }

    #[test]
    fn test_analysis_queryable_by_id_and_activity() {
        let (_dir, store) = store();
        let saved = result("alice", "act-1");
        store.save_analysis(&saved).unwrap();

        let by_id = store
            .analysis("alice", saved.analysis_id.as_str())
            .unwrap()
            .unwrap();
        assert_eq!(by_id.url, saved.url);

        let by_activity = store.analysis_by_activity("alice", "act-1").unwrap().unwrap();
        assert_eq!(by_activity.analysis_id, saved.analysis_id);
    }

    #[test]
    fn test_append_activity_is_idempotent() {
        let (_dir, store) = store();
        let saved = result("alice", "act-1");
        store.save_analysis(&saved).unwrap();

        let id = saved.analysis_id.as_str();
        assert!(store.append_activity("alice", id, "act-2").unwrap());
        assert!(store.append_activity("alice", id, "act-2").unwrap());

        let loaded = store.analysis("alice", id).unwrap().unwrap();
        assert_eq!(loaded.activity_ids, vec!["act-1", "act-2"]);
    }

    #[test]
    fn test_append_activity_missing_analysis() {
        let (_dir, store) = store();
        assert!(!store.append_activity("alice", "nope", "act-1").unwrap());
    }

    #[test]
    fn test_fingerprint_index_roundtrip() {
        let (_dir, store) = store();
        assert!(store.fingerprint_lookup("alice", "k").unwrap().is_none());

        store.fingerprint_insert("alice", "k", "analysis-1").unwrap();
        assert_eq!(
            store.fingerprint_lookup("alice", "k").unwrap().as_deref(),
            Some("analysis-1")
        );

        // users are isolated
        assert!(store.fingerprint_lookup("bob", "k").unwrap().is_none());
    }

    #[test]
    fn test_html_blob_write_once() {
        let (_dir, store) = store();
        let hash = content_hash(b"<html>one</html>");

        store.store_html("alice", &hash, "<html>one</html>").unwrap();
        // second write with the same hash must not clobber
        store.store_html("alice", &hash, "DIFFERENT").unwrap();

        assert_eq!(
            store.html("alice", &hash).unwrap().unwrap(),
            "<html>one</html>"
        );
    }

    #[test]
    fn test_stash_lifecycle() {
        let (_dir, store) = store();
        let extraction = PendingExtraction {
            activity_id: "act-1".to_string(),
            user_id: "alice".to_string(),
            url: "https://example.com".to_string(),
            text: StructuredText::default(),
            screenshot_metadata: ScreenshotMetadata::default(),
            html_hash: "h".to_string(),
            screenshot_hash: "s".to_string(),
            stashed_at: Utc::now(),
        };

        store.stash_extraction(&extraction).unwrap();
        assert!(store.stashed_extraction("alice", "act-1").unwrap().is_some());

        store.discard_stash("alice", "act-1");
        assert!(store.stashed_extraction("alice", "act-1").unwrap().is_none());

        // double-discard is harmless
        store.discard_stash("alice", "act-1");
    }

    #[test]
    fn test_debug_log_appends_in_order() {
        let (_dir, store) = store();
        for attempt in 1..=3u8 {
            store.append_debug_log(
                "alice",
                &DebugLogRecord {
                    activity_id: "act-1".to_string(),
                    url: "https://example.com".to_string(),
                    model: "test".to_string(),
                    attempt,
                    prompt: "p".to_string(),
                    raw_response: None,
                    parse_ok: false,
                    error: Some("nope".to_string()),
                    duration_ms: 5,
                    success: false,
                    timestamp: Utc::now(),
                },
            );
        }

        let records = store.debug_log("alice").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].attempt, 3);
    }
}
