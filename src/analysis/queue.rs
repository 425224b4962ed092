//! Persisted analysis queue.
//!
//! One ordered JSON dump owned by a single queue object; the worker is the
//! only consumer, enqueues only append. A process-local mutex serializes
//! the read-modify-write cycles so a page visit landing mid-poll cannot
//! lose an update.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::analysis::types::{AnalysisQueueItem, QueueStatus};
use crate::storage::StorageManager;
use crate::store::StoreError;

const QUEUE_FILE: &str = "analysis-queue.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct QueueDump {
    queue: Vec<AnalysisQueueItem>,
}

pub struct AnalysisQueue {
    store: Arc<dyn StorageManager>,
    lock: Mutex<()>,
}

impl AnalysisQueue {
    pub fn new(store: Arc<dyn StorageManager>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> QueueDump {
        if !self.store.exists(QUEUE_FILE) {
            return QueueDump::default();
        }

        match self
            .store
            .read(QUEUE_FILE)
            .map_err(anyhow::Error::from)
            .and_then(|data| serde_json::from_slice(&data).map_err(anyhow::Error::from))
        {
            Ok(dump) => dump,
            Err(e) => {
                log::error!("failed to read queue dump, starting empty: {e}");
                QueueDump::default()
            }
        }
    }

    fn persist(&self, dump: &QueueDump) -> Result<(), StoreError> {
        self.store
            .write(QUEUE_FILE, &serde_json::to_vec_pretty(dump)?)?;
        Ok(())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut QueueDump) -> R) -> Result<R, StoreError> {
        let _guard = self.lock.lock().unwrap();
        let mut dump = self.load();
        let out = f(&mut dump);
        self.persist(&dump)?;
        Ok(out)
    }

    pub fn enqueue(&self, item: AnalysisQueueItem) -> Result<(), StoreError> {
        self.mutate(|dump| dump.queue.push(item))
    }

    /// Oldest pending item, if any. Always re-reads the dump, so items
    /// enqueued while a previous item was processing are picked up.
    pub fn next_pending(&self) -> Option<AnalysisQueueItem> {
        let _guard = self.lock.lock().unwrap();
        self.load()
            .queue
            .into_iter()
            .find(|item| item.status == QueueStatus::Pending)
    }

    pub fn mark_in_progress(&self, queue_id: &str) -> Result<(), StoreError> {
        self.mutate(|dump| {
            if let Some(item) = dump.queue.iter_mut().find(|i| i.queue_id.as_str() == queue_id) {
                item.status = QueueStatus::InProgress;
            }
        })
    }

    /// Persist the retry state of an item after a failed attempt.
    pub fn record_attempt(
        &self,
        queue_id: &str,
        retry_count: u8,
        last_error: &str,
    ) -> Result<(), StoreError> {
        self.mutate(|dump| {
            if let Some(item) = dump.queue.iter_mut().find(|i| i.queue_id.as_str() == queue_id) {
                item.retry_count = retry_count;
                item.last_error = Some(last_error.to_string());
            }
        })
    }

    pub fn remove(&self, queue_id: &str) -> Result<(), StoreError> {
        self.mutate(|dump| dump.queue.retain(|i| i.queue_id.as_str() != queue_id))
    }

    /// Flip items left in progress by a crash back to pending so the next
    /// worker run picks them up. Returns how many were recovered.
    pub fn recover(&self) -> Result<usize, StoreError> {
        self.mutate(|dump| {
            let mut recovered = 0;
            for item in dump.queue.iter_mut() {
                if item.status == QueueStatus::InProgress {
                    item.status = QueueStatus::Pending;
                    recovered += 1;
                }
            }
            recovered
        })
    }

    pub fn len(&self) -> usize {
        let _guard = self.lock.lock().unwrap();
        self.load().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn items(&self) -> Vec<AnalysisQueueItem> {
        let _guard = self.lock.lock().unwrap();
        self.load().queue
    }
}
