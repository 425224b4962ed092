//! Shared category vocabulary.
//!
//! The prompt includes a sample of known categories so the model leans on
//! the existing taxonomy instead of inventing near-duplicates; every
//! completed analysis reports its category back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::storage::StorageManager;

const CATEGORIES_FILE: &str = "categories.json";
const SAMPLE_SIZE: usize = 20;

/// Seed vocabulary used until real usage accumulates.
const SEED_CATEGORIES: &[&str] = &[
    "news",
    "shopping",
    "social",
    "reference",
    "entertainment",
    "technology",
    "finance",
    "travel",
    "education",
    "productivity",
];

pub trait CategoryRegistry: Send + Sync {
    /// A representative sample of known categories, most used first.
    fn example_categories(&self) -> Vec<String>;

    fn record_use(&self, category: &str);
}

/// File-backed registry: a single JSON map of category -> use count.
pub struct FileCategoryRegistry {
    store: Arc<dyn StorageManager>,
    counts: Mutex<HashMap<String, u64>>,
}

impl FileCategoryRegistry {
    pub fn new(store: Arc<dyn StorageManager>) -> Self {
        let counts = if store.exists(CATEGORIES_FILE) {
            match store
                .read(CATEGORIES_FILE)
                .map_err(anyhow::Error::from)
                .and_then(|data| serde_json::from_slice(&data).map_err(anyhow::Error::from))
            {
                Ok(counts) => counts,
                Err(e) => {
                    log::error!("failed to read category registry, starting empty: {e}");
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Self {
            store,
            counts: Mutex::new(counts),
        }
    }

    fn persist(&self, counts: &HashMap<String, u64>) {
        let data = serde_json::to_vec_pretty(counts).expect("category map serializes");
        if let Err(e) = self.store.write(CATEGORIES_FILE, &data) {
            log::error!("failed to persist category registry: {e}");
        }
    }
}

impl CategoryRegistry for FileCategoryRegistry {
    fn example_categories(&self) -> Vec<String> {
        let counts = self.counts.lock().unwrap();

        let mut known: Vec<(&String, &u64)> = counts.iter().collect();
        known.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

        let mut sample: Vec<String> = known
            .into_iter()
            .take(SAMPLE_SIZE)
            .map(|(name, _)| name.clone())
            .collect();

        // top up from the seed list so early prompts still see a vocabulary
        for seed in SEED_CATEGORIES {
            if sample.len() >= SAMPLE_SIZE {
                break;
            }
            if !sample.iter().any(|c| c == seed) {
                sample.push((*seed).to_string());
            }
        }

        sample
    }

    fn record_use(&self, category: &str) {
        let category = category.trim().to_lowercase();
        if category.is_empty() {
            return;
        }

        let mut counts = self.counts.lock().unwrap();
        *counts.entry(category).or_insert(0) += 1;
        self.persist(&counts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BackendLocal;

    fn registry() -> (tempfile::TempDir, FileCategoryRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BackendLocal::new(dir.path()).unwrap());
        let registry = FileCategoryRegistry::new(store);
        (dir, registry)
    }

    #[test]
    fn test_seed_vocabulary_before_any_usage() {
        let (_dir, registry) = registry();
        let sample = registry.example_categories();
        assert!(sample.contains(&"news".to_string()));
        assert!(sample.len() <= SAMPLE_SIZE);
    }

    #[test]
    fn test_recorded_categories_rank_first() {
        let (_dir, registry) = registry();
        registry.record_use("Gardening");
        registry.record_use("gardening");
        registry.record_use("news");

        let sample = registry.example_categories();
        assert_eq!(sample[0], "gardening");
        assert_eq!(sample[1], "news");
    }

    #[test]
    fn test_counts_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn StorageManager> = Arc::new(BackendLocal::new(dir.path()).unwrap());

        let registry = FileCategoryRegistry::new(store.clone());
        registry.record_use("forums");
        drop(registry);

        let reloaded = FileCategoryRegistry::new(store);
        assert_eq!(reloaded.example_categories()[0], "forums");
    }

    #[test]
    fn test_blank_category_ignored() {
        let (_dir, registry) = registry();
        registry.record_use("   ");
        assert!(!registry.example_categories().iter().any(|c| c.is_empty()));
    }
}
