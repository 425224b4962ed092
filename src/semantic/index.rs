//! In-memory document collection with cosine-distance search.
//!
//! Generic over the record type so the content and chat collections share
//! one implementation. Deletion is a filtered bulk retain, not a
//! scan-and-rewrite of storage.

use std::collections::HashMap;

use crate::semantic::docs::VectorRecord;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}

/// A search hit: the record plus its raw cosine distance (0 = identical,
/// 2 = opposite). Scoring is the caller's concern.
#[derive(Clone, Debug)]
pub struct Hit<R> {
    pub record: R,
    pub distance: f32,
}

pub struct Collection<R: VectorRecord> {
    records: HashMap<String, R>,
    dimensions: usize,
}

impl<R: VectorRecord> Collection<R> {
    pub fn new(dimensions: usize) -> Self {
        Self {
            records: HashMap::new(),
            dimensions,
        }
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            records: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&R> {
        self.records.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.records.values()
    }

    /// Insert or replace a record keyed by its id.
    pub fn insert(&mut self, record: R) -> Result<(), IndexError> {
        let vector = record.vector();
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        if l2_norm(vector) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        self.records.insert(record.id().to_string(), record);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<R> {
        self.records.remove(id)
    }

    /// Drop every record failing the predicate. Returns how many were
    /// removed.
    pub fn retain(&mut self, keep: impl Fn(&R) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| keep(record));
        before - self.records.len()
    }

    /// Nearest neighbors by cosine distance, optionally pre-filtered.
    /// Results are sorted closest first and truncated to `limit`.
    pub fn search(
        &self,
        query: &[f32],
        filter: impl Fn(&R) -> bool,
        limit: usize,
    ) -> Result<Vec<Hit<R>>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut hits: Vec<Hit<R>> = self
            .records
            .values()
            .filter(|record| filter(record))
            .map(|record| Hit {
                distance: cosine_distance(query, record.vector(), query_norm),
                record: record.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);

        Ok(hits)
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_distance(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON {
        return 2.0;
    }

    let dot: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    1.0 - dot / (query_norm * target_norm)
}
