//! Analysis queue & worker: page visits in, persisted analyses out.
//!
//! - `types`: queue items, results, the extraction stash, hashing
//! - `queue`: the persisted ordered queue
//! - `intake`: `on_page_visit`: blacklist, capture, dedup, enqueue
//! - `prompt`: multimodal prompt construction and response parsing
//! - `worker`: the single-consumer processing loop

pub mod intake;
pub mod prompt;
pub mod queue;
pub mod types;
pub mod worker;

pub use intake::{AnalysisIntake, VisitOutcome};
pub use queue::AnalysisQueue;
pub use types::{
    AnalysisQueueItem, AnalysisStatus, ContentAnalysisResult, PageAnalysis, QueueStatus,
};
pub use worker::{AnalysisWorker, ContentIndexer};
