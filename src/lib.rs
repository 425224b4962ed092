//! glance: AI-derived understanding of a browsing session.
//!
//! Two cooperating halves:
//!
//! - [`analysis`]: a persistent work queue that turns page captures into
//!   structured multimodal-LLM analyses, with content-addressed dedup and
//!   bounded retries.
//! - [`semantic`]: per-user vector collections over analysis fields and
//!   chat history, searchable by similarity.
//!
//! The browser shell owns construction: it builds a [`storage::StorageManager`],
//! wires up an [`analysis::AnalysisIntake`] / [`analysis::AnalysisWorker`]
//! pair sharing a queue and wake handle, and hands the worker a
//! [`semantic::SemanticIndexService`] as its indexer.

pub mod analysis;
pub mod capture;
pub mod chat;
pub mod config;
pub mod eid;
pub mod provider;
pub mod registry;
pub mod semantic;
pub mod storage;
pub mod store;

#[cfg(test)]
mod tests;

pub use analysis::{
    AnalysisIntake, AnalysisQueue, AnalysisWorker, ContentAnalysisResult, ContentIndexer,
    VisitOutcome,
};
pub use capture::CaptureSource;
pub use config::Config;
pub use provider::{AnalysisProvider, OllamaProvider};
pub use registry::{CategoryRegistry, FileCategoryRegistry};
pub use semantic::SemanticIndexService;
pub use store::AnalysisStore;
