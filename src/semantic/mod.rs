//! Semantic index: per-user embedding collections and similarity search.
//!
//! # Architecture
//!
//! - `embedder`: the `Embedder` trait and the fastembed implementation
//! - `docs`: document types for the content and chat collections
//! - `index`: in-memory collection with cosine-distance search
//! - `storage`: versioned binary persistence per collection
//! - `summary`: session synopsis generation
//! - `service`: the per-user, lazily-initialized service facade

pub mod docs;
pub mod embedder;
mod index;
pub mod service;
mod storage;
mod summary;

pub use docs::{ChatField, ContentField, IndexedChatDocument, IndexedDocument};
pub use embedder::{EmbedError, Embedder, FastembedEmbedder};
pub use index::{Collection, Hit, IndexError};
pub use service::{
    score_from_distance, AnalysisFields, ChatIndexReport, ChatSearchHit, ChatSearchOptions,
    ContentSearchHit, SearchOptions, SemanticIndexError, SemanticIndexService,
};
pub use storage::{CollectionStorage, CollectionStorageError};
pub use summary::summarize_session;
