//! Per-user semantic index service.
//!
//! Owns the two collections (page content, chat history) for every user,
//! lazily opened on first touch. Concurrent first touches for the same
//! user share one in-flight initialization instead of racing to create
//! the collection files twice.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;

use crate::analysis::types::ContentAnalysisResult;
use crate::analysis::worker::ContentIndexer;
use crate::chat::{ChatMessage, Role};
use crate::semantic::docs::{
    chat_message_doc_id, chat_summary_doc_id, content_doc_id, ChatField, ContentField,
    IndexedChatDocument, IndexedDocument, VectorRecord,
};
use crate::semantic::embedder::{EmbedError, Embedder};
use crate::semantic::index::{Collection, IndexError};
use crate::semantic::storage::{CollectionStorage, CollectionStorageError};
use crate::semantic::summary::summarize_session;

#[derive(Debug, thiserror::Error)]
pub enum SemanticIndexError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbedError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Storage(#[from] CollectionStorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Raw cosine distance mapped to a similarity score: monotonic decreasing
/// in distance, bounded in (0, 1], no normalization required up front.
pub fn score_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

/// Analysis text fields eligible for embedding.
#[derive(Clone, Debug, Default)]
pub struct AnalysisFields {
    pub page_description: Option<String>,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub screenshot_description: Option<String>,
}

impl AnalysisFields {
    pub fn from_result(result: &ContentAnalysisResult) -> Self {
        Self {
            page_description: result.page_description.clone(),
            title: (!result.title.trim().is_empty()).then(|| result.title.clone()),
            meta_description: result.meta_description.clone(),
            screenshot_description: result.screenshot_description.clone(),
        }
    }

    fn get(&self, field: ContentField) -> Option<&str> {
        let value = match field {
            ContentField::PageDescription => &self.page_description,
            ContentField::Title => &self.title,
            ContentField::MetaDescription => &self.meta_description,
            ContentField::ScreenshotDescription => &self.screenshot_description,
        };
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

#[derive(Clone, Debug)]
pub struct SearchOptions {
    pub limit: usize,
    pub content_types: Option<Vec<ContentField>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            content_types: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChatSearchOptions {
    pub limit: usize,
    pub content_types: Option<Vec<ChatField>>,
}

impl Default for ChatSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            content_types: None,
        }
    }
}

/// A browsing-content result, grouped per analysis with the best score
/// across its matched documents.
#[derive(Clone, Debug)]
pub struct ContentSearchHit {
    pub analysis_id: String,
    pub url: String,
    pub score: f32,
    pub matched_fields: Vec<ContentField>,
}

#[derive(Clone, Debug)]
pub struct ChatSearchHit {
    pub session_id: String,
    pub score: f32,
    pub matched_fields: Vec<ChatField>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChatIndexReport {
    pub new_messages: usize,
    pub summary_regenerated: bool,
}

/// Secondary index per session: which message ids are already embedded
/// and whether a live summary exists. Maintained in the same mutation
/// path as document writes and rebuilt from the documents on load, so it
/// cannot drift.
#[derive(Clone, Debug, Default)]
struct ChatSessionState {
    message_ids: HashSet<String>,
    has_summary: bool,
}

struct ChatState {
    collection: Collection<IndexedChatDocument>,
    sessions: HashMap<String, ChatSessionState>,
}

impl ChatState {
    fn rebuild(collection: Collection<IndexedChatDocument>) -> Self {
        let mut sessions: HashMap<String, ChatSessionState> = HashMap::new();
        for doc in collection.iter() {
            let state = sessions.entry(doc.session_id.clone()).or_default();
            match doc.content_type {
                ChatField::SessionSummary => state.has_summary = true,
                _ => {
                    if let Some(message_id) = &doc.message_id {
                        state.message_ids.insert(message_id.clone());
                    }
                }
            }
        }
        Self {
            collection,
            sessions,
        }
    }
}

struct UserIndexes {
    content: Mutex<Collection<IndexedDocument>>,
    chat: Mutex<ChatState>,
    content_storage: CollectionStorage,
    chat_storage: CollectionStorage,
}

pub struct SemanticIndexService {
    embedder: Arc<dyn Embedder>,
    base_dir: PathBuf,
    summary_max_chars: usize,
    users: Mutex<HashMap<String, Arc<OnceCell<Arc<UserIndexes>>>>>,
}

impl SemanticIndexService {
    pub fn new(embedder: Arc<dyn Embedder>, base_dir: PathBuf, summary_max_chars: usize) -> Self {
        Self {
            embedder,
            base_dir,
            summary_max_chars,
            users: Mutex::new(HashMap::new()),
        }
    }

    async fn user_indexes(&self, user_id: &str) -> Result<Arc<UserIndexes>, SemanticIndexError> {
        let cell = {
            let mut users = self
                .users
                .lock()
                .map_err(|e| SemanticIndexError::Internal(format!("Lock poisoned: {e}")))?;
            users
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_try_init(|| async { self.open_user(user_id) })
            .await
            .cloned()
    }

    fn open_user(&self, user_id: &str) -> Result<Arc<UserIndexes>, SemanticIndexError> {
        let user_dir = self.base_dir.join("users").join(user_id);
        let content_storage = CollectionStorage::new(user_dir.join("content-vectors.bin"));
        let chat_storage = CollectionStorage::new(user_dir.join("chat-vectors.bin"));

        let model_id = self.embedder.model_id_hash();
        let dimensions = self.embedder.dimensions();

        let content = self.open_collection(&content_storage, &model_id, dimensions, "content")?;
        let chat = self.open_collection(&chat_storage, &model_id, dimensions, "chat")?;

        log::info!(
            "semantic index ready for {user_id}: {} content docs, {} chat docs",
            content.len(),
            chat.len()
        );

        Ok(Arc::new(UserIndexes {
            content: Mutex::new(content),
            chat: Mutex::new(ChatState::rebuild(chat)),
            content_storage,
            chat_storage,
        }))
    }

    fn open_collection<R>(
        &self,
        storage: &CollectionStorage,
        model_id: &[u8; 32],
        dimensions: usize,
        label: &str,
    ) -> Result<Collection<R>, SemanticIndexError>
    where
        R: VectorRecord + serde::de::DeserializeOwned,
    {
        if !storage.exists() {
            return Ok(Collection::new(dimensions));
        }

        match storage.load(model_id, dimensions) {
            Ok(collection) => Ok(collection),
            Err(CollectionStorageError::ModelMismatch) => {
                log::warn!("embedding model changed, starting fresh {label} collection");
                Ok(Collection::new(dimensions))
            }
            Err(CollectionStorageError::VersionMismatch(file_version, _)) => {
                log::warn!(
                    "{label} collection version {file_version} unsupported, starting fresh"
                );
                Ok(Collection::new(dimensions))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn lock_err<T>(e: std::sync::PoisonError<T>) -> SemanticIndexError {
        SemanticIndexError::Internal(format!("Lock poisoned: {e}"))
    }

    // --- content indexing ---

    /// Embed and append one document per non-empty analysis field.
    /// Additive only: dedup upstream already prevents re-analysis of
    /// unchanged content. Returns the number of documents added.
    pub async fn index_content_analysis(
        &self,
        analysis_id: &str,
        user_id: &str,
        url: &str,
        timestamp: DateTime<Utc>,
        fields: &AnalysisFields,
    ) -> Result<usize, SemanticIndexError> {
        let staged: Vec<(ContentField, String)> = ContentField::ALL
            .iter()
            .filter_map(|&field| fields.get(field).map(|text| (field, text.to_string())))
            .collect();

        if staged.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = staged.iter().map(|(_, text)| text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts)?;

        let indexes = self.user_indexes(user_id).await?;
        let mut content = indexes.content.lock().map_err(Self::lock_err)?;

        for ((field, text), vector) in staged.into_iter().zip(vectors) {
            content.insert(IndexedDocument {
                id: content_doc_id(analysis_id, field),
                analysis_id: analysis_id.to_string(),
                user_id: user_id.to_string(),
                url: url.to_string(),
                content_type: field,
                content: text,
                timestamp,
                vector,
            })?;
        }

        let added = texts.len();
        indexes
            .content_storage
            .save(&content, &self.embedder.model_id_hash())?;

        log::debug!("indexed {added} content documents for analysis {analysis_id}");
        Ok(added)
    }

    // --- chat indexing ---

    /// Incrementally index a chat session. Safe to call repeatedly as the
    /// session accumulates messages: already-indexed message ids are
    /// skipped, and the per-session summary is deleted and regenerated
    /// whenever the message set changes.
    pub async fn index_chat_session(
        &self,
        user_id: &str,
        session_id: &str,
        messages: &[ChatMessage],
    ) -> Result<ChatIndexReport, SemanticIndexError> {
        // system messages are never embedded; multimodal content is
        // reduced to its text parts
        let usable: Vec<(&ChatMessage, String)> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .filter_map(|m| {
                let text = m.content.extract_text();
                (!text.is_empty()).then(|| (m, text))
            })
            .collect();

        let indexes = self.user_indexes(user_id).await?;

        let (already_indexed, has_summary) = {
            let chat = indexes.chat.lock().map_err(Self::lock_err)?;
            let state = chat.sessions.get(session_id).cloned().unwrap_or_default();
            (state.message_ids, state.has_summary)
        };

        let staged: Vec<(&ChatMessage, String)> = usable
            .iter()
            .filter(|(m, _)| !already_indexed.contains(&m.message_id))
            .cloned()
            .collect();

        let regenerate_summary = !has_summary || !staged.is_empty();
        let summary_text = if regenerate_summary {
            let transcript: Vec<(Role, String)> = usable
                .iter()
                .map(|(m, text)| (m.role, text.clone()))
                .collect();
            summarize_session(&transcript, self.summary_max_chars)
        } else {
            None
        };

        if staged.is_empty() && summary_text.is_none() {
            return Ok(ChatIndexReport::default());
        }

        let mut texts: Vec<String> = staged.iter().map(|(_, text)| text.clone()).collect();
        if let Some(summary) = &summary_text {
            texts.push(summary.clone());
        }
        let mut vectors = self.embedder.embed_batch(&texts)?;

        // the summary text was pushed last, so its vector comes off the end
        let summary_vector = if summary_text.is_some() {
            vectors.pop()
        } else {
            None
        };

        let mut chat = indexes.chat.lock().map_err(Self::lock_err)?;
        let now = Utc::now();

        for ((message, text), vector) in staged.iter().zip(vectors) {
            chat.collection.insert(IndexedChatDocument {
                id: chat_message_doc_id(session_id, &message.message_id),
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                content_type: match message.role {
                    Role::User => ChatField::UserMessage,
                    _ => ChatField::AssistantMessage,
                },
                content: text.clone(),
                message_id: Some(message.message_id.clone()),
                timestamp: message.timestamp,
                vector,
            })?;

            chat.sessions
                .entry(session_id.to_string())
                .or_default()
                .message_ids
                .insert(message.message_id.clone());
        }

        let mut summary_written = false;
        if let (Some(summary), Some(vector)) = (summary_text, summary_vector) {
            // at most one live summary per session
            let summary_id = chat_summary_doc_id(session_id);
            chat.collection.remove(&summary_id);
            chat.collection.insert(IndexedChatDocument {
                id: summary_id,
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                content_type: ChatField::SessionSummary,
                content: summary,
                message_id: None,
                timestamp: now,
                vector,
            })?;

            chat.sessions
                .entry(session_id.to_string())
                .or_default()
                .has_summary = true;
            summary_written = true;
        }

        indexes
            .chat_storage
            .save(&chat.collection, &self.embedder.model_id_hash())?;

        log::debug!(
            "indexed {} new chat documents for session {session_id}",
            staged.len()
        );
        Ok(ChatIndexReport {
            new_messages: staged.len(),
            summary_regenerated: summary_written,
        })
    }

    // --- search ---

    /// Nearest-neighbor search over a user's page-content documents,
    /// grouped per analysis with the maximum score across the group.
    pub async fn search_browsing_content(
        &self,
        user_id: &str,
        query: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<ContentSearchHit>, SemanticIndexError> {
        let query_vector = self.embedder.embed(query)?;
        let indexes = self.user_indexes(user_id).await?;
        let content = indexes.content.lock().map_err(Self::lock_err)?;

        let hits = content.search(
            &query_vector,
            |doc| {
                opts.content_types
                    .as_ref()
                    .map(|types| types.contains(&doc.content_type))
                    .unwrap_or(true)
            },
            opts.limit,
        )?;

        let mut grouped: HashMap<String, ContentSearchHit> = HashMap::new();
        for hit in hits {
            let score = score_from_distance(hit.distance);
            let entry = grouped
                .entry(hit.record.analysis_id.clone())
                .or_insert_with(|| ContentSearchHit {
                    analysis_id: hit.record.analysis_id.clone(),
                    url: hit.record.url.clone(),
                    score,
                    matched_fields: vec![],
                });
            entry.score = entry.score.max(score);
            entry.matched_fields.push(hit.record.content_type);
        }

        let mut results: Vec<ContentSearchHit> = grouped.into_values().collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }

    /// Nearest-neighbor search over a user's chat documents, grouped per
    /// session with the maximum score across the group.
    pub async fn search_chat_history(
        &self,
        user_id: &str,
        query: &str,
        opts: &ChatSearchOptions,
    ) -> Result<Vec<ChatSearchHit>, SemanticIndexError> {
        let query_vector = self.embedder.embed(query)?;
        let indexes = self.user_indexes(user_id).await?;
        let chat = indexes.chat.lock().map_err(Self::lock_err)?;

        let hits = chat.collection.search(
            &query_vector,
            |doc| {
                opts.content_types
                    .as_ref()
                    .map(|types| types.contains(&doc.content_type))
                    .unwrap_or(true)
            },
            opts.limit,
        )?;

        let mut grouped: HashMap<String, ChatSearchHit> = HashMap::new();
        for hit in hits {
            let score = score_from_distance(hit.distance);
            let entry = grouped
                .entry(hit.record.session_id.clone())
                .or_insert_with(|| ChatSearchHit {
                    session_id: hit.record.session_id.clone(),
                    score,
                    matched_fields: vec![],
                });
            entry.score = entry.score.max(score);
            entry.matched_fields.push(hit.record.content_type);
        }

        let mut results: Vec<ChatSearchHit> = grouped.into_values().collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(results)
    }

    // --- deletion ---

    pub async fn delete_analysis_documents(
        &self,
        user_id: &str,
        analysis_id: &str,
    ) -> Result<usize, SemanticIndexError> {
        let ids = [analysis_id.to_string()];
        self.delete_analysis_documents_batch(user_id, &ids).await
    }

    /// Filtered bulk delete of every content document belonging to the
    /// given analyses. Returns the number of documents removed.
    pub async fn delete_analysis_documents_batch(
        &self,
        user_id: &str,
        analysis_ids: &[String],
    ) -> Result<usize, SemanticIndexError> {
        let targets: HashSet<&str> = analysis_ids.iter().map(String::as_str).collect();
        let indexes = self.user_indexes(user_id).await?;
        let mut content = indexes.content.lock().map_err(Self::lock_err)?;

        let removed = content.retain(|doc| !targets.contains(doc.analysis_id.as_str()));
        if removed > 0 {
            indexes
                .content_storage
                .save(&content, &self.embedder.model_id_hash())?;
        }
        Ok(removed)
    }

    pub async fn delete_chat_session_documents(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<usize, SemanticIndexError> {
        let ids = [session_id.to_string()];
        self.delete_chat_session_documents_batch(user_id, &ids).await
    }

    /// Filtered bulk delete of every chat document (messages and summary)
    /// belonging to the given sessions.
    pub async fn delete_chat_session_documents_batch(
        &self,
        user_id: &str,
        session_ids: &[String],
    ) -> Result<usize, SemanticIndexError> {
        let targets: HashSet<&str> = session_ids.iter().map(String::as_str).collect();
        let indexes = self.user_indexes(user_id).await?;
        let mut chat = indexes.chat.lock().map_err(Self::lock_err)?;

        let removed = chat
            .collection
            .retain(|doc| !targets.contains(doc.session_id.as_str()));
        chat.sessions
            .retain(|session_id, _| !targets.contains(session_id.as_str()));

        if removed > 0 {
            indexes
                .chat_storage
                .save(&chat.collection, &self.embedder.model_id_hash())?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl ContentIndexer for SemanticIndexService {
    async fn index_analysis(&self, result: &ContentAnalysisResult) -> anyhow::Result<()> {
        let fields = AnalysisFields::from_result(result);
        self.index_content_analysis(
            result.analysis_id.as_str(),
            &result.user_id,
            &result.url,
            result.timestamp,
            &fields,
        )
        .await?;
        Ok(())
    }
}
