//! Shared test doubles: deterministic embedder, programmable provider,
//! canned capture source, and a fully wired pipeline over a temp dir.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::analysis::queue::AnalysisQueue;
use crate::analysis::worker::ContentIndexer;
use crate::analysis::{AnalysisIntake, AnalysisWorker, ContentAnalysisResult};
use crate::capture::{CaptureSource, ScreenshotCapture, ScreenshotMetadata, StructuredText};
use crate::config::Config;
use crate::provider::{AnalysisProvider, ProviderError};
use crate::registry::FileCategoryRegistry;
use crate::semantic::embedder::{EmbedError, Embedder};
use crate::semantic::SemanticIndexService;
use crate::storage::BackendLocal;
use crate::store::AnalysisStore;

/// Deterministic bag-of-words embedder: tokens hash into buckets, so
/// texts sharing words land near each other. No model downloads.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self { dims: 16 }
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash-test-embedder"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0f32; self.dims];
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            token.hash(&mut hasher);
            vector[(hasher.finish() as usize) % self.dims] += 1.0;
        }
        if vector.iter().all(|x| *x == 0.0) {
            vector[0] = 1.0;
        }
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// What the stub provider should answer on a given call.
#[derive(Clone, Debug)]
pub enum StubResponse {
    Reply(String),
    RateLimited,
    ServerError,
}

/// Scripted provider: pops queued responses, then falls back to a fixed
/// reply (or a server error when none is set). Counts calls.
pub struct StubProvider {
    script: Mutex<VecDeque<StubResponse>>,
    fallback: Option<StubResponse>,
    pub calls: AtomicUsize,
}

impl StubProvider {
    pub fn scripted(script: Vec<StubResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(reply: &str) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(StubResponse::Reply(reply.to_string())),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisProvider for StubProvider {
    async fn generate(&self, _prompt: &str, _image: &[u8]) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.fallback.clone());

        match next {
            Some(StubResponse::Reply(reply)) => Ok(reply),
            Some(StubResponse::RateLimited) => {
                Err(ProviderError::RateLimited("too many requests".to_string()))
            }
            Some(StubResponse::ServerError) | None => Err(ProviderError::Status {
                status: 500,
                body: "stub exhausted".to_string(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        "stub-model"
    }
}

/// A well-formed model reply for a news page.
pub const NEWS_REPLY: &str = r#"{
    "description": "A news site front page with current headlines and world events coverage.",
    "visual_description": "Dense grid of article cards with thumbnails.",
    "category": "news",
    "subcategory": "world news",
    "brand": "Example News",
    "languages": ["en"],
    "primary_language": "en"
}"#;

pub struct StubCapture {
    pub html: String,
    pub text: StructuredText,
    pub image: Vec<u8>,
}

impl StubCapture {
    pub fn news_page() -> Self {
        Self {
            html: "<html><body><h1>World News</h1><p>Headlines of the day.</p></body></html>"
                .to_string(),
            text: StructuredText {
                title: "World News Today".to_string(),
                meta_description: Some("Breaking news and headlines".to_string()),
                headings: vec!["World News".to_string()],
                paragraphs: vec!["Headlines of the day.".to_string()],
                links: vec![],
                full_text: "World News Headlines of the day.".to_string(),
                text_length: 32,
            },
            image: vec![0x89, 0x50, 0x4E, 0x47, 1, 2, 3, 4],
        }
    }

    pub fn empty() -> Self {
        Self {
            html: String::new(),
            text: StructuredText::default(),
            image: vec![],
        }
    }

    pub fn with_html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }
}

#[async_trait]
impl CaptureSource for StubCapture {
    async fn html(&self) -> anyhow::Result<String> {
        Ok(self.html.clone())
    }

    async fn structured_text(&self) -> anyhow::Result<StructuredText> {
        Ok(self.text.clone())
    }

    async fn screenshot_with_metadata(&self) -> anyhow::Result<ScreenshotCapture> {
        Ok(ScreenshotCapture {
            image: self.image.clone(),
            metadata: ScreenshotMetadata::default(),
        })
    }
}

/// An indexer that always fails, for §4.1's "indexing failure must not
/// fail the analysis" behavior.
pub struct FailingIndexer;

#[async_trait]
impl ContentIndexer for FailingIndexer {
    async fn index_analysis(&self, _result: &ContentAnalysisResult) -> anyhow::Result<()> {
        anyhow::bail!("index exploded")
    }
}

/// Everything wired over one temp dir: intake + worker sharing a queue,
/// a stub provider, and a semantic service as the worker's indexer.
pub struct TestPipeline {
    /// Held so the temp dir outlives the run.
    pub _dir: tempfile::TempDir,
    pub backend: Arc<BackendLocal>,
    pub store: AnalysisStore,
    pub queue: Arc<AnalysisQueue>,
    pub intake: AnalysisIntake,
    pub worker: AnalysisWorker,
    pub provider: Arc<StubProvider>,
    pub semantic: Arc<SemanticIndexService>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    // milliseconds, so backoff tests finish quickly
    config.backoff_unit_ms = 20;
    config.poll_interval_ms = 50;
    config
}

pub fn pipeline_with(provider: StubProvider, config: Config) -> TestPipeline {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(BackendLocal::new(dir.path()).unwrap());
    let config = Arc::new(config);

    let store = AnalysisStore::new(backend.clone());
    let queue = Arc::new(AnalysisQueue::new(backend.clone()));
    let wake = Arc::new(Notify::new());
    let provider = Arc::new(provider);
    let registry = Arc::new(FileCategoryRegistry::new(backend.clone()));

    let semantic = Arc::new(SemanticIndexService::new(
        Arc::new(HashEmbedder::new()),
        dir.path().to_path_buf(),
        config.semantic.summary_max_chars,
    ));

    let intake = AnalysisIntake::new(config.clone(), store.clone(), queue.clone(), wake.clone());
    let worker = AnalysisWorker::new(
        config,
        queue.clone(),
        store.clone(),
        provider.clone(),
        registry,
        Some(semantic.clone() as Arc<dyn ContentIndexer>),
        wake,
    );

    TestPipeline {
        _dir: dir,
        backend,
        store,
        queue,
        intake,
        worker,
        provider,
        semantic,
    }
}

pub fn pipeline(provider: StubProvider) -> TestPipeline {
    pipeline_with(provider, test_config())
}
