//! Shared fixtures for recall-forge integration tests
//!
//! Hand-written adapter doubles plus a harness that wires an orchestrator to
//! an in-memory database and a temporary upload folder, and lets a test
//! drain the task queue by hand.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tempfile::TempDir;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use recall_common::events::EventBus;
use recall_forge::db::{decks, init_memory_pool};
use recall_forge::models::{CandidateCard, NewDeck};
use recall_forge::services::{
    ContentExtractor, ExtractionError, GenerationAdapter, GenerationError, InMemoryVectorStore,
    UploadStore,
};
use recall_forge::workflow::{Orchestrator, PipelineConfig, PipelineTask, TaskQueue};

pub const TEST_DIMENSION: usize = 8;

/// Marker in a card front that makes the fake embedder fail for that card
pub const FAIL_EMBED_MARKER: &str = "[no-embed]";

/// Extractor serving fixed pages; unknown URLs answer HTTP 404
#[derive(Default)]
pub struct FakeExtractor {
    pages: HashMap<String, String>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), text.to_string());
        self
    }
}

#[async_trait]
impl ContentExtractor for FakeExtractor {
    async fn extract(&self, url: &str) -> Result<String, ExtractionError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| ExtractionError::HttpStatus(404, url.to_string()))
    }
}

/// Generator returning canned candidates and deterministic embeddings
pub struct FakeGenerator {
    candidates: Vec<Value>,
    fail_generation: bool,
    dimension: usize,
    pub text_calls: AtomicUsize,
    pub file_calls: AtomicUsize,
    pub embed_calls: AtomicUsize,
}

impl FakeGenerator {
    pub fn returning(candidates: Vec<Value>) -> Self {
        Self {
            candidates,
            fail_generation: false,
            dimension: TEST_DIMENSION,
            text_calls: AtomicUsize::new(0),
            file_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fail_generation: true,
            ..Self::returning(Vec::new())
        }
    }

    fn candidates(&self) -> Result<Vec<CandidateCard>, GenerationError> {
        if self.fail_generation {
            return Err(GenerationError::GenerationUnavailable(
                "model offline".to_string(),
            ));
        }
        // Same per-element leniency as the real parser
        Ok(self
            .candidates
            .iter()
            .map(|v| serde_json::from_value(v.clone()).unwrap_or_default())
            .collect())
    }
}

#[async_trait]
impl GenerationAdapter for FakeGenerator {
    async fn generate_cards(
        &self,
        _text: &str,
        _target_count: Option<usize>,
    ) -> Result<Vec<CandidateCard>, GenerationError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        self.candidates()
    }

    async fn generate_cards_from_file(
        &self,
        path: &Path,
    ) -> Result<Vec<CandidateCard>, GenerationError> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        if !path.exists() {
            return Err(GenerationError::SourceUnreadable(path.display().to_string()));
        }
        self.candidates()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GenerationError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if text.contains(FAIL_EMBED_MARKER) {
            return Err(GenerationError::EmbeddingUnavailable(
                "quota exceeded".to_string(),
            ));
        }
        let seed = text.len() as f32;
        Ok((0..self.dimension).map(|i| seed + i as f32).collect())
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }
}

/// Orchestrator over an in-memory database with a hand-driven queue
pub struct Harness {
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub orchestrator: Arc<Orchestrator>,
    pub receiver: UnboundedReceiver<PipelineTask>,
    pub extractor: Arc<FakeExtractor>,
    pub generator: Arc<FakeGenerator>,
    pub store: Arc<InMemoryVectorStore>,
    pub uploads: UploadStore,
    pub deck_id: Uuid,
    _upload_root: TempDir,
}

impl Harness {
    pub async fn new(extractor: FakeExtractor, generator: FakeGenerator) -> Self {
        let pool = init_memory_pool().await.unwrap();
        let deck = decks::create_deck(
            &pool,
            NewDeck {
                name: "Cell Biology".into(),
                description: Some("Organelles and membranes".into()),
                owner: Some("owner-1".into()),
            },
            Utc::now(),
        )
        .await
        .unwrap();

        let upload_root = TempDir::new().unwrap();
        let uploads = UploadStore::open(upload_root.path().join("uploads")).await.unwrap();

        let event_bus = EventBus::new(64);
        let (queue, receiver) = TaskQueue::new();
        let extractor = Arc::new(extractor);
        let generator = Arc::new(generator);
        let store = Arc::new(InMemoryVectorStore::new(TEST_DIMENSION));

        let orchestrator = Arc::new(Orchestrator::new(
            pool.clone(),
            event_bus.clone(),
            queue,
            extractor.clone(),
            generator.clone(),
            store.clone(),
            uploads.clone(),
            PipelineConfig::default(),
        ));

        Self {
            pool,
            event_bus,
            orchestrator,
            receiver,
            extractor,
            generator,
            store,
            uploads,
            deck_id: deck.guid,
            _upload_root: upload_root,
        }
    }

    /// Replace the orchestrator and queue as a process restart would
    ///
    /// Queued tasks are lost; the database, adapters and uploads survive.
    pub fn restart(&mut self) {
        let (queue, receiver) = TaskQueue::new();
        self.orchestrator = Arc::new(Orchestrator::new(
            self.pool.clone(),
            self.event_bus.clone(),
            queue,
            self.extractor.clone(),
            self.generator.clone(),
            self.store.clone(),
            self.uploads.clone(),
            PipelineConfig::default(),
        ));
        self.receiver = receiver;
    }

    /// Store a file in the upload folder and return its path
    pub async fn upload(&self, name: &str, bytes: &[u8]) -> PathBuf {
        self.uploads.save(Some(name), bytes).await.unwrap()
    }

    /// Run queued tasks (and the tasks they enqueue) until the queue is empty
    ///
    /// Returns the stages in the order they ran.
    pub async fn drain(&mut self) -> Vec<&'static str> {
        let mut stages = Vec::new();
        while let Ok(task) = self.receiver.try_recv() {
            stages.push(task.stage());
            self.orchestrator.run_task(task).await.unwrap();
        }
        stages
    }
}

pub fn card_json(front: &str, back: &str) -> Value {
    serde_json::json!({ "front": front, "back": back })
}
