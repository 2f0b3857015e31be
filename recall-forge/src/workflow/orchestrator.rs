//! Pipeline orchestrator
//!
//! Owns the Source state machine and runs the three pipeline stages:
//!
//! 1. **Extract**: PROCESSING → COMPLETED (text stored) or FAILED
//! 2. **Generate**: candidate cards validated and inserted in one batch;
//!    adapter failure resets COMPLETED → FAILED
//! 3. **Embed**: per-card embedding and index upsert, continue-on-error;
//!    never touches Source status
//!
//! Each stage enqueues the next only after it has finished, so stages of
//! one Source never overlap. `recover_interrupted` re-queues or fails work
//! left behind by a previous process. Adapter failures are recorded (Source error log
//! or the card's `embedding_error`) and the stage returns `Ok`; only
//! storage errors propagate.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use super::tasks::{PipelineTask, TaskQueue};
use crate::db::{cards, decks, sources};
use crate::error::{ForgeError, ForgeResult};
use crate::models::{Card, Source, SourceOrigin, SourceSubmission};
use crate::services::content_extractor::{ContentExtractor, ExtractionError};
use crate::services::generation_client::{GenerationAdapter, GenerationError};
use crate::services::uploads::UploadStore;
use crate::services::vector_store::{VectorPayload, VectorStore};
use recall_common::events::{EventBus, RecallEvent};
use recall_common::SourceStatus;

/// Tunables for the pipeline stages
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Cards requested per text source (adapter default when None)
    pub cards_per_source: Option<usize>,
    /// Concurrent per-card embedding calls within one batch
    pub embedding_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cards_per_source: None,
            embedding_concurrency: 4,
        }
    }
}

/// Error log line for sources caught mid-extraction by a restart
pub const INTERRUPTED_MESSAGE: &str = "Interrupted: service restarted";

/// Work picked up again at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// PENDING sources moved on to extraction
    pub resumed: usize,
    /// PROCESSING sources failed
    pub failed: u64,
    /// COMPLETED sources queued for generation
    pub regenerating: usize,
    /// Cards queued for embedding
    pub reembedding: usize,
}

/// Outcome of one embedding batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Refuse to start when the generator and the index disagree on vector size
pub fn ensure_dimensions_match(
    generator: &dyn GenerationAdapter,
    vector_store: &dyn VectorStore,
) -> ForgeResult<()> {
    let expected = vector_store.dimension();
    let actual = generator.embedding_dimension();
    if expected != actual {
        return Err(GenerationError::DimensionMismatch { expected, actual }.into());
    }
    Ok(())
}

/// Pipeline orchestrator service
pub struct Orchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    queue: TaskQueue,
    extractor: Arc<dyn ContentExtractor>,
    generator: Arc<dyn GenerationAdapter>,
    vector_store: Arc<dyn VectorStore>,
    uploads: UploadStore,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        queue: TaskQueue,
        extractor: Arc<dyn ContentExtractor>,
        generator: Arc<dyn GenerationAdapter>,
        vector_store: Arc<dyn VectorStore>,
        uploads: UploadStore,
        config: PipelineConfig,
    ) -> Self {
        Self {
            db,
            event_bus,
            queue,
            extractor,
            generator,
            vector_store,
            uploads,
            config,
        }
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    pub fn vector_store(&self) -> &dyn VectorStore {
        self.vector_store.as_ref()
    }

    /// Validate, persist and start processing a new Source
    ///
    /// Returns once the Source is PROCESSING and its extraction task is
    /// queued. Nothing is persisted for an invalid origin, a file outside the
    /// upload folder, or an unknown deck.
    pub async fn submit_source(
        &self,
        submission: &SourceSubmission,
        deck_id: Uuid,
    ) -> ForgeResult<Uuid> {
        let origin = match submission.origin()? {
            SourceOrigin::File(path) => SourceOrigin::File(self.uploads.resolve(&path).await?),
            url => url,
        };

        if !decks::deck_exists(&self.db, deck_id).await? {
            return Err(ForgeError::DeckNotFound(deck_id));
        }

        let source = Source::new(deck_id, origin, Utc::now());
        sources::insert_source(&self.db, &source).await?;

        sources::transition_status(
            &self.db,
            source.guid,
            SourceStatus::Pending,
            SourceStatus::Processing,
            Utc::now(),
        )
        .await?;
        self.emit_status(source.guid, SourceStatus::Pending, SourceStatus::Processing);

        if let Err(e) = self.queue.enqueue(PipelineTask::Extract {
            source_id: source.guid,
        }) {
            self.fail(
                source.guid,
                SourceStatus::Processing,
                format!("Pipeline unavailable: {}", e),
            )
            .await?;
            return Err(e);
        }

        tracing::info!(
            source_id = %source.guid,
            deck_id = %deck_id,
            vision = source.origin.is_vision(),
            "Source submitted"
        );
        Ok(source.guid)
    }

    /// Pick up work a previous process left unfinished
    ///
    /// Must run before the worker pool starts. PENDING sources are moved on
    /// to extraction, PROCESSING sources are failed (their extraction died
    /// mid-flight), COMPLETED sources with no cards and no logged outcome get
    /// their generation task again, and cards with neither a vector nor an
    /// embedding error are queued for embedding.
    pub async fn recover_interrupted(&self) -> ForgeResult<RecoveryReport> {
        let failed = sources::fail_stale_sources(&self.db, INTERRUPTED_MESSAGE, Utc::now()).await?;
        let mut report = RecoveryReport {
            failed,
            ..RecoveryReport::default()
        };

        for source_id in sources::list_source_ids_with_status(&self.db, SourceStatus::Pending).await? {
            sources::transition_status(
                &self.db,
                source_id,
                SourceStatus::Pending,
                SourceStatus::Processing,
                Utc::now(),
            )
            .await?;
            self.emit_status(source_id, SourceStatus::Pending, SourceStatus::Processing);
            self.queue.enqueue(PipelineTask::Extract { source_id })?;
            report.resumed += 1;
        }

        for source in sources::list_completed_without_cards(&self.db).await? {
            self.queue.enqueue(PipelineTask::Generate {
                source_id: source.guid,
                vision: source.origin.is_vision(),
            })?;
            report.regenerating += 1;
        }

        let unembedded = cards::list_unembedded_card_ids(&self.db).await?;
        report.reembedding = unembedded.len();
        self.enqueue_embedding(unembedded)?;

        if report == RecoveryReport::default() {
            tracing::debug!("No interrupted pipeline work found");
        } else {
            tracing::info!(
                resumed = report.resumed,
                failed = report.failed,
                regenerating = report.regenerating,
                reembedding = report.reembedding,
                "Recovered interrupted pipeline work"
            );
        }
        Ok(report)
    }

    /// Queue an embedding batch (no-op for an empty id list)
    pub fn enqueue_embedding(&self, card_ids: Vec<Uuid>) -> ForgeResult<()> {
        if card_ids.is_empty() {
            return Ok(());
        }
        self.queue.enqueue(PipelineTask::Embed { card_ids })
    }

    /// Run one task to completion
    pub async fn run_task(&self, task: PipelineTask) -> ForgeResult<()> {
        match task {
            PipelineTask::Extract { source_id } => self.run_extraction(source_id).await,
            PipelineTask::Generate { source_id, vision } => {
                self.run_generation(source_id, vision).await
            }
            PipelineTask::Embed { card_ids } => self.run_embedding(&card_ids).await.map(|_| ()),
        }
    }

    /// Stage 1: extraction
    pub async fn run_extraction(&self, source_id: Uuid) -> ForgeResult<()> {
        let source = sources::require_source(&self.db, source_id).await?;

        if source.status != SourceStatus::Processing {
            tracing::debug!(
                source_id = %source_id,
                status = %source.status,
                "Extraction skipped, source not PROCESSING"
            );
            return Ok(());
        }

        let url = match &source.origin {
            SourceOrigin::File(path) => {
                // Vision path: the generator reads the file itself
                sources::complete_extraction(&self.db, source_id, "", Utc::now()).await?;
                self.emit_status(source_id, SourceStatus::Processing, SourceStatus::Completed);
                tracing::info!(
                    source_id = %source_id,
                    file = %path.display(),
                    "File source handed to vision generation"
                );
                return self.queue.enqueue(PipelineTask::Generate {
                    source_id,
                    vision: true,
                });
            }
            SourceOrigin::Url(url) => url,
        };

        let extracted = match self.extractor.extract(url).await {
            Ok(text) if text.trim().is_empty() => Err(ExtractionError::EmptyContent(url.clone())),
            other => other,
        };
        let text = match extracted {
            Ok(text) => text,
            Err(e) => {
                return self
                    .fail(
                        source_id,
                        SourceStatus::Processing,
                        ForgeError::ExtractionFailed(e).to_string(),
                    )
                    .await;
            }
        };

        sources::complete_extraction(&self.db, source_id, &text, Utc::now()).await?;
        self.emit_status(source_id, SourceStatus::Processing, SourceStatus::Completed);

        tracing::info!(
            source_id = %source_id,
            chars = text.len(),
            "Extraction completed"
        );

        self.queue.enqueue(PipelineTask::Generate {
            source_id,
            vision: false,
        })
    }

    /// Stage 2: card generation
    pub async fn run_generation(&self, source_id: Uuid, vision: bool) -> ForgeResult<()> {
        let source = sources::require_source(&self.db, source_id).await?;

        match source.status {
            SourceStatus::Completed => {}
            SourceStatus::Failed => {
                tracing::debug!(source_id = %source_id, "Generation skipped, source FAILED");
                return Ok(());
            }
            other => {
                tracing::warn!(
                    source_id = %source_id,
                    status = %other,
                    "Generation skipped, extraction has not completed"
                );
                return Ok(());
            }
        }

        // Re-delivery: cards already exist, only finish their embeddings.
        // Cheap early exit; the insert below re-checks under the write lock.
        let existing = cards::list_cards_for_source(&self.db, source_id).await?;
        if !existing.is_empty() {
            let unembedded: Vec<Uuid> = existing
                .iter()
                .filter(|c| c.vector_id.is_none())
                .map(|c| c.guid)
                .collect();
            tracing::info!(
                source_id = %source_id,
                existing = existing.len(),
                unembedded = unembedded.len(),
                "Cards already generated for source, skipping generation"
            );
            return self.enqueue_embedding(unembedded);
        }

        if vision != source.origin.is_vision() {
            tracing::warn!(
                source_id = %source_id,
                vision,
                "Vision flag disagrees with source origin, using origin"
            );
        }

        let generated = match &source.origin {
            SourceOrigin::File(path) => self.generator.generate_cards_from_file(path).await,
            SourceOrigin::Url(_) => {
                self.generator
                    .generate_cards(&source.extracted_text, self.config.cards_per_source)
                    .await
            }
        };

        let candidates = match generated {
            Ok(candidates) => candidates,
            Err(e) => {
                return self
                    .fail(
                        source_id,
                        SourceStatus::Completed,
                        format!("Generation error: {}", e),
                    )
                    .await;
            }
        };

        let candidate_count = candidates.len();
        let now = Utc::now();
        let new_cards: Vec<Card> = candidates
            .into_iter()
            .filter_map(|candidate| candidate.validate())
            .map(|content| Card::new(source.deck_id, Some(source_id), content, now))
            .collect();
        let dropped = candidate_count - new_cards.len();

        if dropped > 0 {
            tracing::warn!(
                source_id = %source_id,
                dropped,
                accepted = new_cards.len(),
                "Dropped candidate cards missing front or back"
            );
        }

        if new_cards.is_empty() {
            sources::append_error_log(
                &self.db,
                source_id,
                &format!(
                    "Generation produced no valid cards ({} candidates dropped)",
                    dropped
                ),
                Utc::now(),
            )
            .await?;
            self.emit_cards_generated(&source, 0, dropped);
            return Ok(());
        }

        if !cards::insert_cards_for_source(&self.db, source_id, &new_cards, Utc::now()).await? {
            tracing::info!(
                source_id = %source_id,
                "Concurrent generation already stored cards for source, discarding batch"
            );
            return Ok(());
        }
        self.emit_cards_generated(&source, new_cards.len(), dropped);

        tracing::info!(
            source_id = %source_id,
            deck_id = %source.deck_id,
            cards = new_cards.len(),
            "Cards generated"
        );

        self.enqueue_embedding(new_cards.iter().map(|c| c.guid).collect())
    }

    /// Stage 3: embedding and indexing
    ///
    /// Every card is attempted; a failure is stored on that card only.
    pub async fn run_embedding(&self, card_ids: &[Uuid]) -> ForgeResult<EmbeddingReport> {
        let batch = cards::load_cards(&self.db, card_ids).await?;
        let missing = card_ids.len() - batch.len();
        if missing > 0 {
            tracing::warn!(missing, "Embedding batch references cards that no longer exist");
        }

        let concurrency = self.config.embedding_concurrency.max(1);
        let outcomes: Vec<bool> = stream::iter(batch)
            .map(|card| self.embed_card(card))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|ok| **ok).count();
        let report = EmbeddingReport {
            succeeded,
            failed: outcomes.len() - succeeded + missing,
        };

        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Embedding batch finished"
        );
        self.event_bus.emit_lossy(RecallEvent::EmbeddingFinished {
            succeeded: report.succeeded,
            failed: report.failed,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    async fn embed_card(&self, card: Card) -> bool {
        let card_id = card.guid;

        let result = async {
            let vector = self.generator.embed(&card.content.embedding_input()).await?;
            let payload = VectorPayload {
                front: card.content.front.clone(),
                back: card.content.back.clone(),
                deck_id: card.deck_id,
            };
            let reference = self.vector_store.upsert(card_id, &vector, payload).await?;
            Ok::<_, ForgeError>(reference)
        }
        .await;

        match result {
            Ok(reference) => match cards::set_vector_ref(&self.db, card_id, &reference).await {
                Ok(()) => {
                    tracing::debug!(card_id = %card_id, "Card embedded");
                    true
                }
                Err(e) => {
                    tracing::error!(card_id = %card_id, error = %e, "Failed to store vector reference");
                    false
                }
            },
            Err(e) => {
                tracing::warn!(card_id = %card_id, error = %e, "Card embedding failed");
                if let Err(db_err) =
                    cards::set_embedding_error(&self.db, card_id, &e.to_string()).await
                {
                    tracing::error!(
                        card_id = %card_id,
                        error = %db_err,
                        "Failed to record embedding error"
                    );
                }
                false
            }
        }
    }

    /// Record a stage failure and move the Source to FAILED
    async fn fail(&self, source_id: Uuid, from: SourceStatus, message: String) -> ForgeResult<()> {
        tracing::warn!(source_id = %source_id, error = %message, "Pipeline stage failed");
        sources::fail_source(&self.db, source_id, from, &message, Utc::now()).await?;
        self.emit_status(source_id, from, SourceStatus::Failed);
        Ok(())
    }

    fn emit_status(&self, source_id: Uuid, old_status: SourceStatus, new_status: SourceStatus) {
        self.event_bus.emit_lossy(RecallEvent::SourceStatusChanged {
            source_id,
            old_status,
            new_status,
            timestamp: Utc::now(),
        });
    }

    fn emit_cards_generated(&self, source: &Source, card_count: usize, dropped: usize) {
        self.event_bus.emit_lossy(RecallEvent::CardsGenerated {
            source_id: source.guid,
            deck_id: source.deck_id,
            card_count,
            dropped_candidates: dropped,
            timestamp: Utc::now(),
        });
    }
}
