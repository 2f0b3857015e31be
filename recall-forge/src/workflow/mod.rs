//! Ingestion pipeline
//!
//! Extraction, generation and embedding run as independent tasks on a
//! queue consumed by the worker pool. See [`orchestrator`] for the stage
//! semantics.

pub mod orchestrator;
pub mod tasks;
pub mod worker_pool;

pub use orchestrator::{
    ensure_dimensions_match, EmbeddingReport, Orchestrator, PipelineConfig, RecoveryReport,
    INTERRUPTED_MESSAGE,
};
pub use tasks::{PipelineTask, TaskQueue};
pub use worker_pool::WorkerPool;
