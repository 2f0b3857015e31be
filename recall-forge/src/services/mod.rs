//! Service modules for recall-forge
//!
//! External adapters (content extraction, generation, vector index) sit
//! behind traits. The upload folder guards file sources. The scheduler,
//! review and fork services are plain functions over the database pool.

pub mod content_extractor;
pub mod deck_fork;
pub mod generation_client;
pub mod review;
pub mod scheduler;
pub mod uploads;
pub mod vector_store;
pub mod youtube;

pub use content_extractor::{ContentExtractor, ExtractionError, RoutingExtractor, WebExtractor};
pub use deck_fork::{fork_deck, ForkOutcome};
pub use generation_client::{GeminiClient, GenerationAdapter, GenerationError};
pub use review::{get_next_due, submit_rating, submit_rating_at, RatingOutcome};
pub use scheduler::{compute_next_review, Rating};
pub use uploads::UploadStore;
pub use vector_store::{InMemoryVectorStore, QdrantStore, VectorPayload, VectorStore, VectorStoreError};
pub use youtube::YoutubeExtractor;
