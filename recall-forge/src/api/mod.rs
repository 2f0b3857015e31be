//! HTTP API handlers for recall-forge
//!
//! Thin JSON layer over the orchestrator, review and fork services, plus
//! the SSE event stream.

pub mod cards;
pub mod decks;
pub mod events;
pub mod health;
pub mod ingest;
pub mod review;

pub use cards::card_routes;
pub use decks::deck_routes;
pub use events::event_routes;
pub use health::health_routes;
pub use ingest::ingest_routes;
pub use review::review_routes;
