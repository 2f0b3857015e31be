//! Data models for recall-forge
//!
//! Deck, Source (ingestion job), Card and ReviewLog records.

pub mod card;
pub mod deck;
pub mod source;

pub use card::{
    CandidateCard, Card, CardContent, Difficulty, SchedulingState, DEFAULT_EASE, MIN_EASE,
};
pub use deck::{Deck, NewDeck};
pub use source::{Source, SourceOrigin, SourceSubmission};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Immutable record of one rating event
#[derive(Debug, Clone, Serialize)]
pub struct ReviewLog {
    pub id: i64,
    pub card_id: Uuid,
    pub rating: u8,
    pub reviewed_at: DateTime<Utc>,
}
