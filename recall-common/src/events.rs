//! Event types and broadcast bus
//!
//! Pipeline stages and the review lifecycle emit `RecallEvent`s so that
//! observers (the `/events` SSE stream, tests) can follow progress
//! without polling the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::status::SourceStatus;

/// RecallForge event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RecallEvent {
    /// Source moved between ingestion states
    SourceStatusChanged {
        source_id: Uuid,
        old_status: SourceStatus,
        new_status: SourceStatus,
        timestamp: DateTime<Utc>,
    },

    /// Generation stage persisted a batch of cards
    CardsGenerated {
        source_id: Uuid,
        deck_id: Uuid,
        card_count: usize,
        dropped_candidates: usize,
        timestamp: DateTime<Utc>,
    },

    /// Embedding stage finished one batch
    EmbeddingFinished {
        succeeded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// A rating was recorded and the card rescheduled
    CardReviewed {
        card_id: Uuid,
        rating: u8,
        interval_days: u32,
        next_review_at: DateTime<Utc>,
    },

    /// A deck was forked
    DeckForked {
        parent_deck_id: Uuid,
        deck_id: Uuid,
        card_count: usize,
        timestamp: DateTime<Utc>,
    },
}

impl RecallEvent {
    /// Event type name (matches the serde tag)
    pub fn event_type(&self) -> &str {
        match self {
            RecallEvent::SourceStatusChanged { .. } => "SourceStatusChanged",
            RecallEvent::CardsGenerated { .. } => "CardsGenerated",
            RecallEvent::EmbeddingFinished { .. } => "EmbeddingFinished",
            RecallEvent::CardReviewed { .. } => "CardReviewed",
            RecallEvent::DeckForked { .. } => "DeckForked",
        }
    }
}

/// Broadcast bus for `RecallEvent`s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RecallEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<RecallEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: RecallEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
