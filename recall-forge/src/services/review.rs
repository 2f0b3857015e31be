//! Review lifecycle: rating submission and due-card selection

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{cards, reviews};
use crate::error::{ForgeError, ForgeResult};
use crate::models::{Card, SchedulingState};
use crate::services::scheduler::{compute_next_review, Rating};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use recall_common::events::{EventBus, RecallEvent};

/// Result of one rating submission
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatingOutcome {
    pub next_review_at: DateTime<Utc>,
    pub interval_days: u32,
}

/// Record a rating and advance the card's schedule
pub async fn submit_rating(
    pool: &SqlitePool,
    event_bus: &EventBus,
    card_id: Uuid,
    rating: i64,
) -> ForgeResult<RatingOutcome> {
    submit_rating_at(pool, event_bus, card_id, rating, Utc::now()).await
}

/// `submit_rating` with an explicit clock
///
/// The review log row and the new scheduling state commit together or not
/// at all.
pub async fn submit_rating_at(
    pool: &SqlitePool,
    event_bus: &EventBus,
    card_id: Uuid,
    rating: i64,
    now: DateTime<Utc>,
) -> ForgeResult<RatingOutcome> {
    let rating = Rating::new(rating)?;

    let next = retry_on_lock("submit_rating", DEFAULT_MAX_LOCK_WAIT_MS, move || async move {
        let mut tx = pool.begin().await?;

        // Write first: takes the SQLite write lock before the read
        if !cards::lock_card_for_review(&mut *tx, card_id, now).await? {
            tx.rollback().await?;
            return Err(ForgeError::CardNotFound(card_id));
        }

        let card = cards::load_card(&mut *tx, card_id)
            .await?
            .ok_or(ForgeError::CardNotFound(card_id))?;

        let next: SchedulingState = compute_next_review(rating, card.scheduling, now);

        cards::update_scheduling(&mut *tx, card_id, &next, now).await?;
        reviews::insert_review_log(&mut *tx, card_id, rating.value(), now).await?;

        tx.commit().await?;
        Ok(next)
    })
    .await?;

    tracing::info!(
        card_id = %card_id,
        rating = rating.value(),
        interval_days = next.interval_days,
        ease = next.ease,
        "Review recorded"
    );

    event_bus.emit_lossy(RecallEvent::CardReviewed {
        card_id,
        rating: rating.value(),
        interval_days: next.interval_days,
        next_review_at: next.next_review_at,
    });

    Ok(RatingOutcome {
        next_review_at: next.next_review_at,
        interval_days: next.interval_days,
    })
}

/// Earliest due card at `now`, optionally within one deck
///
/// Stable across calls: ties on due time are ordered by card id.
pub async fn get_next_due(
    pool: &SqlitePool,
    deck_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> ForgeResult<Option<Card>> {
    cards::next_due(pool, deck_id, now).await
}
