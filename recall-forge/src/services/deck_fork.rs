//! Deck fork
//!
//! Copies a deck's card content into a new child deck. Copies start with
//! fresh scheduling, no source reference and no vector reference; callers
//! re-embed the returned card ids so the fork is indexed under its own ids.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{cards, decks};
use crate::error::{ForgeError, ForgeResult};
use crate::models::{Card, Deck};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use recall_common::events::{EventBus, RecallEvent};

/// Ids produced by a fork
#[derive(Debug, Clone, Serialize)]
pub struct ForkOutcome {
    pub deck_id: Uuid,
    pub parent_deck_id: Uuid,
    pub card_ids: Vec<Uuid>,
}

/// Fork `deck_id` for `new_owner` in one transaction
pub async fn fork_deck(
    pool: &SqlitePool,
    event_bus: &EventBus,
    deck_id: Uuid,
    new_owner: Option<String>,
    now: DateTime<Utc>,
) -> ForgeResult<ForkOutcome> {
    let outcome = retry_on_lock("fork_deck", DEFAULT_MAX_LOCK_WAIT_MS, || {
        let new_owner = new_owner.clone();
        async move {
            let mut tx = pool.begin().await?;

            let parent = decks::load_deck(&mut *tx, deck_id)
                .await?
                .ok_or(ForgeError::DeckNotFound(deck_id))?;
            let fork = Deck::fork_of(&parent, new_owner, now);
            decks::insert_deck(&mut *tx, &fork).await?;

            let originals = cards::list_cards_for_deck_conn(&mut *tx, deck_id).await?;
            let mut card_ids = Vec::with_capacity(originals.len());
            for original in originals {
                let copy = Card::new(fork.guid, None, original.content, now);
                cards::insert_card(&mut *tx, &copy).await?;
                card_ids.push(copy.guid);
            }

            tx.commit().await?;

            Ok(ForkOutcome {
                deck_id: fork.guid,
                parent_deck_id: deck_id,
                card_ids,
            })
        }
    })
    .await?;

    tracing::info!(
        parent_deck_id = %deck_id,
        deck_id = %outcome.deck_id,
        card_count = outcome.card_ids.len(),
        "Deck forked"
    );

    event_bus.emit_lossy(RecallEvent::DeckForked {
        parent_deck_id: deck_id,
        deck_id: outcome.deck_id,
        card_count: outcome.card_ids.len(),
        timestamp: now,
    });

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::models::{CardContent, Difficulty, NewDeck};

    #[tokio::test]
    async fn test_missing_deck_is_not_found() {
        let pool = init_memory_pool().await.unwrap();
        let bus = EventBus::new(8);
        let missing = Uuid::new_v4();

        let err = fork_deck(&pool, &bus, missing, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::DeckNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_fork_copies_content_only() {
        let pool = init_memory_pool().await.unwrap();
        let bus = EventBus::new(8);
        let parent = decks::create_deck(
            &pool,
            NewDeck {
                name: "Spanish".into(),
                description: Some("Verbs".into()),
                owner: Some("alice".into()),
            },
            Utc::now(),
        )
        .await
        .unwrap();

        let mut content = CardContent::basic("to eat", "comer");
        content.difficulty = Difficulty::Advanced;
        content.visual_payload = Some("<svg/>".into());
        let mut original = Card::new(parent.guid, None, content.clone(), Utc::now());
        original.vector_id = Some(original.guid.to_string());
        original.scheduling.repetitions = 4;
        original.scheduling.interval_days = 12;
        cards::insert_cards(&pool, std::slice::from_ref(&original)).await.unwrap();

        let outcome = fork_deck(&pool, &bus, parent.guid, Some("bob".into()), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.card_ids.len(), 1);

        let mut conn = pool.acquire().await.unwrap();
        let fork = decks::load_deck(&mut conn, outcome.deck_id).await.unwrap().unwrap();
        drop(conn);
        assert_eq!(fork.name, "Fork of Spanish");
        assert_eq!(fork.description.as_deref(), Some("Verbs"));
        assert_eq!(fork.owner.as_deref(), Some("bob"));
        assert_eq!(fork.parent_deck_id, Some(parent.guid));

        let copies = cards::list_cards_for_deck(&pool, outcome.deck_id).await.unwrap();
        assert_eq!(copies[0].content, content);
        assert_eq!(copies[0].scheduling.repetitions, 0);
        assert_eq!(copies[0].scheduling.interval_days, 0);
        assert!(copies[0].vector_id.is_none());
        assert!(copies[0].source_id.is_none());
    }
}
