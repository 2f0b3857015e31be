//! Card database operations
//!
//! Content columns are written once on insert. Scheduling columns are
//! written only by the review path (`update_scheduling`), vector columns
//! only by the embedding stage.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::{parse_optional_uuid, parse_uuid};
use crate::error::{ForgeError, ForgeResult};
use crate::models::{Card, CardContent, SchedulingState};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use recall_common::time::{from_millis, to_millis};

const CARD_COLUMNS: &str = r#"
    guid, deck_id, source_id, front, back, hint, difficulty, tags, visual_payload,
    vector_id, embedding_error, ease, interval_days, repetitions, next_review_at,
    created_at
"#;

/// Insert one card using an existing connection or transaction
pub async fn insert_card(conn: &mut SqliteConnection, card: &Card) -> ForgeResult<()> {
    let tags = serde_json::to_string(&card.content.tags).map_err(|e| {
        ForgeError::Common(recall_common::Error::Internal(format!(
            "Serialize tags failed: {}",
            e
        )))
    })?;

    sqlx::query(
        r#"
        INSERT INTO cards (
            guid, deck_id, source_id, front, back, hint, difficulty, tags, visual_payload,
            vector_id, embedding_error, ease, interval_days, repetitions, next_review_at,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(card.guid.to_string())
    .bind(card.deck_id.to_string())
    .bind(card.source_id.map(|id| id.to_string()))
    .bind(&card.content.front)
    .bind(&card.content.back)
    .bind(&card.content.hint)
    .bind(card.content.difficulty.as_str())
    .bind(tags)
    .bind(&card.content.visual_payload)
    .bind(&card.vector_id)
    .bind(&card.embedding_error)
    .bind(card.scheduling.ease)
    .bind(card.scheduling.interval_days as i64)
    .bind(card.scheduling.repetitions as i64)
    .bind(to_millis(card.scheduling.next_review_at))
    .bind(to_millis(card.created_at))
    .bind(to_millis(card.created_at))
    .execute(conn)
    .await?;

    Ok(())
}

/// Insert a batch of cards atomically
///
/// Either every card is written or none is.
pub async fn insert_cards(pool: &SqlitePool, cards: &[Card]) -> ForgeResult<()> {
    if cards.is_empty() {
        return Ok(());
    }

    retry_on_lock("insert_cards", DEFAULT_MAX_LOCK_WAIT_MS, move || async move {
        let mut tx = pool.begin().await?;
        for card in cards {
            insert_card(&mut *tx, card).await?;
        }
        tx.commit().await?;
        Ok(())
    })
    .await?;

    tracing::debug!(count = cards.len(), "Inserted card batch");
    Ok(())
}

/// Insert the generated cards of a source unless it already has cards
///
/// The source row is touched first so the transaction holds the write lock
/// before the existence check; two generation runs of the same source cannot
/// both see "no cards". Returns false (and writes nothing) when cards exist.
pub async fn insert_cards_for_source(
    pool: &SqlitePool,
    source_id: Uuid,
    cards: &[Card],
    now: DateTime<Utc>,
) -> ForgeResult<bool> {
    let inserted = retry_on_lock(
        "insert_cards_for_source",
        DEFAULT_MAX_LOCK_WAIT_MS,
        move || async move {
            let mut tx = pool.begin().await?;

            let touched = sqlx::query("UPDATE sources SET updated_at = ? WHERE guid = ?")
                .bind(to_millis(now))
                .bind(source_id.to_string())
                .execute(&mut *tx)
                .await?;
            if touched.rows_affected() == 0 {
                return Err(ForgeError::SourceNotFound(source_id));
            }

            let existing: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM cards WHERE source_id = ?")
                    .bind(source_id.to_string())
                    .fetch_one(&mut *tx)
                    .await?;
            if existing > 0 {
                tx.rollback().await?;
                return Ok(false);
            }

            for card in cards {
                insert_card(&mut *tx, card).await?;
            }
            tx.commit().await?;
            Ok(true)
        },
    )
    .await?;

    if inserted {
        tracing::debug!(source_id = %source_id, count = cards.len(), "Inserted source cards");
    }
    Ok(inserted)
}

/// Load a card by id
pub async fn load_card(conn: &mut SqliteConnection, card_id: Uuid) -> ForgeResult<Option<Card>> {
    let sql = format!("SELECT {} FROM cards WHERE guid = ?", CARD_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(card_id.to_string())
        .fetch_optional(conn)
        .await?;

    row.map(|r| row_to_card(&r)).transpose()
}

/// Load several cards by id, skipping ids that no longer exist
pub async fn load_cards(pool: &SqlitePool, card_ids: &[Uuid]) -> ForgeResult<Vec<Card>> {
    let mut conn = pool.acquire().await?;
    let mut cards = Vec::with_capacity(card_ids.len());
    for id in card_ids {
        if let Some(card) = load_card(&mut conn, *id).await? {
            cards.push(card);
        }
    }
    Ok(cards)
}

/// All cards of a deck in creation order
pub async fn list_cards_for_deck(pool: &SqlitePool, deck_id: Uuid) -> ForgeResult<Vec<Card>> {
    let mut conn = pool.acquire().await?;
    list_cards_for_deck_conn(&mut conn, deck_id).await
}

/// All cards of a deck, on an existing connection or transaction
pub async fn list_cards_for_deck_conn(
    conn: &mut SqliteConnection,
    deck_id: Uuid,
) -> ForgeResult<Vec<Card>> {
    let sql = format!(
        "SELECT {} FROM cards WHERE deck_id = ? ORDER BY created_at ASC, guid ASC",
        CARD_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(deck_id.to_string())
        .fetch_all(conn)
        .await?;

    rows.iter().map(row_to_card).collect()
}

/// Cards produced by one source
pub async fn list_cards_for_source(pool: &SqlitePool, source_id: Uuid) -> ForgeResult<Vec<Card>> {
    let sql = format!(
        "SELECT {} FROM cards WHERE source_id = ? ORDER BY created_at ASC, guid ASC",
        CARD_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(source_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(row_to_card).collect()
}

/// Every card, optionally restricted to one deck
pub async fn list_cards(pool: &SqlitePool, deck_id: Option<Uuid>) -> ForgeResult<Vec<Card>> {
    match deck_id {
        Some(deck_id) => list_cards_for_deck(pool, deck_id).await,
        None => {
            let sql = format!(
                "SELECT {} FROM cards ORDER BY created_at ASC, guid ASC",
                CARD_COLUMNS
            );
            let rows = sqlx::query(&sql).fetch_all(pool).await?;
            rows.iter().map(row_to_card).collect()
        }
    }
}

/// Ids of cards with neither a vector reference nor a recorded failure
///
/// These are cards whose embedding batch never ran to completion.
pub async fn list_unembedded_card_ids(pool: &SqlitePool) -> ForgeResult<Vec<Uuid>> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT guid FROM cards WHERE vector_id IS NULL AND embedding_error IS NULL \
         ORDER BY created_at ASC, guid ASC",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(|id| parse_uuid("guid", id)).collect()
}

/// Record a successful embedding, clearing any previous failure
pub async fn set_vector_ref(pool: &SqlitePool, card_id: Uuid, vector_id: &str) -> ForgeResult<()> {
    let result = sqlx::query(
        "UPDATE cards SET vector_id = ?, embedding_error = NULL, updated_at = ? WHERE guid = ?",
    )
    .bind(vector_id)
    .bind(to_millis(Utc::now()))
    .bind(card_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ForgeError::CardNotFound(card_id));
    }
    Ok(())
}

/// Record an embedding failure; any existing vector reference is kept
pub async fn set_embedding_error(pool: &SqlitePool, card_id: Uuid, message: &str) -> ForgeResult<()> {
    let result = sqlx::query("UPDATE cards SET embedding_error = ?, updated_at = ? WHERE guid = ?")
        .bind(message)
        .bind(to_millis(Utc::now()))
        .bind(card_id.to_string())
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ForgeError::CardNotFound(card_id));
    }
    Ok(())
}

/// Touch the card row inside a rating transaction
///
/// Issued as the first statement so the transaction takes the write lock
/// up front. Returns false when the card does not exist.
pub async fn lock_card_for_review(
    conn: &mut SqliteConnection,
    card_id: Uuid,
    now: DateTime<Utc>,
) -> ForgeResult<bool> {
    let result = sqlx::query("UPDATE cards SET updated_at = ? WHERE guid = ?")
        .bind(to_millis(now))
        .bind(card_id.to_string())
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Write new scheduling state for a card
pub async fn update_scheduling(
    conn: &mut SqliteConnection,
    card_id: Uuid,
    state: &SchedulingState,
    now: DateTime<Utc>,
) -> ForgeResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE cards
        SET ease = ?, interval_days = ?, repetitions = ?, next_review_at = ?, updated_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(state.ease)
    .bind(state.interval_days as i64)
    .bind(state.repetitions as i64)
    .bind(to_millis(state.next_review_at))
    .bind(to_millis(now))
    .bind(card_id.to_string())
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ForgeError::CardNotFound(card_id));
    }
    Ok(())
}

/// Earliest due card, optionally restricted to one deck
///
/// Ties on `next_review_at` are broken by card id so the answer is stable.
pub async fn next_due(
    pool: &SqlitePool,
    deck_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> ForgeResult<Option<Card>> {
    let row = match deck_id {
        Some(deck_id) => {
            let sql = format!(
                "SELECT {} FROM cards WHERE deck_id = ? AND next_review_at <= ? \
                 ORDER BY next_review_at ASC, guid ASC LIMIT 1",
                CARD_COLUMNS
            );
            sqlx::query(&sql)
                .bind(deck_id.to_string())
                .bind(to_millis(now))
                .fetch_optional(pool)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM cards WHERE next_review_at <= ? \
                 ORDER BY next_review_at ASC, guid ASC LIMIT 1",
                CARD_COLUMNS
            );
            sqlx::query(&sql)
                .bind(to_millis(now))
                .fetch_optional(pool)
                .await?
        }
    };

    row.map(|r| row_to_card(&r)).transpose()
}

fn row_to_card(row: &SqliteRow) -> ForgeResult<Card> {
    let guid: String = row.try_get("guid")?;
    let deck_id: String = row.try_get("deck_id")?;
    let difficulty: String = row.try_get("difficulty")?;
    let tags_json: String = row.try_get("tags")?;
    let interval_days: i64 = row.try_get("interval_days")?;
    let repetitions: i64 = row.try_get("repetitions")?;

    let tags: BTreeSet<String> = serde_json::from_str(&tags_json).map_err(|e| {
        ForgeError::Common(recall_common::Error::Internal(format!(
            "Invalid tags JSON on card {}: {}",
            guid, e
        )))
    })?;
    let difficulty = difficulty.parse().map_err(|e: String| {
        ForgeError::Common(recall_common::Error::Internal(format!(
            "Invalid difficulty on card {}: {}",
            guid, e
        )))
    })?;

    Ok(Card {
        guid: parse_uuid("guid", &guid)?,
        deck_id: parse_uuid("deck_id", &deck_id)?,
        source_id: parse_optional_uuid("source_id", row.try_get("source_id")?)?,
        content: CardContent {
            front: row.try_get("front")?,
            back: row.try_get("back")?,
            hint: row.try_get("hint")?,
            difficulty,
            tags,
            visual_payload: row.try_get("visual_payload")?,
        },
        vector_id: row.try_get("vector_id")?,
        embedding_error: row.try_get("embedding_error")?,
        scheduling: SchedulingState {
            ease: row.try_get("ease")?,
            interval_days: interval_days.max(0) as u32,
            repetitions: repetitions.max(0) as u32,
            next_review_at: from_millis(row.try_get("next_review_at")?),
        },
        created_at: from_millis(row.try_get("created_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{decks, init_memory_pool};
    use crate::models::{Difficulty, NewDeck};
    use chrono::Duration;

    async fn setup() -> (SqlitePool, Uuid) {
        let pool = init_memory_pool().await.unwrap();
        let deck = decks::create_deck(
            &pool,
            NewDeck {
                name: "Chemistry".into(),
                description: None,
                owner: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        (pool, deck.guid)
    }

    #[tokio::test]
    async fn test_insert_and_load_preserves_content() {
        let (pool, deck_id) = setup().await;
        let mut content = CardContent::basic("Symbol for sodium?", "Na");
        content.hint = Some("Latin: natrium".into());
        content.difficulty = Difficulty::Intermediate;
        content.tags = ["elements".to_string()].into_iter().collect();
        let card = Card::new(deck_id, None, content.clone(), Utc::now());

        insert_cards(&pool, std::slice::from_ref(&card)).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let loaded = load_card(&mut conn, card.guid).await.unwrap().unwrap();
        assert_eq!(loaded.content, content);
        assert_eq!(loaded.scheduling.repetitions, 0);
        assert!(loaded.vector_id.is_none());
    }

    async fn insert_source(pool: &SqlitePool, deck_id: Uuid) -> Uuid {
        let source = crate::models::Source::new(
            deck_id,
            crate::models::SourceOrigin::Url("https://example.com/salts".into()),
            Utc::now(),
        );
        crate::db::sources::insert_source(pool, &source).await.unwrap();
        source.guid
    }

    #[tokio::test]
    async fn test_source_cards_inserted_once() {
        let (pool, deck_id) = setup().await;
        let source_id = insert_source(&pool, deck_id).await;
        let batch = |front: &str| {
            vec![Card::new(deck_id, Some(source_id), CardContent::basic(front, "A"), Utc::now())]
        };

        assert!(insert_cards_for_source(&pool, source_id, &batch("first"), Utc::now())
            .await
            .unwrap());
        assert!(!insert_cards_for_source(&pool, source_id, &batch("second"), Utc::now())
            .await
            .unwrap());

        let stored = list_cards_for_source(&pool, source_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content.front, "first");
    }

    #[tokio::test]
    async fn test_source_cards_for_missing_source() {
        let (pool, deck_id) = setup().await;
        let missing = Uuid::new_v4();
        let card = Card::new(deck_id, None, CardContent::basic("Q", "A"), Utc::now());

        let err = insert_cards_for_source(&pool, missing, &[card], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::SourceNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_unembedded_ids_skip_failed_and_embedded() {
        let (pool, deck_id) = setup().await;
        let cards: Vec<Card> = (0..3)
            .map(|i| Card::new(deck_id, None, CardContent::basic(format!("Q{}", i), "A"), Utc::now()))
            .collect();
        insert_cards(&pool, &cards).await.unwrap();

        set_vector_ref(&pool, cards[0].guid, "v0").await.unwrap();
        set_embedding_error(&pool, cards[1].guid, "quota").await.unwrap();

        assert_eq!(list_unembedded_card_ids(&pool).await.unwrap(), vec![cards[2].guid]);
        assert_eq!(list_cards(&pool, None).await.unwrap().len(), 3);
        assert_eq!(list_cards(&pool, Some(Uuid::new_v4())).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_vector_ref_clears_embedding_error() {
        let (pool, deck_id) = setup().await;
        let card = Card::new(deck_id, None, CardContent::basic("Q", "A"), Utc::now());
        insert_cards(&pool, std::slice::from_ref(&card)).await.unwrap();

        set_embedding_error(&pool, card.guid, "index down").await.unwrap();
        set_vector_ref(&pool, card.guid, &card.guid.to_string()).await.unwrap();

        let loaded = load_cards(&pool, &[card.guid]).await.unwrap();
        assert_eq!(loaded[0].vector_id.as_deref(), Some(card.guid.to_string().as_str()));
        assert!(loaded[0].embedding_error.is_none());
    }

    #[tokio::test]
    async fn test_next_due_breaks_ties_by_id() {
        let (pool, deck_id) = setup().await;
        let now = Utc::now();
        let earlier = now - Duration::hours(1);

        let cards: Vec<Card> = (0..3)
            .map(|i| Card::new(deck_id, None, CardContent::basic(format!("Q{}", i), "A"), earlier))
            .collect();
        insert_cards(&pool, &cards).await.unwrap();

        let expected = cards.iter().map(|c| c.guid).min().unwrap();
        for _ in 0..3 {
            let due = next_due(&pool, Some(deck_id), now).await.unwrap().unwrap();
            assert_eq!(due.guid, expected);
        }
    }

    #[tokio::test]
    async fn test_next_due_ignores_future_cards() {
        let (pool, deck_id) = setup().await;
        let now = Utc::now();
        let card = Card::new(deck_id, None, CardContent::basic("Q", "A"), now + Duration::days(1));
        insert_cards(&pool, &[card]).await.unwrap();

        assert!(next_due(&pool, Some(deck_id), now).await.unwrap().is_none());
        assert!(next_due(&pool, None, now).await.unwrap().is_none());
    }
}
