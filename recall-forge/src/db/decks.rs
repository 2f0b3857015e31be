//! Deck database operations

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{parse_optional_uuid, parse_uuid};
use crate::error::ForgeResult;
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::models::{Deck, NewDeck};
use recall_common::time::{from_millis, to_millis};

/// Insert a deck row
pub async fn insert_deck(conn: &mut SqliteConnection, deck: &Deck) -> ForgeResult<()> {
    sqlx::query(
        r#"
        INSERT INTO decks (guid, name, description, owner, parent_deck_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(deck.guid.to_string())
    .bind(&deck.name)
    .bind(&deck.description)
    .bind(&deck.owner)
    .bind(deck.parent_deck_id.map(|id| id.to_string()))
    .bind(to_millis(deck.created_at))
    .execute(conn)
    .await?;

    Ok(())
}

/// Create and persist a new deck
pub async fn create_deck(
    pool: &SqlitePool,
    new_deck: NewDeck,
    now: DateTime<Utc>,
) -> ForgeResult<Deck> {
    let deck = Deck::new(new_deck, now);
    let mut conn = pool.acquire().await?;
    insert_deck(&mut conn, &deck).await?;

    tracing::info!(deck_id = %deck.guid, name = %deck.name, "Deck created");
    Ok(deck)
}

/// Load a deck by id
pub async fn load_deck(conn: &mut SqliteConnection, deck_id: Uuid) -> ForgeResult<Option<Deck>> {
    let row = sqlx::query(
        r#"
        SELECT guid, name, description, owner, parent_deck_id, created_at
        FROM decks
        WHERE guid = ?
        "#,
    )
    .bind(deck_id.to_string())
    .fetch_optional(conn)
    .await?;

    row.map(|r| row_to_deck(&r)).transpose()
}

/// All decks, oldest first
pub async fn list_decks(pool: &SqlitePool) -> ForgeResult<Vec<Deck>> {
    let rows = sqlx::query(
        r#"
        SELECT guid, name, description, owner, parent_deck_id, created_at
        FROM decks
        ORDER BY created_at ASC, guid ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_deck).collect()
}

/// Delete a deck with its sources, cards and review history
///
/// Returns the ids of the deleted cards so their index points can be
/// removed, or `None` when the deck does not exist. Forks of the deck keep
/// their cards and lose only the parent link.
pub async fn delete_deck(pool: &SqlitePool, deck_id: Uuid) -> ForgeResult<Option<Vec<Uuid>>> {
    let deleted = retry_on_lock("delete_deck", DEFAULT_MAX_LOCK_WAIT_MS, move || async move {
        let mut tx = pool.begin().await?;

        // Write first so the card list cannot change before the delete
        let touched = sqlx::query("UPDATE decks SET name = name WHERE guid = ?")
            .bind(deck_id.to_string())
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Ok(None);
        }

        let card_ids: Vec<String> = sqlx::query_scalar("SELECT guid FROM cards WHERE deck_id = ?")
            .bind(deck_id.to_string())
            .fetch_all(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM decks WHERE guid = ?")
            .bind(deck_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(card_ids))
    })
    .await?;

    let Some(card_ids) = deleted else {
        return Ok(None);
    };
    let card_ids = card_ids
        .iter()
        .map(|id| parse_uuid("guid", id))
        .collect::<ForgeResult<Vec<Uuid>>>()?;

    tracing::info!(deck_id = %deck_id, cards = card_ids.len(), "Deck deleted");
    Ok(Some(card_ids))
}

/// Whether a deck exists
pub async fn deck_exists(pool: &SqlitePool, deck_id: Uuid) -> ForgeResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM decks WHERE guid = ?")
        .bind(deck_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

fn row_to_deck(row: &SqliteRow) -> ForgeResult<Deck> {
    let guid: String = row.try_get("guid")?;
    Ok(Deck {
        guid: parse_uuid("guid", &guid)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        owner: row.try_get("owner")?,
        parent_deck_id: parse_optional_uuid("parent_deck_id", row.try_get("parent_deck_id")?)?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn test_create_and_load_deck() {
        let pool = init_memory_pool().await.unwrap();
        let deck = create_deck(
            &pool,
            NewDeck {
                name: "Anatomy 101".into(),
                description: Some("Bones".into()),
                owner: Some("user-a".into()),
            },
            Utc::now(),
        )
        .await
        .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let loaded = load_deck(&mut conn, deck.guid).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Anatomy 101");
        assert_eq!(loaded.owner.as_deref(), Some("user-a"));
        assert!(loaded.parent_deck_id.is_none());
        drop(conn);

        assert!(deck_exists(&pool, deck.guid).await.unwrap());
        assert!(!deck_exists(&pool, Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_deck_cascades_and_keeps_forks() {
        use crate::db::cards;
        use crate::models::{Card, CardContent};

        let pool = init_memory_pool().await.unwrap();
        let new_deck = |name: &str| NewDeck {
            name: name.into(),
            description: None,
            owner: None,
        };
        let parent = create_deck(&pool, new_deck("Parent"), Utc::now()).await.unwrap();
        let fork = Deck::fork_of(&parent, None, Utc::now());
        let mut conn = pool.acquire().await.unwrap();
        insert_deck(&mut conn, &fork).await.unwrap();
        drop(conn);

        let doomed = Card::new(parent.guid, None, CardContent::basic("Q", "A"), Utc::now());
        let kept = Card::new(fork.guid, None, CardContent::basic("Q", "A"), Utc::now());
        cards::insert_cards(&pool, &[doomed.clone(), kept.clone()]).await.unwrap();

        let removed = delete_deck(&pool, parent.guid).await.unwrap();
        assert_eq!(removed, Some(vec![doomed.guid]));
        assert!(delete_deck(&pool, parent.guid).await.unwrap().is_none());

        let decks = list_decks(&pool).await.unwrap();
        assert_eq!(decks.len(), 1);
        assert_eq!(decks[0].guid, fork.guid);
        assert!(decks[0].parent_deck_id.is_none());
        assert_eq!(cards::list_cards(&pool, None).await.unwrap().len(), 1);
    }
}
