//! Review log database operations

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;
use crate::error::ForgeResult;
use crate::models::ReviewLog;
use recall_common::time::{from_millis, to_millis};

/// Append one review log row
pub async fn insert_review_log(
    conn: &mut SqliteConnection,
    card_id: Uuid,
    rating: u8,
    reviewed_at: DateTime<Utc>,
) -> ForgeResult<i64> {
    let result = sqlx::query(
        "INSERT INTO review_logs (card_id, rating, reviewed_at) VALUES (?, ?, ?)",
    )
    .bind(card_id.to_string())
    .bind(rating as i64)
    .bind(to_millis(reviewed_at))
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Review history of a card, oldest first
pub async fn list_review_logs(pool: &SqlitePool, card_id: Uuid) -> ForgeResult<Vec<ReviewLog>> {
    let rows = sqlx::query(
        r#"
        SELECT id, card_id, rating, reviewed_at
        FROM review_logs
        WHERE card_id = ?
        ORDER BY reviewed_at ASC, id ASC
        "#,
    )
    .bind(card_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let card_id: String = row.try_get("card_id")?;
            let rating: i64 = row.try_get("rating")?;
            Ok(ReviewLog {
                id: row.try_get("id")?,
                card_id: parse_uuid("card_id", &card_id)?,
                rating: rating.clamp(0, 5) as u8,
                reviewed_at: from_millis(row.try_get("reviewed_at")?),
            })
        })
        .collect()
}

/// Number of reviews logged for a card
pub async fn count_review_logs(pool: &SqlitePool, card_id: Uuid) -> ForgeResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM review_logs WHERE card_id = ?")
        .bind(card_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count)
}
