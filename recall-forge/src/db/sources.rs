//! Source database operations
//!
//! Each status-changing function is guarded by the expected current status
//! in its WHERE clause, so a stage can only move a Source it still owns.
//! A guard miss is reported as `InvalidTransition` (or `SourceNotFound`).

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_uuid;
use crate::error::{ForgeError, ForgeResult};
use crate::models::{Source, SourceOrigin};
use recall_common::time::{from_millis, to_millis};
use recall_common::SourceStatus;

/// Insert a new source row
pub async fn insert_source(pool: &SqlitePool, source: &Source) -> ForgeResult<()> {
    let (url, file_path) = source.origin.to_columns();

    sqlx::query(
        r#"
        INSERT INTO sources (
            guid, deck_id, url, file_path, status, extracted_text, error_log,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(source.guid.to_string())
    .bind(source.deck_id.to_string())
    .bind(url)
    .bind(file_path)
    .bind(source.status.as_str())
    .bind(&source.extracted_text)
    .bind(&source.error_log)
    .bind(to_millis(source.created_at))
    .bind(to_millis(source.updated_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load source by id
pub async fn load_source(pool: &SqlitePool, source_id: Uuid) -> ForgeResult<Option<Source>> {
    let row = sqlx::query(
        r#"
        SELECT guid, deck_id, url, file_path, status, extracted_text, error_log,
               created_at, updated_at
        FROM sources
        WHERE guid = ?
        "#,
    )
    .bind(source_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| row_to_source(&r)).transpose()
}

/// Load source by id, failing with `SourceNotFound`
pub async fn require_source(pool: &SqlitePool, source_id: Uuid) -> ForgeResult<Source> {
    load_source(pool, source_id)
        .await?
        .ok_or(ForgeError::SourceNotFound(source_id))
}

/// Move a source from `from` to `to` without touching other fields
pub async fn transition_status(
    pool: &SqlitePool,
    source_id: Uuid,
    from: SourceStatus,
    to: SourceStatus,
    now: DateTime<Utc>,
) -> ForgeResult<()> {
    check_transition(source_id, from, to)?;

    let result = sqlx::query(
        "UPDATE sources SET status = ?, updated_at = ? WHERE guid = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(to_millis(now))
    .bind(source_id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    guard_hit(pool, source_id, from, to, result.rows_affected()).await
}

/// PROCESSING → COMPLETED, storing the extracted text in the same statement
///
/// This is the only write path for `extracted_text`.
pub async fn complete_extraction(
    pool: &SqlitePool,
    source_id: Uuid,
    extracted_text: &str,
    now: DateTime<Utc>,
) -> ForgeResult<()> {
    let (from, to) = (SourceStatus::Processing, SourceStatus::Completed);

    let result = sqlx::query(
        r#"
        UPDATE sources
        SET status = ?, extracted_text = ?, updated_at = ?
        WHERE guid = ? AND status = ?
        "#,
    )
    .bind(to.as_str())
    .bind(extracted_text)
    .bind(to_millis(now))
    .bind(source_id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    guard_hit(pool, source_id, from, to, result.rows_affected()).await
}

/// `from` → FAILED, appending `message` to the error log
pub async fn fail_source(
    pool: &SqlitePool,
    source_id: Uuid,
    from: SourceStatus,
    message: &str,
    now: DateTime<Utc>,
) -> ForgeResult<()> {
    let to = SourceStatus::Failed;
    check_transition(source_id, from, to)?;

    let result = sqlx::query(
        r#"
        UPDATE sources
        SET status = ?,
            error_log = CASE WHEN error_log = '' THEN ? ELSE error_log || char(10) || ? END,
            updated_at = ?
        WHERE guid = ? AND status = ?
        "#,
    )
    .bind(to.as_str())
    .bind(message)
    .bind(message)
    .bind(to_millis(now))
    .bind(source_id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    guard_hit(pool, source_id, from, to, result.rows_affected()).await
}

/// Append a line to the error log without changing status
pub async fn append_error_log(
    pool: &SqlitePool,
    source_id: Uuid,
    message: &str,
    now: DateTime<Utc>,
) -> ForgeResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE sources
        SET error_log = CASE WHEN error_log = '' THEN ? ELSE error_log || char(10) || ? END,
            updated_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(message)
    .bind(message)
    .bind(to_millis(now))
    .bind(source_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ForgeError::SourceNotFound(source_id));
    }
    Ok(())
}

/// Move every PROCESSING source to FAILED
///
/// Run once at startup, before any worker starts: a source still PROCESSING
/// belongs to an extraction that died with the previous process. Returns the
/// number of sources failed.
pub async fn fail_stale_sources(
    pool: &SqlitePool,
    message: &str,
    now: DateTime<Utc>,
) -> ForgeResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE sources
        SET status = ?,
            error_log = CASE WHEN error_log = '' THEN ? ELSE error_log || char(10) || ? END,
            updated_at = ?
        WHERE status = ?
        "#,
    )
    .bind(SourceStatus::Failed.as_str())
    .bind(message)
    .bind(message)
    .bind(to_millis(now))
    .bind(SourceStatus::Processing.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Ids of sources in `status`, oldest first
pub async fn list_source_ids_with_status(
    pool: &SqlitePool,
    status: SourceStatus,
) -> ForgeResult<Vec<Uuid>> {
    let rows: Vec<String> =
        sqlx::query_scalar("SELECT guid FROM sources WHERE status = ? ORDER BY created_at ASC")
            .bind(status.as_str())
            .fetch_all(pool)
            .await?;

    rows.iter().map(|id| parse_uuid("guid", id)).collect()
}

/// COMPLETED sources whose generation stage never finished
///
/// A source with no cards and an empty error log has not been through
/// generation; one that produced no valid cards carries a log line.
pub async fn list_completed_without_cards(pool: &SqlitePool) -> ForgeResult<Vec<Source>> {
    let rows = sqlx::query(
        r#"
        SELECT guid, deck_id, url, file_path, status, extracted_text, error_log,
               created_at, updated_at
        FROM sources s
        WHERE s.status = ?
          AND s.error_log = ''
          AND NOT EXISTS (SELECT 1 FROM cards c WHERE c.source_id = s.guid)
        ORDER BY s.created_at ASC
        "#,
    )
    .bind(SourceStatus::Completed.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_source).collect()
}

fn check_transition(source_id: Uuid, from: SourceStatus, to: SourceStatus) -> ForgeResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(ForgeError::InvalidTransition { source_id, from, to })
    }
}

/// Turn a zero-row guarded update into the right error
async fn guard_hit(
    pool: &SqlitePool,
    source_id: Uuid,
    from: SourceStatus,
    to: SourceStatus,
    rows_affected: u64,
) -> ForgeResult<()> {
    if rows_affected > 0 {
        return Ok(());
    }

    tracing::debug!(
        source_id = %source_id,
        expected = %from,
        target = %to,
        "Guarded status update matched no row"
    );

    match load_source(pool, source_id).await? {
        None => Err(ForgeError::SourceNotFound(source_id)),
        Some(current) => Err(ForgeError::InvalidTransition {
            source_id,
            from: current.status,
            to,
        }),
    }
}

fn row_to_source(row: &SqliteRow) -> ForgeResult<Source> {
    let guid: String = row.try_get("guid")?;
    let deck_id: String = row.try_get("deck_id")?;
    let url: Option<String> = row.try_get("url")?;
    let file_path: Option<String> = row.try_get("file_path")?;
    let status: String = row.try_get("status")?;

    Ok(Source {
        guid: parse_uuid("guid", &guid)?,
        deck_id: parse_uuid("deck_id", &deck_id)?,
        origin: SourceOrigin::from_parts(url.as_deref(), file_path.as_deref())?,
        status: status.parse()?,
        extracted_text: row.try_get("extracted_text")?,
        error_log: row.try_get("error_log")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{decks, init_memory_pool};
    use crate::models::NewDeck;

    async fn setup() -> (SqlitePool, Source) {
        let pool = init_memory_pool().await.unwrap();
        let deck = decks::create_deck(
            &pool,
            NewDeck {
                name: "Biology".into(),
                description: None,
                owner: None,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        let source = Source::new(
            deck.guid,
            SourceOrigin::Url("https://example.com".into()),
            Utc::now(),
        );
        insert_source(&pool, &source).await.unwrap();
        (pool, source)
    }

    #[tokio::test]
    async fn test_insert_and_load_pending_source() {
        let (pool, source) = setup().await;
        let loaded = require_source(&pool, source.guid).await.unwrap();
        assert_eq!(loaded.status, SourceStatus::Pending);
        assert_eq!(loaded.origin, source.origin);
        assert!(loaded.extracted_text.is_empty());
    }

    #[tokio::test]
    async fn test_complete_extraction_requires_processing() {
        let (pool, source) = setup().await;

        let err = complete_extraction(&pool, source.guid, "text", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ForgeError::InvalidTransition { from: SourceStatus::Pending, .. }
        ));

        transition_status(&pool, source.guid, SourceStatus::Pending, SourceStatus::Processing, Utc::now())
            .await
            .unwrap();
        complete_extraction(&pool, source.guid, "Mitochondria make ATP", Utc::now())
            .await
            .unwrap();

        let loaded = require_source(&pool, source.guid).await.unwrap();
        assert_eq!(loaded.status, SourceStatus::Completed);
        assert_eq!(loaded.extracted_text, "Mitochondria make ATP");

        // Text is frozen once COMPLETED
        assert!(complete_extraction(&pool, source.guid, "other", Utc::now()).await.is_err());
        let loaded = require_source(&pool, source.guid).await.unwrap();
        assert_eq!(loaded.extracted_text, "Mitochondria make ATP");
    }

    #[tokio::test]
    async fn test_fail_source_appends_error_lines() {
        let (pool, source) = setup().await;
        transition_status(&pool, source.guid, SourceStatus::Pending, SourceStatus::Processing, Utc::now())
            .await
            .unwrap();
        append_error_log(&pool, source.guid, "first", Utc::now()).await.unwrap();
        fail_source(&pool, source.guid, SourceStatus::Processing, "second", Utc::now())
            .await
            .unwrap();

        let loaded = require_source(&pool, source.guid).await.unwrap();
        assert_eq!(loaded.status, SourceStatus::Failed);
        assert_eq!(loaded.error_log, "first\nsecond");
    }

    #[tokio::test]
    async fn test_nothing_leaves_failed() {
        let (pool, source) = setup().await;
        transition_status(&pool, source.guid, SourceStatus::Pending, SourceStatus::Processing, Utc::now())
            .await
            .unwrap();
        fail_source(&pool, source.guid, SourceStatus::Processing, "boom", Utc::now())
            .await
            .unwrap();

        let err = fail_source(&pool, source.guid, SourceStatus::Failed, "again", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ForgeError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_stale_sources_failed_on_restart() {
        let (pool, pending) = setup().await;
        let processing = Source::new(pending.deck_id, SourceOrigin::Url("https://b".into()), Utc::now());
        let done = Source::new(pending.deck_id, SourceOrigin::Url("https://c".into()), Utc::now());
        insert_source(&pool, &processing).await.unwrap();
        insert_source(&pool, &done).await.unwrap();
        for id in [processing.guid, done.guid] {
            transition_status(&pool, id, SourceStatus::Pending, SourceStatus::Processing, Utc::now())
                .await
                .unwrap();
        }
        complete_extraction(&pool, done.guid, "text", Utc::now()).await.unwrap();

        let failed = fail_stale_sources(&pool, "Interrupted: service restarted", Utc::now())
            .await
            .unwrap();
        assert_eq!(failed, 1);

        let loaded = require_source(&pool, processing.guid).await.unwrap();
        assert_eq!(loaded.status, SourceStatus::Failed);
        assert_eq!(loaded.error_log, "Interrupted: service restarted");

        // PENDING never started work and is left for resubmission
        assert_eq!(
            list_source_ids_with_status(&pool, SourceStatus::Pending).await.unwrap(),
            vec![pending.guid]
        );
        assert_eq!(
            require_source(&pool, done.guid).await.unwrap().status,
            SourceStatus::Completed
        );

        let unfinished = list_completed_without_cards(&pool).await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].guid, done.guid);

        append_error_log(&pool, done.guid, "Generation produced no valid cards", Utc::now())
            .await
            .unwrap();
        assert!(list_completed_without_cards(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_reports_not_found() {
        let (pool, _) = setup().await;
        let err = transition_status(
            &pool,
            Uuid::new_v4(),
            SourceStatus::Pending,
            SourceStatus::Processing,
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ForgeError::SourceNotFound(_)));
    }
}
