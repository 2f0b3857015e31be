//! Database access for recall-forge
//!
//! SQLite record store. Ids are stored as UUID text, timestamps as INTEGER
//! epoch milliseconds.

pub mod cards;
pub mod decks;
pub mod reviews;
pub mod settings;
pub mod sources;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ForgeError, ForgeResult};

/// Initialize database connection pool
///
/// Creates the file (and parent folder) when missing, enables foreign keys
/// and WAL on every connection, then creates tables.
pub async fn init_database_pool(db_path: &Path) -> ForgeResult<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(recall_common::Error::Io)?;
    }

    let db_url = format!("sqlite://{}", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        tracing::info!("Initialized new database: {}", db_path.display());
    } else {
        tracing::info!("Opened existing database: {}", db_path.display());
    }

    init_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with all tables
///
/// One connection only: every SQLite `:memory:` connection is its own
/// database.
pub async fn init_memory_pool() -> ForgeResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create recall-forge tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> ForgeResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS decks (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            owner TEXT,
            parent_deck_id TEXT REFERENCES decks(guid) ON DELETE SET NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            guid TEXT PRIMARY KEY,
            deck_id TEXT NOT NULL REFERENCES decks(guid) ON DELETE CASCADE,
            url TEXT,
            file_path TEXT,
            status TEXT NOT NULL
                CHECK (status IN ('PENDING', 'PROCESSING', 'COMPLETED', 'FAILED')),
            extracted_text TEXT NOT NULL DEFAULT '',
            error_log TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cards (
            guid TEXT PRIMARY KEY,
            deck_id TEXT NOT NULL REFERENCES decks(guid) ON DELETE CASCADE,
            source_id TEXT REFERENCES sources(guid) ON DELETE SET NULL,
            front TEXT NOT NULL,
            back TEXT NOT NULL,
            hint TEXT,
            difficulty TEXT NOT NULL DEFAULT 'basic'
                CHECK (difficulty IN ('basic', 'intermediate', 'advanced')),
            tags TEXT NOT NULL DEFAULT '[]',
            visual_payload TEXT,
            vector_id TEXT,
            embedding_error TEXT,
            ease REAL NOT NULL DEFAULT 2.5 CHECK (ease >= 1.3),
            interval_days INTEGER NOT NULL DEFAULT 0 CHECK (interval_days >= 0),
            repetitions INTEGER NOT NULL DEFAULT 0 CHECK (repetitions >= 0),
            next_review_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cards_due ON cards(next_review_at, guid)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cards_deck ON cards(deck_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cards_source ON cards(source_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            card_id TEXT NOT NULL REFERENCES cards(guid) ON DELETE CASCADE,
            rating INTEGER NOT NULL CHECK (rating BETWEEN 0 AND 5),
            reviewed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (settings, decks, sources, cards, review_logs)");

    Ok(())
}

/// Parse a UUID column value
pub(crate) fn parse_uuid(column: &str, value: &str) -> ForgeResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        ForgeError::Common(recall_common::Error::Internal(format!(
            "Invalid UUID in column {}: {}",
            column, e
        )))
    })
}

/// Parse an optional UUID column value
pub(crate) fn parse_optional_uuid(column: &str, value: Option<String>) -> ForgeResult<Option<Uuid>> {
    value.map(|v| parse_uuid(column, &v)).transpose()
}
