//! Settings database operations
//!
//! Key/value accessors for the `settings` table.

use sqlx::{Pool, Sqlite};

use crate::error::{ForgeError, ForgeResult};

/// Settings key holding the Gemini API key
pub const GEMINI_API_KEY: &str = "gemini_api_key";

/// Get Gemini API key from database
///
/// **Returns:** Some(key) if exists, None if not set
pub async fn get_gemini_api_key(db: &Pool<Sqlite>) -> ForgeResult<Option<String>> {
    get_setting::<String>(db, GEMINI_API_KEY).await
}

/// Set Gemini API key in database
pub async fn set_gemini_api_key(db: &Pool<Sqlite>, key: String) -> ForgeResult<()> {
    set_setting(db, GEMINI_API_KEY, key).await
}

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> ForgeResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match row {
        Some((value,)) => {
            let parsed = value.parse::<T>().map_err(|e| {
                ForgeError::Common(recall_common::Error::Config(format!(
                    "Parse setting '{}' failed: {}",
                    key, e
                )))
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> ForgeResult<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn test_get_gemini_api_key_not_exists() {
        let pool = init_memory_pool().await.unwrap();
        assert_eq!(get_gemini_api_key(&pool).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_gemini_api_key_upserts() {
        let pool = init_memory_pool().await.unwrap();

        set_gemini_api_key(&pool, "first".to_string()).await.unwrap();
        set_gemini_api_key(&pool, "second".to_string()).await.unwrap();

        assert_eq!(
            get_gemini_api_key(&pool).await.unwrap(),
            Some("second".to_string())
        );
    }

    #[tokio::test]
    async fn test_unparseable_setting_is_config_error() {
        let pool = init_memory_pool().await.unwrap();
        set_setting(&pool, "worker_count", "many").await.unwrap();

        let result = get_setting::<usize>(&pool, "worker_count").await;
        assert!(matches!(
            result,
            Err(ForgeError::Common(recall_common::Error::Config(_)))
        ));
    }
}
