//! Configuration resolution for recall-forge
//!
//! The Gemini API key resolves Database → ENV → TOML. The database copy is
//! authoritative; a key found only in ENV or TOML is copied into the
//! database at startup so later changes through the settings table win.

use recall_common::config::TomlConfig;
use sqlx::{Pool, Sqlite};
use std::fmt;
use tracing::{info, warn};

use crate::db::settings;
use crate::error::ForgeResult;

/// Environment variable holding the Gemini API key
pub const GEMINI_API_KEY_ENV: &str = "RECALL_GEMINI_API_KEY";

/// Where a resolved key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Database,
    Environment,
    Toml,
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeySource::Database => "database",
            KeySource::Environment => "environment",
            KeySource::Toml => "TOML",
        })
    }
}

/// Resolve the Gemini API key from the three configuration tiers
///
/// Returns `None` when no tier holds a usable key; the generation client
/// then reports every call as unavailable.
pub async fn resolve_gemini_api_key(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> ForgeResult<Option<(String, KeySource)>> {
    let db_key = settings::get_gemini_api_key(db).await?.filter(|k| is_valid_key(k));
    let env_key = std::env::var(GEMINI_API_KEY_ENV).ok().filter(|k| is_valid_key(k));
    let toml_key = toml_config.gemini_api_key.clone().filter(|k| is_valid_key(k));

    let candidates = [
        (db_key, KeySource::Database),
        (env_key, KeySource::Environment),
        (toml_key, KeySource::Toml),
    ];

    let present: Vec<String> = candidates
        .iter()
        .filter(|(key, _)| key.is_some())
        .map(|(_, source)| source.to_string())
        .collect();
    if present.len() > 1 {
        warn!(
            "Gemini API key found in multiple sources: {}. Using {} (highest priority).",
            present.join(", "),
            present[0]
        );
    }

    match candidates.into_iter().find_map(|(key, source)| key.map(|k| (k, source))) {
        Some((key, source)) => {
            info!("Gemini API key loaded from {}", source);
            Ok(Some((key, source)))
        }
        None => {
            warn!(
                "Gemini API key not configured. Set it with {}=<key>, the gemini_api_key \
                 TOML field, or the settings table",
                GEMINI_API_KEY_ENV
            );
            Ok(None)
        }
    }
}

/// Copy a key found in ENV or TOML into the database
pub async fn migrate_key_to_database(
    db: &Pool<Sqlite>,
    key: &str,
    source: KeySource,
) -> ForgeResult<()> {
    if source == KeySource::Database {
        return Ok(());
    }
    settings::set_gemini_api_key(db, key.to_string()).await?;
    info!("Gemini API key migrated from {} to database", source);
    Ok(())
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use serial_test::serial;

    fn toml_with_key(key: Option<&str>) -> TomlConfig {
        TomlConfig {
            gemini_api_key: key.map(String::from),
            ..TomlConfig::default()
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_database_key_wins() {
        let pool = init_memory_pool().await.unwrap();
        settings::set_gemini_api_key(&pool, "db-key".into()).await.unwrap();
        std::env::set_var(GEMINI_API_KEY_ENV, "env-key");

        let resolved = resolve_gemini_api_key(&pool, &toml_with_key(Some("toml-key")))
            .await
            .unwrap();
        std::env::remove_var(GEMINI_API_KEY_ENV);

        assert_eq!(resolved, Some(("db-key".to_string(), KeySource::Database)));
    }

    #[tokio::test]
    #[serial]
    async fn test_env_then_toml_fallback() {
        let pool = init_memory_pool().await.unwrap();

        std::env::set_var(GEMINI_API_KEY_ENV, "env-key");
        let resolved = resolve_gemini_api_key(&pool, &toml_with_key(Some("toml-key")))
            .await
            .unwrap();
        assert_eq!(resolved, Some(("env-key".to_string(), KeySource::Environment)));

        std::env::set_var(GEMINI_API_KEY_ENV, "   ");
        let resolved = resolve_gemini_api_key(&pool, &toml_with_key(Some("toml-key")))
            .await
            .unwrap();
        std::env::remove_var(GEMINI_API_KEY_ENV);
        assert_eq!(resolved, Some(("toml-key".to_string(), KeySource::Toml)));
    }

    #[tokio::test]
    #[serial]
    async fn test_no_key_anywhere() {
        let pool = init_memory_pool().await.unwrap();
        std::env::remove_var(GEMINI_API_KEY_ENV);

        let resolved = resolve_gemini_api_key(&pool, &toml_with_key(None)).await.unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn test_migrate_writes_database() {
        let pool = init_memory_pool().await.unwrap();
        migrate_key_to_database(&pool, "toml-key", KeySource::Toml)
            .await
            .unwrap();
        assert_eq!(
            settings::get_gemini_api_key(&pool).await.unwrap(),
            Some("toml-key".to_string())
        );
    }
}
