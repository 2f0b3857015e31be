//! Configuration loading and root folder resolution tests
//!
//! Tests touching RECALL_ROOT_FOLDER are marked #[serial] so they never
//! race on the process environment.

use recall_common::config::{
    load_toml_config, prepare_root_folder, resolve_root_folder, TomlConfig, DATABASE_FILE_NAME,
    ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[test]
fn test_defaults_without_file() {
    let config = TomlConfig::default();
    assert_eq!(config.port, 5780);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.embedding_dimension, 768);
    assert_eq!(config.qdrant_collection, "cards");
    assert!(config.gemini_api_key.is_none());
    assert!(config.qdrant_url.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn test_partial_toml_fills_defaults() {
    let config = TomlConfig::from_toml_str(
        r#"
        port = 6000
        gemini_api_key = "abc123"
        qdrant_url = "http://localhost:6333"

        [logging]
        level = "debug"
        "#,
    )
    .unwrap();

    assert_eq!(config.port, 6000);
    assert_eq!(config.gemini_api_key.as_deref(), Some("abc123"));
    assert_eq!(config.qdrant_url.as_deref(), Some("http://localhost:6333"));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.worker_count, 4);
    assert_eq!(config.embedding_concurrency, 4);
}

#[test]
fn test_zero_dimension_rejected() {
    let err = TomlConfig::from_toml_str("embedding_dimension = 0").unwrap_err();
    assert!(err.to_string().contains("embedding_dimension"));
}

#[test]
fn test_malformed_toml_rejected() {
    assert!(TomlConfig::from_toml_str("port = \"not a number\"").is_err());
}

#[test]
fn test_explicit_missing_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    assert!(load_toml_config(Some(&missing)).is_err());
}

#[test]
fn test_explicit_file_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "worker_count = 2\ncards_per_source = 12\n").unwrap();

    let config = load_toml_config(Some(&path)).unwrap();
    assert_eq!(config.worker_count, 2);
    assert_eq!(config.cards_per_source, Some(12));
}

#[test]
#[serial]
fn test_root_folder_priority() {
    let toml = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..TomlConfig::default()
    };

    env::set_var(ROOT_FOLDER_ENV, "/from/env");
    assert_eq!(
        resolve_root_folder(Some(Path::new("/from/cli")), &toml),
        PathBuf::from("/from/cli")
    );
    assert_eq!(resolve_root_folder(None, &toml), PathBuf::from("/from/env"));

    env::remove_var(ROOT_FOLDER_ENV);
    assert_eq!(resolve_root_folder(None, &toml), PathBuf::from("/from/toml"));

    let fallback = resolve_root_folder(None, &TomlConfig::default());
    assert!(!fallback.as_os_str().is_empty());
}

#[test]
fn test_prepare_root_folder_creates_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("nested").join("recall");

    let db_path = prepare_root_folder(&root).unwrap();
    assert!(root.is_dir());
    assert_eq!(db_path, root.join(DATABASE_FILE_NAME));
}
