//! Upload folder for file sources
//!
//! File sources may only name files inside `<root>/uploads`. Uploaded bytes
//! are stored under a fresh UUID name; client-supplied names never reach the
//! filesystem except for a sanitized extension.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{ForgeError, ForgeResult};

/// Longest extension kept from an uploaded file name
const MAX_EXTENSION_LEN: usize = 8;

/// Folder that holds uploaded study material
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    /// Open (creating if needed) the upload folder
    pub async fn open(dir: impl Into<PathBuf>) -> ForgeResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(recall_common::Error::Io)?;
        let dir = tokio::fs::canonicalize(&dir)
            .await
            .map_err(recall_common::Error::Io)?;

        tracing::debug!(dir = %dir.display(), "Upload folder ready");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store uploaded bytes and return the absolute path of the new file
    pub async fn save(&self, original_name: Option<&str>, bytes: &[u8]) -> ForgeResult<PathBuf> {
        if bytes.is_empty() {
            return Err(ForgeError::InvalidSource("uploaded file is empty".to_string()));
        }

        let file_name = match original_name.and_then(sanitized_extension) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };
        let path = self.dir.join(file_name);

        tokio::fs::write(&path, bytes)
            .await
            .map_err(recall_common::Error::Io)?;

        tracing::info!(path = %path.display(), bytes = bytes.len(), "Upload stored");
        Ok(path)
    }

    /// Resolve a submitted file path to an existing file inside the folder
    ///
    /// Relative paths are taken relative to the folder. Symlinks and `..`
    /// are resolved before the containment check.
    pub async fn resolve(&self, path: &Path) -> ForgeResult<PathBuf> {
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        };

        let resolved = tokio::fs::canonicalize(&candidate).await.map_err(|_| {
            ForgeError::InvalidSource(format!("file not found in uploads: {}", path.display()))
        })?;

        if !resolved.starts_with(&self.dir) {
            tracing::warn!(path = %path.display(), "Rejected file source outside uploads");
            return Err(ForgeError::InvalidSource(format!(
                "file must be inside the uploads folder: {}",
                path.display()
            )));
        }

        let metadata = tokio::fs::metadata(&resolved)
            .await
            .map_err(recall_common::Error::Io)?;
        if !metadata.is_file() {
            return Err(ForgeError::InvalidSource(format!(
                "not a regular file: {}",
                path.display()
            )));
        }

        Ok(resolved)
    }
}

fn sanitized_extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > MAX_EXTENSION_LEN {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_saved_upload_resolves() {
        let temp_dir = TempDir::new().unwrap();
        let store = UploadStore::open(temp_dir.path().join("uploads")).await.unwrap();

        let path = store.save(Some("Lecture 3.PDF"), b"%PDF-1.4 body").await.unwrap();
        assert_eq!(path.extension().unwrap(), "pdf");
        assert!(path.starts_with(store.dir()));

        assert_eq!(store.resolve(&path).await.unwrap(), path);
        let relative = PathBuf::from(path.file_name().unwrap());
        assert_eq!(store.resolve(&relative).await.unwrap(), path);
    }

    #[tokio::test]
    async fn test_paths_outside_uploads_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = UploadStore::open(temp_dir.path().join("uploads")).await.unwrap();

        let outside = temp_dir.path().join("secret.txt");
        std::fs::write(&outside, "api key").unwrap();

        for path in [outside.clone(), PathBuf::from("../secret.txt")] {
            assert!(matches!(
                store.resolve(&path).await,
                Err(ForgeError::InvalidSource(_))
            ));
        }
        assert!(matches!(
            store.resolve(Path::new("missing.png")).await,
            Err(ForgeError::InvalidSource(_))
        ));
        assert!(matches!(
            store.resolve(store.dir()).await,
            Err(ForgeError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_extension_sanitized() {
        assert_eq!(sanitized_extension("notes.png"), Some("png".to_string()));
        assert_eq!(sanitized_extension("../../etc/passwd"), None);
        assert_eq!(sanitized_extension("x.p/g"), None);
        assert_eq!(sanitized_extension("archive.tar$gz"), None);
    }

    #[tokio::test]
    async fn test_empty_upload_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = UploadStore::open(temp_dir.path()).await.unwrap();
        assert!(matches!(
            store.save(Some("a.png"), b"").await,
            Err(ForgeError::InvalidSource(_))
        ));
    }
}
