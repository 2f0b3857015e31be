//! Source: one ingestion job
//!
//! A Source wraps exactly one origin (a URL or a file on disk) and carries
//! the persisted status of the pipeline that turns it into cards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{ForgeError, ForgeResult};
use recall_common::SourceStatus;

/// Where the study material comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    /// Web page or document URL, extracted to text before generation
    Url(String),
    /// Uploaded file read directly by the generator (vision path)
    File(PathBuf),
}

impl SourceOrigin {
    /// Build an origin from the two optional inbound fields
    ///
    /// Blank strings count as absent. Exactly one field must remain.
    pub fn from_parts(url: Option<&str>, file: Option<&str>) -> ForgeResult<Self> {
        let url = url.map(str::trim).filter(|u| !u.is_empty());
        let file = file.map(str::trim).filter(|f| !f.is_empty());

        match (url, file) {
            (Some(url), None) => Ok(SourceOrigin::Url(url.to_string())),
            (None, Some(file)) => Ok(SourceOrigin::File(PathBuf::from(file))),
            (Some(_), Some(_)) => Err(ForgeError::InvalidSource(
                "both url and file are set".to_string(),
            )),
            (None, None) => Err(ForgeError::InvalidSource(
                "one of url or file is required".to_string(),
            )),
        }
    }

    /// File origins skip text extraction and go to the vision generator
    pub fn is_vision(&self) -> bool {
        matches!(self, SourceOrigin::File(_))
    }

    /// Split back into the (url, file) column pair
    pub fn to_columns(&self) -> (Option<String>, Option<String>) {
        match self {
            SourceOrigin::Url(url) => (Some(url.clone()), None),
            SourceOrigin::File(path) => (None, Some(path.to_string_lossy().into_owned())),
        }
    }
}

/// Inbound request to ingest material into a deck
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceSubmission {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
}

impl SourceSubmission {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            file: None,
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self {
            url: None,
            file: Some(path.into()),
        }
    }

    /// Validate into an origin, failing with `InvalidSource`
    pub fn origin(&self) -> ForgeResult<SourceOrigin> {
        SourceOrigin::from_parts(self.url.as_deref(), self.file.as_deref())
    }
}

/// Persisted Source record
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub guid: Uuid,
    pub deck_id: Uuid,
    pub origin: SourceOrigin,
    pub status: SourceStatus,
    /// Empty until extraction succeeds; fixed once COMPLETED
    pub extracted_text: String,
    /// Append-only, newline separated
    pub error_log: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// New PENDING source
    pub fn new(deck_id: Uuid, origin: SourceOrigin, now: DateTime<Utc>) -> Self {
        Self {
            guid: Uuid::new_v4(),
            deck_id,
            origin,
            status: SourceStatus::Pending,
            extracted_text: String::new(),
            error_log: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
