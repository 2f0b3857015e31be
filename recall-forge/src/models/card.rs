//! Card: one question/answer learning unit
//!
//! Content fields come from generation (or a fork copy). Scheduling fields
//! are owned by the review lifecycle and never written by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lowest ease factor the scheduler will ever store
pub const MIN_EASE: f64 = 1.3;

/// Ease factor of a card that has never been reviewed
pub const DEFAULT_EASE: f64 = 2.5;

/// Card difficulty as labelled by the generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Basic,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Basic => "basic",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }

    /// Parse generator output, treating unknown labels as missing
    pub fn parse_lenient(label: Option<&str>) -> Self {
        label
            .and_then(|l| l.trim().to_ascii_lowercase().parse::<Difficulty>().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Difficulty::Basic),
            "intermediate" => Ok(Difficulty::Intermediate),
            "advanced" => Ok(Difficulty::Advanced),
            other => Err(format!("unknown difficulty: {}", other)),
        }
    }
}

/// SM-2 scheduling state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulingState {
    /// Ease factor, always >= MIN_EASE
    pub ease: f64,
    /// Days until next review
    pub interval_days: u32,
    /// Consecutive successful reviews
    pub repetitions: u32,
    pub next_review_at: DateTime<Utc>,
}

impl SchedulingState {
    /// State of a brand-new card: immediately due
    pub fn new_card(now: DateTime<Utc>) -> Self {
        Self {
            ease: DEFAULT_EASE,
            interval_days: 0,
            repetitions: 0,
            next_review_at: now,
        }
    }
}

/// Unvalidated card proposal returned by the generation adapter
///
/// Every field is optional at parse time so that one bad candidate does not
/// poison the whole batch; `validate` decides what survives.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CandidateCard {
    #[serde(default)]
    pub front: Option<String>,
    #[serde(default)]
    pub back: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// SVG markup or structured diagram JSON
    #[serde(default)]
    pub visual_payload: Option<serde_json::Value>,
}

impl CandidateCard {
    /// Accept a candidate with non-empty front and back, applying defaults
    pub fn validate(self) -> Option<CardContent> {
        let front = non_blank(self.front)?;
        let back = non_blank(self.back)?;

        let visual_payload = match self.visual_payload {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => non_blank(Some(s)),
            Some(other) => Some(other.to_string()),
        };

        Some(CardContent {
            front,
            back,
            hint: non_blank(self.hint),
            difficulty: Difficulty::parse_lenient(self.difficulty.as_deref()),
            tags: normalize_tags(self.tags.unwrap_or_default()),
            visual_payload,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_tags(tags: Vec<String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Validated card content (everything except identity and scheduling)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardContent {
    pub front: String,
    pub back: String,
    pub hint: Option<String>,
    pub difficulty: Difficulty,
    pub tags: BTreeSet<String>,
    pub visual_payload: Option<String>,
}

impl CardContent {
    /// Plain front/back content with defaults for everything else
    pub fn basic(front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            front: front.into(),
            back: back.into(),
            hint: None,
            difficulty: Difficulty::Basic,
            tags: BTreeSet::new(),
            visual_payload: None,
        }
    }

    /// Text submitted to the embedding model
    pub fn embedding_input(&self) -> String {
        format!("{}\n\n{}", self.front, self.back)
    }
}

/// Persisted Card record
#[derive(Debug, Clone, Serialize)]
pub struct Card {
    pub guid: Uuid,
    pub deck_id: Uuid,
    /// Producing source; cleared when the source is deleted
    pub source_id: Option<Uuid>,
    #[serde(flatten)]
    pub content: CardContent,
    /// Vector index reference, set by the embedding stage
    pub vector_id: Option<String>,
    /// Last embedding failure, cleared on success
    pub embedding_error: Option<String>,
    #[serde(flatten)]
    pub scheduling: SchedulingState,
    pub created_at: DateTime<Utc>,
}

impl Card {
    /// New card with default scheduling
    pub fn new(
        deck_id: Uuid,
        source_id: Option<Uuid>,
        content: CardContent,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            guid: Uuid::new_v4(),
            deck_id,
            source_id,
            content,
            vector_id: None,
            embedding_error: None,
            scheduling: SchedulingState::new_card(now),
            created_at: now,
        }
    }
}
