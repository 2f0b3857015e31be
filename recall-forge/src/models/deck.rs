//! Deck: grouping container for cards and sources

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted Deck record
#[derive(Debug, Clone, Serialize)]
pub struct Deck {
    pub guid: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Opaque owner identifier; account management lives elsewhere
    pub owner: Option<String>,
    /// Set only on forks
    pub parent_deck_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Request to create a deck
#[derive(Debug, Clone, Deserialize)]
pub struct NewDeck {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

impl Deck {
    pub fn new(new_deck: NewDeck, now: DateTime<Utc>) -> Self {
        Self {
            guid: Uuid::new_v4(),
            name: new_deck.name,
            description: new_deck.description,
            owner: new_deck.owner,
            parent_deck_id: None,
            created_at: now,
        }
    }

    /// Fork of `parent` owned by `owner`
    pub fn fork_of(parent: &Deck, owner: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            guid: Uuid::new_v4(),
            name: format!("Fork of {}", parent.name),
            description: parent.description.clone(),
            owner,
            parent_deck_id: Some(parent.guid),
            created_at: now,
        }
    }
}
