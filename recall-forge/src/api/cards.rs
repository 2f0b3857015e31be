//! Card endpoints
//!
//! GET /cards?deck=, POST /cards (manual authoring)

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::{cards, decks};
use crate::error::{ApiError, ApiResult};
use crate::models::{CandidateCard, Card};
use crate::AppState;

/// GET /cards query
#[derive(Debug, Default, Deserialize)]
pub struct CardListQuery {
    #[serde(default)]
    pub deck: Option<Uuid>,
}

/// POST /cards request; same shape the generator produces, plus the deck
#[derive(Debug, Deserialize)]
pub struct NewCardRequest {
    pub deck_id: Uuid,
    #[serde(flatten)]
    pub content: CandidateCard,
}

/// GET /cards
pub async fn list_cards(
    State(state): State<AppState>,
    Query(query): Query<CardListQuery>,
) -> ApiResult<Json<Vec<Card>>> {
    Ok(Json(cards::list_cards(&state.db, query.deck).await?))
}

/// POST /cards
///
/// A hand-written card goes through the same validation as generated ones
/// and is queued for embedding.
pub async fn create_card(
    State(state): State<AppState>,
    Json(request): Json<NewCardRequest>,
) -> ApiResult<(StatusCode, Json<Card>)> {
    let content = request
        .content
        .validate()
        .ok_or_else(|| ApiError::BadRequest("Card front and back cannot be empty".into()))?;

    if !decks::deck_exists(&state.db, request.deck_id).await? {
        return Err(ApiError::NotFound(format!("Deck not found: {}", request.deck_id)));
    }

    let card = Card::new(request.deck_id, None, content, Utc::now());
    cards::insert_cards(&state.db, std::slice::from_ref(&card)).await?;
    tracing::info!(card_id = %card.guid, deck_id = %card.deck_id, "Card created");

    state.orchestrator.enqueue_embedding(vec![card.guid])?;

    Ok((StatusCode::CREATED, Json(card)))
}

/// Build card routes
pub fn card_routes() -> Router<AppState> {
    Router::new().route("/cards", get(list_cards).post(create_card))
}
