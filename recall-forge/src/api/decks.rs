//! Deck endpoints
//!
//! POST /decks, GET /decks, GET /decks/:id, DELETE /decks/:id,
//! GET /decks/:id/cards, POST /decks/:id/fork

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{cards, decks};
use crate::error::{ApiError, ApiResult, ForgeError};
use crate::models::{Card, Deck, NewDeck};
use crate::services::deck_fork::fork_deck;
use crate::AppState;

/// POST /decks/:id/fork request
#[derive(Debug, Default, Deserialize)]
pub struct ForkRequest {
    #[serde(default)]
    pub owner: Option<String>,
}

/// POST /decks/:id/fork response
#[derive(Debug, Serialize)]
pub struct ForkResponse {
    pub deck_id: Uuid,
    pub parent_deck_id: Uuid,
    pub card_count: usize,
}

/// POST /decks
pub async fn create_deck(
    State(state): State<AppState>,
    Json(request): Json<NewDeck>,
) -> ApiResult<(StatusCode, Json<Deck>)> {
    if request.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Deck name cannot be empty".to_string()));
    }

    let deck = decks::create_deck(&state.db, request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(deck)))
}

/// GET /decks
pub async fn list_decks(State(state): State<AppState>) -> ApiResult<Json<Vec<Deck>>> {
    Ok(Json(decks::list_decks(&state.db).await?))
}

/// GET /decks/:id
pub async fn get_deck(
    State(state): State<AppState>,
    Path(deck_id): Path<Uuid>,
) -> ApiResult<Json<Deck>> {
    let mut conn = state.db.acquire().await.map_err(ForgeError::from)?;
    decks::load_deck(&mut conn, deck_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Deck not found: {}", deck_id)))
}

/// DELETE /decks/:id
///
/// Index cleanup is best effort; a leftover point only references a card id
/// that no longer exists.
pub async fn delete_deck(
    State(state): State<AppState>,
    Path(deck_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let card_ids = decks::delete_deck(&state.db, deck_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Deck not found: {}", deck_id)))?;

    if let Err(e) = state.orchestrator.vector_store().delete(&card_ids).await {
        tracing::warn!(
            deck_id = %deck_id,
            cards = card_ids.len(),
            error = %e,
            "Failed to remove index points of deleted deck"
        );
    }

    Ok(StatusCode::NO_CONTENT)
}

/// GET /decks/:id/cards
pub async fn list_deck_cards(
    State(state): State<AppState>,
    Path(deck_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Card>>> {
    if !decks::deck_exists(&state.db, deck_id).await? {
        return Err(ApiError::NotFound(format!("Deck not found: {}", deck_id)));
    }

    let cards = cards::list_cards_for_deck(&state.db, deck_id).await?;
    Ok(Json(cards))
}

/// POST /decks/:id/fork
///
/// The copies are queued for embedding under their own ids.
pub async fn fork(
    State(state): State<AppState>,
    Path(deck_id): Path<Uuid>,
    request: Option<Json<ForkRequest>>,
) -> ApiResult<(StatusCode, Json<ForkResponse>)> {
    let owner = request.and_then(|Json(r)| r.owner);
    let outcome = fork_deck(&state.db, &state.event_bus, deck_id, owner, Utc::now()).await?;

    let card_count = outcome.card_ids.len();
    state.orchestrator.enqueue_embedding(outcome.card_ids)?;

    Ok((
        StatusCode::CREATED,
        Json(ForkResponse {
            deck_id: outcome.deck_id,
            parent_deck_id: outcome.parent_deck_id,
            card_count,
        }),
    ))
}

/// Build deck routes
pub fn deck_routes() -> Router<AppState> {
    Router::new()
        .route("/decks", post(create_deck).get(list_decks))
        .route("/decks/:id", get(get_deck).delete(delete_deck))
        .route("/decks/:id/cards", get(list_deck_cards))
        .route("/decks/:id/fork", post(fork))
}
