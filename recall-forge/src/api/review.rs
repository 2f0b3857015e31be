//! Review endpoints
//!
//! GET /review/next, POST /review/:card_id/rate

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::services::review::{get_next_due, submit_rating, RatingOutcome};
use crate::AppState;

/// GET /review/next query
#[derive(Debug, Default, Deserialize)]
pub struct NextDueQuery {
    #[serde(default)]
    pub deck: Option<Uuid>,
}

/// POST /review/:card_id/rate request
#[derive(Debug, Deserialize)]
pub struct RateRequest {
    pub rating: i64,
}

/// GET /review/next
///
/// Returns the earliest due card, or a message when nothing is due.
pub async fn next_due(
    State(state): State<AppState>,
    Query(query): Query<NextDueQuery>,
) -> ApiResult<Response> {
    let card = get_next_due(&state.db, query.deck, Utc::now()).await?;

    Ok(match card {
        Some(card) => Json(card).into_response(),
        None => Json(json!({ "message": "No cards due for review" })).into_response(),
    })
}

/// POST /review/:card_id/rate
pub async fn rate(
    State(state): State<AppState>,
    Path(card_id): Path<Uuid>,
    Json(request): Json<RateRequest>,
) -> ApiResult<Json<RatingOutcome>> {
    let outcome = submit_rating(&state.db, &state.event_bus, card_id, request.rating).await?;
    Ok(Json(outcome))
}

/// Build review routes
pub fn review_routes() -> Router<AppState> {
    Router::new()
        .route("/review/next", get(next_due))
        .route("/review/:card_id/rate", post(rate))
}
