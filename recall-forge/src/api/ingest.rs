//! Ingestion endpoints
//!
//! POST /ingest starts the pipeline for one source and returns 202 at once;
//! POST /ingest/upload does the same for a multipart file upload;
//! GET /ingest/:id is polled for progress.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{cards, decks, sources};
use crate::error::{ApiError, ApiResult};
use crate::models::SourceSubmission;
use crate::AppState;
use recall_common::SourceStatus;

/// Largest accepted upload, matching the generator's inline file limit
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// POST /ingest request
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub deck_id: Uuid,
    #[serde(flatten)]
    pub submission: SourceSubmission,
}

/// POST /ingest response
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub source_id: Uuid,
    pub status: SourceStatus,
}

/// GET /ingest/:id response
#[derive(Debug, Serialize)]
pub struct SourceStatusResponse {
    pub source_id: Uuid,
    pub deck_id: Uuid,
    pub status: SourceStatus,
    pub error_log: String,
    pub card_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// POST /ingest
pub async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let source_id = state
        .orchestrator
        .submit_source(&request.submission, request.deck_id)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            source_id,
            status: SourceStatus::Processing,
        }),
    ))
}

/// POST /ingest/upload
///
/// Multipart form with a `deck_id` text field and a `file` part. The file
/// is stored in the upload folder and ingested as a file source.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let mut deck_id: Option<Uuid> = None;
    let mut file_name: Option<String> = None;
    let mut data: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        match field.name() {
            Some("deck_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?;
                deck_id = Some(value.trim().parse().map_err(|_| {
                    ApiError::BadRequest(format!("Invalid deck_id: {}", value))
                })?);
            }
            Some("file") => {
                file_name = field.file_name().map(str::to_string);
                data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("Read error: {}", e)))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let deck_id =
        deck_id.ok_or_else(|| ApiError::BadRequest("Missing deck_id in multipart form".into()))?;
    let data = data.ok_or_else(|| ApiError::BadRequest("Missing file in multipart form".into()))?;

    // Check the deck before anything lands on disk
    if !decks::deck_exists(&state.db, deck_id).await? {
        return Err(ApiError::NotFound(format!("Deck not found: {}", deck_id)));
    }

    let path = state
        .orchestrator
        .uploads()
        .save(file_name.as_deref(), &data)
        .await?;
    let submission = SourceSubmission::file(path.to_string_lossy());

    let source_id = match state.orchestrator.submit_source(&submission, deck_id).await {
        Ok(source_id) => source_id,
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %rm, "Failed to remove orphaned upload");
            }
            return Err(e.into());
        }
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            source_id,
            status: SourceStatus::Processing,
        }),
    ))
}

/// GET /ingest/:id
pub async fn source_status(
    State(state): State<AppState>,
    Path(source_id): Path<Uuid>,
) -> ApiResult<Json<SourceStatusResponse>> {
    let source = sources::load_source(&state.db, source_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Source not found: {}", source_id)))?;
    let card_count = cards::list_cards_for_source(&state.db, source_id).await?.len();

    Ok(Json(SourceStatusResponse {
        source_id: source.guid,
        deck_id: source.deck_id,
        status: source.status,
        error_log: source.error_log,
        card_count,
        updated_at: source.updated_at,
    }))
}

/// Build ingestion routes
pub fn ingest_routes() -> Router<AppState> {
    Router::new()
        .route("/ingest", post(ingest))
        .route(
            "/ingest/upload",
            post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/ingest/:id", get(source_status))
}
