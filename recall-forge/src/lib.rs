//! recall-forge library interface
//!
//! Exposes the pipeline, review and fork services plus the HTTP router for
//! the binary and for integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult, ForgeError, ForgeResult};

use axum::Router;
use chrono::{DateTime, Utc};
use recall_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::workflow::Orchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Broadcast bus for pipeline and review events
    pub event_bus: EventBus,
    /// Entry point into the ingestion pipeline
    pub orchestrator: Arc<Orchestrator>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            db,
            event_bus,
            orchestrator,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::deck_routes())
        .merge(api::card_routes())
        .merge(api::ingest_routes())
        .merge(api::review_routes())
        .merge(api::health_routes())
        .merge(api::event_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
