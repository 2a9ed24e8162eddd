//! API route handlers.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::storage::RaceStore;
use crate::types::{HealthResponse, Race};

/// Body returned for every internal failure.
pub const INTERNAL_ERROR_BODY: &str = "internal error";

/// Application state shared across handlers.
pub struct AppState {
    pub store: Arc<dyn RaceStore>,
    pub config: AppConfig,
}

/// Error type for API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// An internal failure. Details stay in the logs; the caller sees a
    /// fixed body.
    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: INTERNAL_ERROR_BODY.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/races", get(list_races))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Race listing endpoint.
pub async fn list_races(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Race>>, ApiError> {
    let store = Arc::clone(&state.store);
    let timeout = state.config.database.timeout();

    let query = tokio::task::spawn_blocking(move || store.list_races());

    match tokio::time::timeout(timeout, query).await {
        Ok(Ok(Ok(races))) => {
            tracing::info!(count = races.len(), "Fetched races");
            Ok(Json(races))
        }
        Ok(Ok(Err(e))) => {
            tracing::error!("Race query failed: {:#}", e);
            Err(ApiError::internal())
        }
        Ok(Err(e)) => {
            tracing::error!("Race query worker failed: {}", e);
            Err(ApiError::internal())
        }
        Err(_) => {
            tracing::error!("Race query timed out after {:?}", timeout);
            Err(ApiError::internal())
        }
    }
}
