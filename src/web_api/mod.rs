//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes (thin pass-throughs to the core, no business logic)
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Health response body
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    subscription_running: bool,
    recognition_connected: bool,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let recognition_ok = state.recognition.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        subscription_running: state.subscriber.is_running().await,
        recognition_connected: recognition_ok,
    })
}
