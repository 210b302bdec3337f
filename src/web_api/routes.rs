//! API Routes

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Events & verification outcomes
        .route("/api/events", get(list_events))
        .route("/api/verifications", get(list_verifications))
        // Subscription control
        .route("/api/subscription/start", post(start_subscription))
        .route("/api/subscription/stop", post(stop_subscription))
        .route("/api/subscription/status", get(subscription_status))
        .with_state(state)
}

/// Query params for list endpoints
#[derive(Debug, Deserialize)]
struct ListQuery {
    /// Max entries to return (newest first)
    count: Option<usize>,
}

/// GET /api/events - recent camera events
async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let count = query.count.unwrap_or(50).min(500);
    let events = state.event_log.latest_events(count).await;
    Json(json!({ "events": events }))
}

/// GET /api/verifications - recent verification outcomes
async fn list_verifications(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let count = query.count.unwrap_or(50).min(500);
    let verifications = state.event_log.latest_verifications(count).await;
    Json(json!({ "verifications": verifications }))
}

/// POST /api/subscription/start - begin listening to the camera feed
async fn start_subscription(State(state): State<AppState>) -> impl IntoResponse {
    state.subscriber.start().await;
    Json(json!({ "running": true }))
}

/// POST /api/subscription/stop - stop listening (in-flight runs finish)
async fn stop_subscription(State(state): State<AppState>) -> impl IntoResponse {
    state.subscriber.stop().await;
    Json(json!({ "running": false }))
}

/// GET /api/subscription/status
async fn subscription_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "running": state.subscriber.is_running().await,
        "in_flight": state.subscriber.in_flight(),
    }))
}
