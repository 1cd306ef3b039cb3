use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use shipwise_core::request::TrackingUpdate;
use shipwise_core::TrackingEvent;
use shipwise_fulfillment::{IngestOutcome, TrackingSnapshot};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/tracking/{tracking_number}", get(track))
        .route("/v1/shipments/{id}/events", get(list_events).post(add_event))
}

/// GET /v1/tracking/{tracking_number}
/// Live carrier tracking; the stored status follows the carrier's
async fn track(
    State(state): State<AppState>,
    Path(tracking_number): Path<String>,
) -> Result<Json<TrackingSnapshot>, AppError> {
    Ok(Json(state.tracker.track_shipment(&tracking_number).await?))
}

/// POST /v1/shipments/{id}/events
async fn add_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<TrackingUpdate>,
) -> Result<(StatusCode, Json<IngestOutcome>), AppError> {
    let outcome = state.tracker.add_tracking_event(id, update).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /v1/shipments/{id}/events
/// Oldest first by event time, including events kept for audit only
async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<TrackingEvent>>, AppError> {
    Ok(Json(state.tracker.get_tracking_events(id).await?))
}
