use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use shipwise_core::request::{CreateShipmentRequest, StatusOverride};
use shipwise_core::Shipment;
use shipwise_fulfillment::IngestOutcome;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::admin_auth_middleware;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct CancelShipmentRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// ============================================================================
// Routes
// ============================================================================

pub fn routes(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .route("/v1/shipments/{id}/status", put(override_status))
        .route_layer(middleware::from_fn_with_state(state, admin_auth_middleware));

    Router::new()
        .route("/v1/shipments", post(create_shipment))
        .route("/v1/shipments/{id}", get(get_shipment))
        .route("/v1/shipments/{id}/cancel", post(cancel_shipment))
        .route("/v1/orders/{order_id}/shipments", get(list_order_shipments))
        .merge(admin)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/shipments
/// Book a paid order with its carrier
async fn create_shipment(
    State(state): State<AppState>,
    Json(req): Json<CreateShipmentRequest>,
) -> Result<(StatusCode, Json<Shipment>), AppError> {
    let shipment = state.orchestrator.create_shipment(req).await?;
    Ok((StatusCode::CREATED, Json(shipment)))
}

/// GET /v1/shipments/{id}
async fn get_shipment(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Shipment>, AppError> {
    Ok(Json(state.orchestrator.get_shipment(id).await?))
}

/// GET /v1/orders/{order_id}/shipments
/// Most recent first
async fn list_order_shipments(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Vec<Shipment>>, AppError> {
    Ok(Json(state.orchestrator.get_shipments_by_order(order_id).await?))
}

/// POST /v1/shipments/{id}/cancel
async fn cancel_shipment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelShipmentRequest>>,
) -> Result<Json<Shipment>, AppError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let shipment = state
        .orchestrator
        .cancel_shipment(id, req.reason.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(shipment))
}

/// PUT /v1/shipments/{id}/status
/// Administrative override; requires an admin token
async fn override_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusOverride>,
) -> Result<Json<IngestOutcome>, AppError> {
    Ok(Json(state.tracker.update_shipment_status(id, req).await?))
}
