use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use shipwise_core::Shipment;
use shipwise_fulfillment::{DelayedShipment, DeliverySummary};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ConfirmDeliveryRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportIssueRequest {
    pub issue: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RescheduleRequest {
    pub new_date: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub order_id: Option<Uuid>,
}

// ============================================================================
// Routes
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/shipments/{id}/confirm-delivery", post(confirm_delivery))
        .route("/v1/shipments/{id}/issues", post(report_issue))
        .route("/v1/shipments/{id}/reschedule", post(reschedule))
        .route("/v1/delivery/summary", get(summary))
        .route("/v1/delivery/delayed", get(delayed))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/shipments/{id}/confirm-delivery
async fn confirm_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ConfirmDeliveryRequest>>,
) -> Result<Json<Shipment>, AppError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(state.finalizer.confirm_delivery(id, req.notes).await?))
}

/// POST /v1/shipments/{id}/issues
/// Resets the shipment to PENDING and the order to PROCESSING for a retry
async fn report_issue(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReportIssueRequest>,
) -> Result<Json<Shipment>, AppError> {
    Ok(Json(
        state.finalizer.report_delivery_issue(id, &req.issue, req.notes).await?,
    ))
}

/// POST /v1/shipments/{id}/reschedule
async fn reschedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RescheduleRequest>,
) -> Result<Json<Shipment>, AppError> {
    Ok(Json(
        state.finalizer.reschedule_delivery(id, req.new_date, &req.reason).await?,
    ))
}

/// GET /v1/delivery/summary?order_id=
async fn summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<DeliverySummary>, AppError> {
    Ok(Json(state.finalizer.get_delivery_summary(query.order_id).await?))
}

/// GET /v1/delivery/delayed
/// Most delayed first
async fn delayed(State(state): State<AppState>) -> Result<Json<Vec<DelayedShipment>>, AppError> {
    Ok(Json(state.finalizer.get_delayed_shipments().await?))
}
