use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use shipwise_core::request::RateRequest;
use shipwise_core::ShippingRate;
use shipwise_fulfillment::IngestOutcome;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RatesResponse {
    pub rates: Vec<ShippingRate>,
}

#[derive(Debug, Serialize)]
pub struct CarriersResponse {
    pub carriers: Vec<&'static str>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/rates", post(get_rates))
        .route("/v1/carriers", get(list_carriers))
        .route("/v1/webhooks/carriers/{carrier}", post(carrier_webhook))
}

/// POST /v1/rates
/// Quotes from one carrier, or from every enabled carrier sorted by total
async fn get_rates(
    State(state): State<AppState>,
    Json(req): Json<RateRequest>,
) -> Result<Json<RatesResponse>, AppError> {
    let rates = state.orchestrator.get_shipping_rates(&req).await?;
    Ok(Json(RatesResponse { rates }))
}

/// GET /v1/carriers
async fn list_carriers(State(state): State<AppState>) -> Json<CarriersResponse> {
    Json(CarriersResponse {
        carriers: state.carriers.keys(),
    })
}

/// POST /v1/webhooks/carriers/{carrier}
/// Carrier push notification in the carrier's native format
async fn carrier_webhook(
    State(state): State<AppState>,
    Path(carrier): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<IngestOutcome>, AppError> {
    tracing::info!(carrier = %carrier, "Received carrier webhook");
    Ok(Json(state.tracker.ingest_carrier_webhook(&carrier, payload).await?))
}
