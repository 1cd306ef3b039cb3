use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{Address, Package, Recipient, ShipmentStatus};
use crate::request::{CreateShipmentRequest, RateRequest};

/// Transport-level failure talking to a carrier. Business refusals are not
/// errors; they come back as `CarrierResponse { success: false, .. }`.
pub type AdapterResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Carrier-agnostic shipment booking request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierShipmentRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub recipient: Recipient,
    pub shipping_address: Address,
    pub package: Package,
    pub service_type: String,
    pub special_instructions: Option<String>,
}

impl From<&CreateShipmentRequest> for CarrierShipmentRequest {
    fn from(req: &CreateShipmentRequest) -> Self {
        Self {
            order_id: req.order_id,
            order_number: req.order_number.clone(),
            recipient: req.recipient.clone(),
            shipping_address: req.shipping_address.clone(),
            package: req.package.clone(),
            service_type: req.service_type.clone(),
            special_instructions: req.special_instructions.clone(),
        }
    }
}

/// One scan in the carrier's history, already mapped to our status vocabulary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CarrierCheckpoint {
    pub status: ShipmentStatus,
    pub native_code: String,
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

/// Uniform envelope every adapter returns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CarrierResponse {
    pub success: bool,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub status: Option<ShipmentStatus>,
    pub location: Option<String>,
    /// When the carrier recorded `status`
    pub status_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<CarrierCheckpoint>,
    pub carrier_response: Value,
    pub error: Option<String>,
}

impl CarrierResponse {
    pub fn failure(error: impl Into<String>, carrier_response: Value) -> Self {
        Self {
            success: false,
            tracking_number: None,
            tracking_url: None,
            estimated_delivery: None,
            status: None,
            location: None,
            status_at: None,
            history: Vec::new(),
            carrier_response,
            error: Some(error.into()),
        }
    }

    /// Human-readable failure reason, with a fallback for carriers that send none
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "carrier reported failure without a reason".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShippingRate {
    pub carrier: String,
    pub service_type: String,
    pub service_name: String,
    pub delivery_time: String,
    pub rate: f64,
    pub total_rate: f64,
    pub currency: String,
}

/// A carrier push notification translated into our vocabulary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CarrierStatusUpdate {
    pub tracking_number: String,
    pub status: ShipmentStatus,
    pub native_code: String,
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub delivery_attempt: Option<i32>,
}

/// The capability set every carrier integration provides.
///
/// Implementations must not return `Err` for a carrier-side refusal; `Err`
/// means the carrier could not be reached or answered garbage.
#[async_trait]
pub trait CarrierAdapter: Send + Sync {
    /// Registry key, e.g. `blue_dart`
    fn key(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    async fn create_shipment(&self, request: &CarrierShipmentRequest) -> AdapterResult<CarrierResponse>;

    async fn track_shipment(&self, tracking_number: &str) -> AdapterResult<CarrierResponse>;

    /// Cancelling an already-cancelled shipment succeeds.
    async fn cancel_shipment(&self, tracking_number: &str) -> AdapterResult<CarrierResponse>;

    async fn get_shipping_rates(&self, request: &RateRequest) -> AdapterResult<Vec<ShippingRate>>;

    /// Translate a carrier-native webhook body.
    fn parse_webhook(&self, payload: &Value) -> Result<CarrierStatusUpdate, String>;
}
