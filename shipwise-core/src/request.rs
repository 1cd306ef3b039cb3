use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Address, Package, Recipient, ShipmentStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateShipmentRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub recipient: Recipient,
    pub shipping_address: Address,
    pub package: Package,
    pub carrier: String,
    pub service_type: String,
    #[serde(default)]
    pub special_instructions: Option<String>,
}

/// A status report for one shipment, from a carrier callback or an operator.
///
/// `status` stays a string until validation so an unknown value can be
/// reported alongside every other problem with the update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingUpdate {
    pub tracking_number: String,
    pub status: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub description: String,
    #[serde(default)]
    pub delivery_attempt: Option<i32>,
    #[serde(default)]
    pub carrier_payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRequest {
    #[serde(default)]
    pub carrier: Option<String>,
    pub origin_postal_code: String,
    pub destination_postal_code: String,
    pub destination_country: String,
    pub package: Package,
    #[serde(default)]
    pub service_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusOverride {
    pub status: ShipmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
}
