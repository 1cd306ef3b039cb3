use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use shipwise_core::carrier::{
    AdapterResult, CarrierAdapter, CarrierResponse, CarrierShipmentRequest, CarrierStatusUpdate, ShippingRate,
};
use shipwise_core::request::RateRequest;
use shipwise_core::ShipmentStatus;
use std::sync::Arc;
use tracing::info;

use crate::sandbox::{self, CancelOutcome, GateVerdict, SandboxError, SandboxLedger, SandboxStage, Vocabulary};
use crate::tariff::{ServiceLevel, Tariff};

pub const KEY: &str = "fedex";
const TRACKING_DIGITS: usize = 12;

const SERVICES: &[ServiceLevel] = &[
    ServiceLevel { code: "priority_overnight", name: "FedEx Priority Overnight", transit_days: 1, base: 450.0, per_kg: 150.0 },
    ServiceLevel { code: "express", name: "FedEx Express Saver", transit_days: 2, base: 300.0, per_kg: 110.0 },
    ServiceLevel { code: "ground", name: "FedEx Ground", transit_days: 5, base: 150.0, per_kg: 45.0 },
];

pub const TARIFF: Tariff = Tariff {
    services: SERVICES,
    fuel_surcharge: 0.12,
    tax: 0.18,
    volumetric_divisor: 5000.0,
    currency: "INR",
};

pub fn tracking_url(tracking_number: &str) -> String {
    format!("https://www.fedex.com/fedextrack/?trknbr={}", tracking_number)
}

fn native_code(stage: SandboxStage) -> &'static str {
    match stage {
        SandboxStage::Booked => "OC",
        SandboxStage::PickedUp => "PU",
        SandboxStage::InTransit => "IT",
        SandboxStage::OutForDelivery => "OD",
        SandboxStage::Delivered => "DL",
        SandboxStage::Undelivered => "DE",
        SandboxStage::Returned => "RS",
        SandboxStage::Cancelled => "CA",
    }
}

/// FedEx scan event types to shipment status.
///
/// `DE` is a delivery exception: the courier attempted and failed. Any code we
/// do not know is surfaced as an exception for an operator to look at.
pub fn map_status(code: &str) -> ShipmentStatus {
    match code.trim().to_ascii_uppercase().as_str() {
        "OC" => ShipmentStatus::Pending,
        "PU" | "IT" | "AR" | "DP" => ShipmentStatus::InTransit,
        "OD" => ShipmentStatus::OutForDelivery,
        "DL" => ShipmentStatus::Delivered,
        "DE" => ShipmentStatus::FailedDelivery,
        "RS" => ShipmentStatus::Returned,
        "CA" => ShipmentStatus::Cancelled,
        _ => ShipmentStatus::Exception,
    }
}

const VOCABULARY: Vocabulary = Vocabulary {
    native_code,
    map_status,
    tracking_url,
};

pub struct FedexAdapter {
    ledger: Arc<SandboxLedger>,
}

impl FedexAdapter {
    pub fn new(ledger: Arc<SandboxLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl CarrierAdapter for FedexAdapter {
    fn key(&self) -> &'static str {
        KEY
    }

    fn display_name(&self) -> &'static str {
        "FedEx"
    }

    async fn create_shipment(&self, request: &CarrierShipmentRequest) -> AdapterResult<CarrierResponse> {
        if let GateVerdict::Reject(reason) = self.ledger.gate(KEY).await? {
            return Ok(CarrierResponse::failure(reason, json!({ "errors": [{ "code": "SHIPMENT.REJECTED" }] })));
        }

        let Some(service) = TARIFF.service(&request.service_type) else {
            return Ok(CarrierResponse::failure(
                format!("FedEx does not offer service '{}'", request.service_type),
                json!({ "errors": [{ "code": "SERVICETYPE.INVALID", "message": request.service_type }] }),
            ));
        };
        // FedEx labels need a dialable number with country code
        if !request.recipient.phone.expose().starts_with('+') {
            return Ok(CarrierResponse::failure(
                "recipient phone must include the country code",
                json!({ "errors": [{ "code": "RECIPIENT.PHONENUMBER.INVALID" }] }),
            ));
        }

        let parcel = self
            .ledger
            .book(KEY, TRACKING_DIGITS, service.code, service.transit_days, &request.shipping_address.city)
            .await;
        info!(tracking_number = %parcel.tracking_number, order = %request.order_number, "FedEx shipment created");

        let mut response = sandbox::tracking_response(&parcel, &VOCABULARY);
        response.carrier_response = json!({
            "output": {
                "transactionShipments": [{
                    "masterTrackingNumber": parcel.tracking_number,
                    "serviceType": service.code.to_ascii_uppercase(),
                }]
            }
        });
        Ok(response)
    }

    async fn track_shipment(&self, tracking_number: &str) -> AdapterResult<CarrierResponse> {
        if let GateVerdict::Reject(reason) = self.ledger.gate(KEY).await? {
            return Ok(CarrierResponse::failure(reason, json!({ "errors": [{ "code": "TRACKING.REJECTED" }] })));
        }
        match self.ledger.parcel(tracking_number).await {
            Some(parcel) => Ok(sandbox::tracking_response(&parcel, &VOCABULARY)),
            None => Ok(CarrierResponse::failure(
                format!("tracking number {} cannot be found", tracking_number),
                json!({ "errors": [{ "code": "TRACKING.TRACKINGNUMBER.NOTFOUND" }] }),
            )),
        }
    }

    async fn cancel_shipment(&self, tracking_number: &str) -> AdapterResult<CarrierResponse> {
        if let GateVerdict::Reject(reason) = self.ledger.gate(KEY).await? {
            return Ok(CarrierResponse::failure(reason, json!({ "errors": [{ "code": "SHIPMENT.REJECTED" }] })));
        }
        match self.ledger.cancel(tracking_number).await {
            CancelOutcome::Cancelled | CancelOutcome::AlreadyCancelled => {
                let Some(parcel) = self.ledger.parcel(tracking_number).await else {
                    return Ok(CarrierResponse::failure("shipment vanished", Value::Null));
                };
                let mut response = sandbox::tracking_response(&parcel, &VOCABULARY);
                response.carrier_response = json!({ "output": { "cancelledShipment": true } });
                Ok(response)
            }
            CancelOutcome::TooLate(stage) => Ok(CarrierResponse::failure(
                format!("shipment {} already {}", tracking_number, native_code(stage)),
                json!({ "errors": [{ "code": "SHIPMENT.CANCEL.NOTALLOWED" }] }),
            )),
            CancelOutcome::UnknownParcel => Ok(CarrierResponse::failure(
                format!("tracking number {} cannot be found", tracking_number),
                json!({ "errors": [{ "code": "TRACKING.TRACKINGNUMBER.NOTFOUND" }] }),
            )),
        }
    }

    async fn get_shipping_rates(&self, request: &RateRequest) -> AdapterResult<Vec<ShippingRate>> {
        if let GateVerdict::Reject(reason) = self.ledger.gate(KEY).await? {
            return Err(SandboxError::Refused {
                carrier: KEY.to_string(),
                reason,
            }
            .into());
        }
        Ok(TARIFF.quote(KEY, request))
    }

    /// FedEx push notification:
    /// `{ "trackingNumber", "scanEvent": { "eventType", "date", "eventDescription",
    /// "scanLocation": { "city", "countryCode" } }, "deliveryAttempts" }`
    fn parse_webhook(&self, payload: &Value) -> Result<CarrierStatusUpdate, String> {
        let tracking_number = payload["trackingNumber"]
            .as_str()
            .ok_or("trackingNumber is required")?;
        let scan = payload
            .get("scanEvent")
            .filter(|v| v.is_object())
            .ok_or("scanEvent is required")?;
        let code = scan["eventType"].as_str().ok_or("scanEvent.eventType is required")?;
        let date = scan["date"].as_str().ok_or("scanEvent.date is required")?;
        let timestamp = DateTime::parse_from_rfc3339(date)
            .map_err(|e| format!("scanEvent.date '{}' is not RFC 3339: {}", date, e))?
            .with_timezone(&Utc);

        let location = match (scan["scanLocation"]["city"].as_str(), scan["scanLocation"]["countryCode"].as_str()) {
            (Some(city), Some(country)) => Some(format!("{}, {}", city, country)),
            (Some(city), None) => Some(city.to_string()),
            _ => None,
        };

        Ok(CarrierStatusUpdate {
            tracking_number: tracking_number.trim().to_string(),
            status: map_status(code),
            native_code: code.to_string(),
            location,
            timestamp,
            description: scan["eventDescription"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("FedEx scan {}", code)),
            delivery_attempt: payload["deliveryAttempts"].as_i64().map(|n| n as i32),
        })
    }
}
