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

pub const KEY: &str = "dhl";
const WAYBILL_DIGITS: usize = 10;

/// Declared value DHL will insure
pub const INSURANCE_CAP: f64 = 50_000.0;

const SERVICES: &[ServiceLevel] = &[
    ServiceLevel { code: "express_worldwide", name: "DHL Express Worldwide", transit_days: 3, base: 900.0, per_kg: 350.0 },
    ServiceLevel { code: "economy_select", name: "DHL Economy Select", transit_days: 6, base: 600.0, per_kg: 220.0 },
];

pub const TARIFF: Tariff = Tariff {
    services: SERVICES,
    fuel_surcharge: 0.2,
    tax: 0.18,
    volumetric_divisor: 5000.0,
    currency: "INR",
};

pub fn tracking_url(waybill: &str) -> String {
    format!("https://www.dhl.com/en/express/tracking.html?AWB={}", waybill)
}

fn native_code(stage: SandboxStage) -> &'static str {
    match stage {
        SandboxStage::Booked => "pre-transit",
        SandboxStage::PickedUp | SandboxStage::InTransit => "transit",
        SandboxStage::OutForDelivery => "out-for-delivery",
        SandboxStage::Delivered => "delivered",
        SandboxStage::Undelivered => "failure",
        SandboxStage::Returned => "returned",
        SandboxStage::Cancelled => "cancelled",
    }
}

pub fn map_status(code: &str) -> ShipmentStatus {
    match code.trim().to_ascii_lowercase().as_str() {
        "pre-transit" => ShipmentStatus::Pending,
        "transit" => ShipmentStatus::InTransit,
        "out-for-delivery" => ShipmentStatus::OutForDelivery,
        "delivered" => ShipmentStatus::Delivered,
        "failure" => ShipmentStatus::FailedDelivery,
        "returned" => ShipmentStatus::Returned,
        "cancelled" => ShipmentStatus::Cancelled,
        _ => ShipmentStatus::Exception,
    }
}

const VOCABULARY: Vocabulary = Vocabulary {
    native_code,
    map_status,
    tracking_url,
};

fn problem(title: &str, detail: String) -> CarrierResponse {
    CarrierResponse::failure(detail.clone(), json!({ "title": title, "detail": detail }))
}

pub struct DhlAdapter {
    ledger: Arc<SandboxLedger>,
}

impl DhlAdapter {
    pub fn new(ledger: Arc<SandboxLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl CarrierAdapter for DhlAdapter {
    fn key(&self) -> &'static str {
        KEY
    }

    fn display_name(&self) -> &'static str {
        "DHL Express"
    }

    async fn create_shipment(&self, request: &CarrierShipmentRequest) -> AdapterResult<CarrierResponse> {
        if let GateVerdict::Reject(reason) = self.ledger.gate(KEY).await? {
            return Ok(problem("Request rejected", reason));
        }

        let Some(service) = TARIFF.service(&request.service_type) else {
            return Ok(problem(
                "Invalid product",
                format!("product '{}' is not available", request.service_type),
            ));
        };
        if request.package.value > INSURANCE_CAP {
            return Ok(problem(
                "Declared value too high",
                format!(
                    "declared value {:.2} exceeds the insurable maximum of {:.2}",
                    request.package.value, INSURANCE_CAP
                ),
            ));
        }

        let parcel = self
            .ledger
            .book(KEY, WAYBILL_DIGITS, service.code, service.transit_days, &request.shipping_address.city)
            .await;
        info!(waybill = %parcel.tracking_number, order = %request.order_number, "DHL shipment created");

        let mut response = sandbox::tracking_response(&parcel, &VOCABULARY);
        response.carrier_response = json!({
            "shipmentTrackingNumber": parcel.tracking_number,
            "productCode": service.code,
            "estimatedDeliveryDate": parcel.estimated_delivery,
        });
        Ok(response)
    }

    async fn track_shipment(&self, tracking_number: &str) -> AdapterResult<CarrierResponse> {
        if let GateVerdict::Reject(reason) = self.ledger.gate(KEY).await? {
            return Ok(problem("Request rejected", reason));
        }
        match self.ledger.parcel(tracking_number).await {
            Some(parcel) => Ok(sandbox::tracking_response(&parcel, &VOCABULARY)),
            None => Ok(problem("No result found", format!("no shipment with id {}", tracking_number))),
        }
    }

    async fn cancel_shipment(&self, tracking_number: &str) -> AdapterResult<CarrierResponse> {
        if let GateVerdict::Reject(reason) = self.ledger.gate(KEY).await? {
            return Ok(problem("Request rejected", reason));
        }
        match self.ledger.cancel(tracking_number).await {
            CancelOutcome::Cancelled | CancelOutcome::AlreadyCancelled => match self.ledger.parcel(tracking_number).await {
                Some(parcel) => Ok(sandbox::tracking_response(&parcel, &VOCABULARY)),
                None => Ok(problem("No result found", format!("no shipment with id {}", tracking_number))),
            },
            CancelOutcome::TooLate(stage) => Ok(problem(
                "Cancellation not possible",
                format!("shipment {} is {}", tracking_number, native_code(stage)),
            )),
            CancelOutcome::UnknownParcel => {
                Ok(problem("No result found", format!("no shipment with id {}", tracking_number)))
            }
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
        if request.package.value > INSURANCE_CAP {
            return Ok(Vec::new());
        }
        Ok(TARIFF.quote(KEY, request))
    }

    /// DHL tracking push, same shape as its tracking API:
    /// `{ "shipments": [{ "id", "status": { "statusCode", "timestamp", "description",
    /// "location": { "address": { "addressLocality" } } } }] }`
    fn parse_webhook(&self, payload: &Value) -> Result<CarrierStatusUpdate, String> {
        let shipment = payload["shipments"]
            .as_array()
            .and_then(|shipments| shipments.first())
            .ok_or("shipments[0] is required")?;
        let id = shipment["id"].as_str().ok_or("shipments[0].id is required")?;
        let status = &shipment["status"];
        let code = status["statusCode"]
            .as_str()
            .ok_or("shipments[0].status.statusCode is required")?;
        let raw_ts = status["timestamp"]
            .as_str()
            .ok_or("shipments[0].status.timestamp is required")?;
        let timestamp = DateTime::parse_from_rfc3339(raw_ts)
            .map_err(|e| format!("timestamp '{}' is not RFC 3339: {}", raw_ts, e))?
            .with_timezone(&Utc);

        Ok(CarrierStatusUpdate {
            tracking_number: id.trim().to_string(),
            status: map_status(code),
            native_code: code.to_string(),
            location: status["location"]["address"]["addressLocality"]
                .as_str()
                .map(str::to_string),
            timestamp,
            description: status["description"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("DHL status {}", code)),
            delivery_attempt: None,
        })
    }
}
