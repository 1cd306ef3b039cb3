use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
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

pub const KEY: &str = "blue_dart";
const AWB_DIGITS: usize = 11;

const SERVICES: &[ServiceLevel] = &[
    ServiceLevel { code: "express", name: "Blue Dart Express", transit_days: 2, base: 120.0, per_kg: 60.0 },
    ServiceLevel { code: "standard", name: "Blue Dart Standard", transit_days: 5, base: 80.0, per_kg: 35.0 },
    ServiceLevel { code: "surface", name: "Blue Dart Surface", transit_days: 7, base: 60.0, per_kg: 20.0 },
];

pub const TARIFF: Tariff = Tariff {
    services: SERVICES,
    fuel_surcharge: 0.15,
    tax: 0.18,
    volumetric_divisor: 5000.0,
    currency: "INR",
};

pub fn tracking_url(awb: &str) -> String {
    format!("https://www.bluedart.com/tracking?awb={}", awb)
}

fn native_code(stage: SandboxStage) -> &'static str {
    match stage {
        SandboxStage::Booked => "MF",
        SandboxStage::PickedUp => "PU",
        SandboxStage::InTransit => "IT",
        SandboxStage::OutForDelivery => "OD",
        SandboxStage::Delivered => "DL",
        SandboxStage::Undelivered => "UD",
        SandboxStage::Returned => "RT",
        SandboxStage::Cancelled => "CN",
    }
}

/// Blue Dart scan codes to shipment status. Unknown codes are treated as an exception.
pub fn map_status(code: &str) -> ShipmentStatus {
    match code.trim().to_ascii_uppercase().as_str() {
        "MF" => ShipmentStatus::Pending,
        "PU" | "IT" => ShipmentStatus::InTransit,
        "OD" => ShipmentStatus::OutForDelivery,
        "DL" => ShipmentStatus::Delivered,
        "UD" => ShipmentStatus::FailedDelivery,
        "RT" => ShipmentStatus::Returned,
        "CN" => ShipmentStatus::Cancelled,
        _ => ShipmentStatus::Exception,
    }
}

const VOCABULARY: Vocabulary = Vocabulary {
    native_code,
    map_status,
    tracking_url,
};

fn is_pincode(postal_code: &str) -> bool {
    let code = postal_code.trim();
    code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()) && !code.starts_with('0')
}

/// Blue Dart stamps scans in IST as `dd-mm-YYYY HH:MM`; RFC 3339 is accepted too.
fn parse_scan_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%d-%m-%Y %H:%M").ok()?;
    let ist = FixedOffset::east_opt(5 * 3600 + 30 * 60)?;
    ist.from_local_datetime(&naive).single().map(|ts| ts.with_timezone(&Utc))
}

pub struct BlueDartAdapter {
    ledger: Arc<SandboxLedger>,
}

impl BlueDartAdapter {
    pub fn new(ledger: Arc<SandboxLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl CarrierAdapter for BlueDartAdapter {
    fn key(&self) -> &'static str {
        KEY
    }

    fn display_name(&self) -> &'static str {
        "Blue Dart"
    }

    async fn create_shipment(&self, request: &CarrierShipmentRequest) -> AdapterResult<CarrierResponse> {
        if let GateVerdict::Reject(reason) = self.ledger.gate(KEY).await? {
            return Ok(CarrierResponse::failure(reason, json!({ "status": "REJECTED" })));
        }

        let address = &request.shipping_address;
        if !address.country.trim().eq_ignore_ascii_case("IN") {
            return Ok(CarrierResponse::failure(
                format!("Blue Dart ships within India only, destination is {}", address.country),
                json!({ "status": "REJECTED", "reason_code": "NON_DOMESTIC" }),
            ));
        }
        if !is_pincode(&address.postal_code) {
            return Ok(CarrierResponse::failure(
                format!("'{}' is not a valid pincode", address.postal_code),
                json!({ "status": "REJECTED", "reason_code": "INVALID_PINCODE" }),
            ));
        }
        let Some(service) = TARIFF.service(&request.service_type) else {
            return Ok(CarrierResponse::failure(
                format!(
                    "service '{}' is not offered; choose one of {}",
                    request.service_type,
                    TARIFF.service_codes().join(", ")
                ),
                json!({ "status": "REJECTED", "reason_code": "INVALID_PRODUCT" }),
            ));
        };

        let parcel = self
            .ledger
            .book(KEY, AWB_DIGITS, service.code, service.transit_days, &address.city)
            .await;
        info!(awb = %parcel.tracking_number, order = %request.order_number, "Blue Dart waybill generated");

        let mut response = sandbox::tracking_response(&parcel, &VOCABULARY);
        response.carrier_response = json!({
            "status": "GENERATED",
            "awb_number": parcel.tracking_number,
            "product": service.code,
            "destination_pincode": address.postal_code,
        });
        Ok(response)
    }

    async fn track_shipment(&self, tracking_number: &str) -> AdapterResult<CarrierResponse> {
        if let GateVerdict::Reject(reason) = self.ledger.gate(KEY).await? {
            return Ok(CarrierResponse::failure(reason, json!({ "status": "REJECTED" })));
        }
        match self.ledger.parcel(tracking_number).await {
            Some(parcel) => Ok(sandbox::tracking_response(&parcel, &VOCABULARY)),
            None => Ok(CarrierResponse::failure(
                format!("waybill {} not found", tracking_number),
                json!({ "status": "NOT_FOUND" }),
            )),
        }
    }

    async fn cancel_shipment(&self, tracking_number: &str) -> AdapterResult<CarrierResponse> {
        if let GateVerdict::Reject(reason) = self.ledger.gate(KEY).await? {
            return Ok(CarrierResponse::failure(reason, json!({ "status": "REJECTED" })));
        }
        match self.ledger.cancel(tracking_number).await {
            CancelOutcome::Cancelled | CancelOutcome::AlreadyCancelled => match self.ledger.parcel(tracking_number).await {
                Some(parcel) => Ok(sandbox::tracking_response(&parcel, &VOCABULARY)),
                None => Ok(CarrierResponse::failure("waybill vanished", Value::Null)),
            },
            CancelOutcome::TooLate(stage) => Ok(CarrierResponse::failure(
                format!("waybill {} cannot be cancelled, last scan {}", tracking_number, native_code(stage)),
                json!({ "status": "REJECTED", "code": native_code(stage) }),
            )),
            CancelOutcome::UnknownParcel => Ok(CarrierResponse::failure(
                format!("waybill {} not found", tracking_number),
                json!({ "status": "NOT_FOUND" }),
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
        if !request.destination_country.trim().eq_ignore_ascii_case("IN") {
            return Ok(Vec::new());
        }
        Ok(TARIFF.quote(KEY, request))
    }

    /// `{ "awb_number", "status_code", "scan_location", "scan_datetime", "remarks", "attempt" }`
    fn parse_webhook(&self, payload: &Value) -> Result<CarrierStatusUpdate, String> {
        let awb = payload["awb_number"]
            .as_str()
            .ok_or("awb_number is required")?;
        let code = payload["status_code"]
            .as_str()
            .ok_or("status_code is required")?;
        let scanned = payload["scan_datetime"]
            .as_str()
            .ok_or("scan_datetime is required")?;
        let timestamp = parse_scan_time(scanned)
            .ok_or_else(|| format!("scan_datetime '{}' is not dd-mm-YYYY HH:MM", scanned))?;

        Ok(CarrierStatusUpdate {
            tracking_number: awb.trim().to_string(),
            status: map_status(code),
            native_code: code.to_string(),
            location: payload["scan_location"].as_str().map(str::to_string),
            timestamp,
            description: payload["remarks"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Blue Dart scan {}", code)),
            delivery_attempt: payload["attempt"].as_i64().map(|n| n as i32),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::booking;

    #[tokio::test]
    async fn test_books_domestic_shipment() {
        let adapter = BlueDartAdapter::new(Arc::new(SandboxLedger::new()));
        let response = adapter.create_shipment(&booking("IN", "560001", "express")).await.unwrap();

        assert!(response.success);
        let awb = response.tracking_number.clone().unwrap();
        assert_eq!(awb.len(), 11);
        assert_eq!(response.tracking_url.as_deref(), Some(tracking_url(&awb).as_str()));
        assert_eq!(response.status, Some(ShipmentStatus::Pending));
        assert!(response.estimated_delivery.is_some());
    }

    #[tokio::test]
    async fn test_rejects_international_and_unknown_service() {
        let adapter = BlueDartAdapter::new(Arc::new(SandboxLedger::new()));

        let abroad = adapter.create_shipment(&booking("US", "94107", "express")).await.unwrap();
        assert!(!abroad.success);
        assert!(abroad.error_message().contains("India"));

        let bad_service = adapter.create_shipment(&booking("IN", "560001", "teleport")).await.unwrap();
        assert!(!bad_service.success);
        assert!(bad_service.error_message().contains("teleport"));
    }

    #[test]
    fn test_webhook_in_ist() {
        let adapter = BlueDartAdapter::new(Arc::new(SandboxLedger::new()));
        let update = adapter
            .parse_webhook(&json!({
                "awb_number": "12345678901",
                "status_code": "OD",
                "scan_location": "Bengaluru Hub",
                "scan_datetime": "05-03-2025 09:30",
                "remarks": "Out for delivery with courier"
            }))
            .unwrap();

        assert_eq!(update.status, ShipmentStatus::OutForDelivery);
        assert_eq!(update.timestamp.to_rfc3339(), "2025-03-05T04:00:00+00:00");
        assert!(adapter.parse_webhook(&json!({ "status_code": "DL" })).is_err());
    }

    #[test]
    fn test_unknown_code_maps_to_exception() {
        assert_eq!(map_status("XX"), ShipmentStatus::Exception);
        assert_eq!(map_status("dl"), ShipmentStatus::Delivered);
    }
}
