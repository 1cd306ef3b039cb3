use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::models::{Address, Package, Recipient, ShipmentStatus};
use crate::request::{CreateShipmentRequest, RateRequest, TrackingUpdate};
use crate::{CoreError, CoreResult};

pub const MAX_PACKAGE_WEIGHT_KG: f64 = 30.0;
pub const MAX_DIMENSION_SUM_CM: f64 = 300.0;
pub const MAX_DECLARED_VALUE: f64 = 100_000.0;
pub const MIN_TRACKING_NUMBER_LEN: usize = 5;
pub const MIN_EVENT_DESCRIPTION_LEN: usize = 10;
/// How far ahead of our clock a reported event time may be
pub const MAX_CLOCK_SKEW_MINUTES: i64 = 5;

static PHONE_PATTERN: OnceLock<Regex> = OnceLock::new();
static EMAIL_PATTERN: OnceLock<Regex> = OnceLock::new();

/// E.164-ish: optional `+`, no leading zero, 2 to 15 digits.
pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_PATTERN
        .get_or_init(|| Regex::new(r"^\+?[1-9]\d{1,14}$").expect("static phone pattern"))
        .is_match(phone)
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN
        .get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email pattern"))
        .is_match(email)
}

/// Collects every problem with a request before any of them is reported
#[derive(Debug, Default)]
pub struct Violations(Vec<String>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&mut self, ok: bool, message: impl Into<String>) {
        if !ok {
            self.0.push(message.into());
        }
    }

    pub fn require_present(&mut self, value: &str, field: &str) {
        self.require(!value.trim().is_empty(), format!("{} is required", field));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result(self) -> CoreResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(CoreError::ValidationError(self.0))
        }
    }
}

pub fn check_package(package: &Package, v: &mut Violations) {
    // `!(x > 0)` also rejects NaN
    v.require(package.weight > 0.0, "package weight must be greater than 0 kg");
    v.require(
        package.weight <= MAX_PACKAGE_WEIGHT_KG,
        format!("package weight must not exceed {} kg", MAX_PACKAGE_WEIGHT_KG),
    );

    let dims = &package.dimensions;
    v.require(
        dims.length > 0.0 && dims.width > 0.0 && dims.height > 0.0,
        "package dimensions must all be greater than 0 cm",
    );
    v.require(
        dims.sum() <= MAX_DIMENSION_SUM_CM,
        format!("package length + width + height must not exceed {} cm", MAX_DIMENSION_SUM_CM),
    );

    v.require(package.value >= 0.0, "package value must not be negative");
    v.require(
        package.value <= MAX_DECLARED_VALUE,
        format!("package value must not exceed {}", MAX_DECLARED_VALUE),
    );
}

pub fn check_address(address: &Address, v: &mut Violations) {
    v.require_present(&address.line1, "shipping address line1");
    v.require_present(&address.city, "shipping address city");
    v.require_present(&address.state, "shipping address state");
    v.require_present(&address.postal_code, "shipping address postal code");
    v.require_present(&address.country, "shipping address country");
}

pub fn check_recipient(recipient: &Recipient, v: &mut Violations) {
    v.require_present(&recipient.name, "recipient name");
    v.require(
        is_valid_phone(recipient.phone.expose()),
        "recipient phone must be in international format, e.g. +919876543210",
    );
    v.require(
        is_valid_email(recipient.email.expose()),
        "recipient email is not a valid address",
    );
}

/// Event times may run at most `MAX_CLOCK_SKEW_MINUTES` ahead of `now`.
pub fn check_event_time(timestamp: DateTime<Utc>, now: DateTime<Utc>, v: &mut Violations) {
    v.require(
        timestamp <= now + Duration::minutes(MAX_CLOCK_SKEW_MINUTES),
        format!(
            "event timestamp {} is more than {} minutes in the future",
            timestamp.to_rfc3339(),
            MAX_CLOCK_SKEW_MINUTES
        ),
    );
}

pub fn validate_create_shipment(request: &CreateShipmentRequest) -> CoreResult<()> {
    let mut v = Violations::new();
    v.require_present(&request.order_number, "order number");
    v.require_present(&request.carrier, "carrier");
    v.require_present(&request.service_type, "service type");
    check_recipient(&request.recipient, &mut v);
    check_address(&request.shipping_address, &mut v);
    check_package(&request.package, &mut v);
    v.into_result()
}

pub fn validate_rate_request(request: &RateRequest) -> CoreResult<()> {
    let mut v = Violations::new();
    v.require_present(&request.origin_postal_code, "origin postal code");
    v.require_present(&request.destination_postal_code, "destination postal code");
    v.require_present(&request.destination_country, "destination country");
    check_package(&request.package, &mut v);
    v.into_result()
}

/// Validates a tracking update and returns its parsed status.
///
/// `expected_tracking_number` is the shipment's own number; an update for a
/// different parcel is rejected.
pub fn validate_tracking_update(
    update: &TrackingUpdate,
    expected_tracking_number: &str,
) -> CoreResult<ShipmentStatus> {
    let mut v = Violations::new();

    let tracking_number = update.tracking_number.trim();
    v.require(
        tracking_number.chars().count() >= MIN_TRACKING_NUMBER_LEN,
        format!("tracking number must be at least {} characters", MIN_TRACKING_NUMBER_LEN),
    );
    v.require(
        tracking_number.is_empty() || tracking_number == expected_tracking_number,
        "tracking number does not match the shipment",
    );

    let status = update.status.parse::<ShipmentStatus>();
    v.require(status.is_ok(), format!("status '{}' is not a recognized value", update.status));

    v.require(
        update.description.trim().chars().count() >= MIN_EVENT_DESCRIPTION_LEN,
        format!("description must be at least {} characters", MIN_EVENT_DESCRIPTION_LEN),
    );

    if let Some(attempt) = update.delivery_attempt {
        v.require(attempt >= 1, "delivery attempt must be at least 1");
    }
    if let Some(timestamp) = update.timestamp {
        check_event_time(timestamp, Utc::now(), &mut v);
    }

    v.into_result()?;
    status.map_err(|e| CoreError::ValidationError(vec![e]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dimensions;
    use shipwise_shared::Masked;
    use uuid::Uuid;

    fn request() -> CreateShipmentRequest {
        CreateShipmentRequest {
            order_id: Uuid::new_v4(),
            order_number: "ORD-1001".to_string(),
            recipient: Recipient {
                name: "Asha Rao".to_string(),
                phone: Masked::from("+919876543210"),
                email: Masked::from("asha@example.com"),
            },
            shipping_address: Address {
                line1: "12 MG Road".to_string(),
                line2: None,
                city: "Bengaluru".to_string(),
                state: "KA".to_string(),
                postal_code: "560001".to_string(),
                country: "IN".to_string(),
            },
            package: Package {
                weight: 1.5,
                dimensions: Dimensions { length: 30.0, width: 20.0, height: 10.0 },
                description: "Books".to_string(),
                value: 2500.0,
            },
            carrier: "blue_dart".to_string(),
            service_type: "express".to_string(),
            special_instructions: None,
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(validate_create_shipment(&request()).is_ok());
    }

    #[test]
    fn test_all_violations_are_reported_together() {
        let mut req = request();
        req.package.weight = 31.0;
        req.package.dimensions = Dimensions { length: 150.0, width: 100.0, height: 60.0 };
        req.package.value = 100_000.01;
        req.shipping_address.city = "  ".to_string();
        req.recipient.phone = Masked::from("98-765");
        req.recipient.email = Masked::from("asha.example.com");

        let err = validate_create_shipment(&req).unwrap_err();
        let violations = err.violations();
        assert_eq!(violations.len(), 6, "{:?}", violations);
        assert!(violations.iter().any(|m| m.contains("30 kg")));
        assert!(violations.iter().any(|m| m.contains("300 cm")));
        assert!(violations.iter().any(|m| m.contains("100000")));
        assert!(violations.iter().any(|m| m.contains("city")));
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let mut req = request();
        req.package.weight = 30.0;
        req.package.dimensions = Dimensions { length: 100.0, width: 100.0, height: 100.0 };
        req.package.value = 100_000.0;
        assert!(validate_create_shipment(&req).is_ok());
    }

    #[test]
    fn test_phone_and_email_patterns() {
        assert!(is_valid_phone("+14155550123"));
        assert!(is_valid_phone("919876543210"));
        assert!(!is_valid_phone("+0123456"));
        assert!(!is_valid_phone("+1 415 555 0123"));
        assert!(is_valid_email("ops@shipwise.io"));
        assert!(!is_valid_email("ops@shipwise"));
        assert!(!is_valid_email("ops shipwise@x.io"));
    }

    #[test]
    fn test_tracking_update_rules() {
        let update = TrackingUpdate {
            tracking_number: "123".to_string(),
            status: "VANISHED".to_string(),
            location: None,
            timestamp: None,
            description: "short".to_string(),
            delivery_attempt: Some(0),
            carrier_payload: None,
        };

        let err = validate_tracking_update(&update, "12345678901").unwrap_err();
        // too short, mismatched, bad status, short description, bad attempt
        assert_eq!(err.violations().len(), 5);

        let ok = TrackingUpdate {
            tracking_number: "12345678901".to_string(),
            status: "delivered".to_string(),
            description: "Delivered to recipient".to_string(),
            delivery_attempt: Some(1),
            ..update
        };
        assert_eq!(
            validate_tracking_update(&ok, "12345678901").unwrap(),
            ShipmentStatus::Delivered
        );
    }

    #[test]
    fn test_event_time_allows_small_skew_only() {
        let now = Utc::now();
        let mut v = Violations::new();
        check_event_time(now + Duration::minutes(MAX_CLOCK_SKEW_MINUTES), now, &mut v);
        check_event_time(now - Duration::days(30), now, &mut v);
        assert!(v.is_empty());

        let update = TrackingUpdate {
            tracking_number: "12345678901".to_string(),
            status: "IN_TRANSIT".to_string(),
            location: None,
            timestamp: Some(now + Duration::days(3650)),
            description: "Departed origin facility".to_string(),
            delivery_attempt: None,
            carrier_payload: None,
        };
        let err = validate_tracking_update(&update, "12345678901").unwrap_err();
        assert_eq!(err.violations().len(), 1);
        assert!(err.violations()[0].contains("in the future"));
    }
}
