use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipwise_shared::Masked;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Order lifecycle status. Orders are owned by the order service; this core
/// only moves them between PROCESSING, SHIPPED and DELIVERED.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Refunded,
}

/// Statuses from which an order may be handed to a carrier.
pub const FULFILLABLE_ORDER_STATUSES: [OrderStatus; 2] = [OrderStatus::Confirmed, OrderStatus::Processing];

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "CONFIRMED" => Ok(OrderStatus::Confirmed),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "REFUNDED" => Ok(OrderStatus::Refunded),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "COMPLETED" => Ok(PaymentStatus::Completed),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentStatus {
    Unfulfilled,
    Fulfilled,
}

impl FulfillmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Unfulfilled => "UNFULFILLED",
            FulfillmentStatus::Fulfilled => "FULFILLED",
        }
    }
}

impl FromStr for FulfillmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNFULFILLED" => Ok(FulfillmentStatus::Unfulfilled),
            "FULFILLED" => Ok(FulfillmentStatus::Fulfilled),
            other => Err(format!("unknown fulfillment status: {}", other)),
        }
    }
}

/// The slice of a customer order the shipping core reads and writes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(order_number: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_number: order_number.into(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            fulfillment_status: FulfillmentStatus::Unfulfilled,
            shipped_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Confirmed (or already processing) and fully paid.
    pub fn is_fulfillable(&self) -> bool {
        FULFILLABLE_ORDER_STATUSES.contains(&self.status) && self.payment_status == PaymentStatus::Completed
    }
}

/// Shipment status lattice.
///
/// ```text
/// PENDING -> IN_TRANSIT -> OUT_FOR_DELIVERY -> DELIVERED
///    \            \               \
///     +------------+---------------+--> FAILED_DELIVERY | EXCEPTION | RETURNED | CANCELLED
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Pending,
    InTransit,
    OutForDelivery,
    Delivered,
    FailedDelivery,
    Cancelled,
    Returned,
    Exception,
}

impl ShipmentStatus {
    pub const ALL: [ShipmentStatus; 8] = [
        ShipmentStatus::Pending,
        ShipmentStatus::InTransit,
        ShipmentStatus::OutForDelivery,
        ShipmentStatus::Delivered,
        ShipmentStatus::FailedDelivery,
        ShipmentStatus::Cancelled,
        ShipmentStatus::Returned,
        ShipmentStatus::Exception,
    ];

    /// Statuses the delayed-shipment sweep looks at.
    pub const IN_FLIGHT: [ShipmentStatus; 3] = [
        ShipmentStatus::Pending,
        ShipmentStatus::InTransit,
        ShipmentStatus::OutForDelivery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Pending => "PENDING",
            ShipmentStatus::InTransit => "IN_TRANSIT",
            ShipmentStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            ShipmentStatus::Delivered => "DELIVERED",
            ShipmentStatus::FailedDelivery => "FAILED_DELIVERY",
            ShipmentStatus::Cancelled => "CANCELLED",
            ShipmentStatus::Returned => "RETURNED",
            ShipmentStatus::Exception => "EXCEPTION",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShipmentStatus::Delivered | ShipmentStatus::Cancelled | ShipmentStatus::Returned
        )
    }

    pub fn is_in_flight(&self) -> bool {
        Self::IN_FLIGHT.contains(self)
    }

    /// Position on the happy path, `None` for the off-path statuses.
    pub fn happy_rank(&self) -> Option<u8> {
        match self {
            ShipmentStatus::Pending => Some(0),
            ShipmentStatus::InTransit => Some(1),
            ShipmentStatus::OutForDelivery => Some(2),
            ShipmentStatus::Delivered => Some(3),
            _ => None,
        }
    }

    /// Whether a carrier-reported move from `self` to `next` is allowed.
    ///
    /// Terminal statuses never move. FAILED_DELIVERY and EXCEPTION can recover
    /// to anything but PENDING; going back to PENDING is reserved for the
    /// delivery-issue rollback.
    pub fn can_transition_to(&self, next: ShipmentStatus) -> bool {
        if *self == next || self.is_terminal() {
            return false;
        }
        match (self.happy_rank(), next.happy_rank()) {
            (Some(current), Some(target)) => target > current,
            (Some(_), None) => true,
            (None, _) => next != ShipmentStatus::Pending,
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = String;

    /// Accepts `IN_TRANSIT`, `in_transit`, `in-transit` and `In Transit` alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| format!("unknown shipment status: {}", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Address {
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipient {
    pub name: String,
    pub phone: Masked<String>,
    pub email: Masked<String>,
}

/// Centimetres
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Dimensions {
    pub length: f64,
    pub width: f64,
    pub height: f64,
}

impl Dimensions {
    pub fn sum(&self) -> f64 {
        self.length + self.width + self.height
    }

    pub fn volume(&self) -> f64 {
        self.length * self.width * self.height
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Package {
    /// Kilograms
    pub weight: f64,
    pub dimensions: Dimensions,
    pub description: String,
    /// Declared value in the order currency
    pub value: f64,
}

impl Package {
    /// Billable weight: the larger of actual and volumetric weight, rounded
    /// up to the next half kilogram.
    pub fn chargeable_weight(&self, volumetric_divisor: f64) -> f64 {
        let volumetric = self.dimensions.volume() / volumetric_divisor;
        let raw = self.weight.max(volumetric);
        (raw * 2.0).ceil() / 2.0
    }
}

/// A physical consignment handed to a carrier for one order.
///
/// `carrier` and `tracking_number` are fixed at creation; storage never
/// writes them again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Shipment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub carrier: String,
    pub service_type: String,
    pub tracking_number: String,
    pub status: ShipmentStatus,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    pub tracking_url: Option<String>,
    pub recipient_name: String,
    pub destination: Address,
    pub package: Package,
    pub special_instructions: Option<String>,
    /// Timestamp of the newest tracking event that was applied
    pub last_event_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shipment {
    /// Whole days from `shipped_at` to `delivered_at`, fractional.
    pub fn delivery_days(&self) -> Option<f64> {
        match (self.shipped_at, self.delivered_at) {
            (Some(shipped), Some(delivered)) => {
                Some((delivered - shipped).num_seconds() as f64 / 86_400.0)
            }
            _ => None,
        }
    }
}

/// Where a tracking event came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSource {
    Fulfillment,
    CarrierSync,
    CarrierWebhook,
    Manual,
    Delivery,
    Admin,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Fulfillment => "FULFILLMENT",
            EventSource::CarrierSync => "CARRIER_SYNC",
            EventSource::CarrierWebhook => "CARRIER_WEBHOOK",
            EventSource::Manual => "MANUAL",
            EventSource::Delivery => "DELIVERY",
            EventSource::Admin => "ADMIN",
        }
    }
}

impl FromStr for EventSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FULFILLMENT" => Ok(EventSource::Fulfillment),
            "CARRIER_SYNC" => Ok(EventSource::CarrierSync),
            "CARRIER_WEBHOOK" => Ok(EventSource::CarrierWebhook),
            "MANUAL" => Ok(EventSource::Manual),
            "DELIVERY" => Ok(EventSource::Delivery),
            "ADMIN" => Ok(EventSource::Admin),
            other => Err(format!("unknown event source: {}", other)),
        }
    }
}

/// Append-only history entry. Ordered by `timestamp`, never by insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingEvent {
    pub id: Uuid,
    pub shipment_id: Uuid,
    pub status: ShipmentStatus,
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub delivery_attempt: Option<i32>,
    pub source: EventSource,
    /// False when the event was kept for audit but did not move the shipment
    pub applied: bool,
    pub raw_payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl TrackingEvent {
    pub fn new(
        shipment_id: Uuid,
        status: ShipmentStatus,
        description: impl Into<String>,
        source: EventSource,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            shipment_id,
            status,
            location: None,
            timestamp,
            description: description.into(),
            delivery_attempt: None,
            source,
            applied: true,
            raw_payload: serde_json::Value::Null,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.raw_payload = payload;
        self
    }

    pub fn with_attempt(mut self, attempt: Option<i32>) -> Self {
        self.delivery_attempt = attempt;
        self
    }

    pub fn unapplied(mut self) -> Self {
        self.applied = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing_is_lenient_on_case() {
        assert_eq!("IN_TRANSIT".parse::<ShipmentStatus>().unwrap(), ShipmentStatus::InTransit);
        assert_eq!("out-for-delivery".parse::<ShipmentStatus>().unwrap(), ShipmentStatus::OutForDelivery);
        assert_eq!("Delivered".parse::<ShipmentStatus>().unwrap(), ShipmentStatus::Delivered);
        assert!("TELEPORTED".parse::<ShipmentStatus>().is_err());
    }

    #[test]
    fn test_happy_path_only_moves_forward() {
        use ShipmentStatus::*;
        assert!(Pending.can_transition_to(InTransit));
        assert!(InTransit.can_transition_to(Delivered));
        assert!(!OutForDelivery.can_transition_to(InTransit));
        assert!(!InTransit.can_transition_to(Pending));
        assert!(!InTransit.can_transition_to(InTransit));
    }

    #[test]
    fn test_terminal_and_recoverable_statuses() {
        use ShipmentStatus::*;
        for terminal in [Delivered, Cancelled, Returned] {
            for next in ShipmentStatus::ALL {
                assert!(!terminal.can_transition_to(next), "{} -> {}", terminal, next);
            }
        }
        assert!(Pending.can_transition_to(FailedDelivery));
        assert!(FailedDelivery.can_transition_to(OutForDelivery));
        assert!(Exception.can_transition_to(Delivered));
        assert!(!FailedDelivery.can_transition_to(Pending));
    }

    #[test]
    fn test_order_fulfillable() {
        let mut order = Order::new("ORD-42");
        assert!(!order.is_fulfillable());

        order.status = OrderStatus::Confirmed;
        assert!(!order.is_fulfillable());

        order.payment_status = PaymentStatus::Completed;
        assert!(order.is_fulfillable());

        order.status = OrderStatus::Shipped;
        assert!(!order.is_fulfillable());
    }

    #[test]
    fn test_chargeable_weight_uses_volumetric() {
        let package = Package {
            weight: 1.2,
            dimensions: Dimensions { length: 50.0, width: 40.0, height: 30.0 },
            description: "Cushions".to_string(),
            value: 900.0,
        };
        // 60000 / 5000 = 12 kg volumetric
        assert_eq!(package.chargeable_weight(5000.0), 12.0);

        let dense = Package { weight: 2.2, ..package };
        let small = Package {
            dimensions: Dimensions { length: 10.0, width: 10.0, height: 10.0 },
            ..dense
        };
        assert_eq!(small.chargeable_weight(5000.0), 2.5);
    }
}
