use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShipmentCreatedEvent {
    pub shipment_id: Uuid,
    pub order_id: Uuid,
    pub carrier: String,
    pub service_type: String,
    pub tracking_number: String,
    pub tracking_url: Option<String>,
    pub estimated_delivery: Option<i64>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShipmentStatusChangedEvent {
    pub shipment_id: Uuid,
    pub order_id: Uuid,
    pub tracking_number: String,
    pub from_status: String,
    pub to_status: String,
    pub location: Option<String>,
    pub source: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShipmentDeliveredEvent {
    pub shipment_id: Uuid,
    pub order_id: Uuid,
    pub tracking_number: String,
    pub delivered_at: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeliveryIssueEvent {
    pub shipment_id: Uuid,
    pub order_id: Uuid,
    pub previous_status: String,
    pub issue: String,
    pub notes: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeliveryRescheduledEvent {
    pub shipment_id: Uuid,
    pub order_id: Uuid,
    pub previous_estimate: Option<i64>,
    pub new_estimate: i64,
    pub reason: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShipmentCancelledEvent {
    pub shipment_id: Uuid,
    pub order_id: Uuid,
    pub carrier: String,
    pub tracking_number: String,
    pub reason: String,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ShipmentDelayedEvent {
    pub shipment_id: Uuid,
    pub order_id: Uuid,
    pub carrier: String,
    pub status: String,
    pub estimated_delivery: i64,
    pub days_delayed: i64,
    pub detected_at: i64,
}

/// Everything the fulfillment core announces to the outside world.
///
/// Serialized with an internal `type` tag so a single topic can carry every
/// kind, e.g. `{"type":"delivered","shipment_id":...}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShipmentEvent {
    Created(ShipmentCreatedEvent),
    StatusChanged(ShipmentStatusChangedEvent),
    Delivered(ShipmentDeliveredEvent),
    IssueReported(DeliveryIssueEvent),
    Rescheduled(DeliveryRescheduledEvent),
    Cancelled(ShipmentCancelledEvent),
    Delayed(ShipmentDelayedEvent),
}

impl ShipmentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ShipmentEvent::Created(_) => "shipment_created",
            ShipmentEvent::StatusChanged(_) => "shipment_status_changed",
            ShipmentEvent::Delivered(_) => "shipment_delivered",
            ShipmentEvent::IssueReported(_) => "delivery_issue_reported",
            ShipmentEvent::Rescheduled(_) => "delivery_rescheduled",
            ShipmentEvent::Cancelled(_) => "shipment_cancelled",
            ShipmentEvent::Delayed(_) => "shipment_delayed",
        }
    }

    pub fn shipment_id(&self) -> Uuid {
        match self {
            ShipmentEvent::Created(e) => e.shipment_id,
            ShipmentEvent::StatusChanged(e) => e.shipment_id,
            ShipmentEvent::Delivered(e) => e.shipment_id,
            ShipmentEvent::IssueReported(e) => e.shipment_id,
            ShipmentEvent::Rescheduled(e) => e.shipment_id,
            ShipmentEvent::Cancelled(e) => e.shipment_id,
            ShipmentEvent::Delayed(e) => e.shipment_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_tagged() {
        let event = ShipmentEvent::Delivered(ShipmentDeliveredEvent {
            shipment_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            tracking_number: "12345678901".to_string(),
            delivered_at: 1_700_000_000,
            notes: None,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "delivered");
        assert_eq!(json["tracking_number"], "12345678901");
        assert_eq!(event.kind(), "shipment_delivered");
    }
}
