use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{FulfillmentStatus, Order, OrderStatus, Shipment, ShipmentStatus, TrackingEvent};

pub type StoreResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// How a write treats an optional timestamp column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    Keep,
    Set(DateTime<Utc>),
    Clear,
}

impl Stamp {
    pub fn apply(&self, current: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match self {
            Stamp::Keep => current,
            Stamp::Set(ts) => Some(*ts),
            Stamp::Clear => None,
        }
    }
}

/// Order columns touched together with a shipment write
#[derive(Debug, Clone, PartialEq)]
pub struct OrderChange {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub fulfillment_status: Option<FulfillmentStatus>,
    pub delivered_at: Stamp,
}

/// A compare-and-set write of a shipment's mutable state.
///
/// The store applies it only if the stored `version` still equals
/// `expected_version`; the event insert and the order change commit in the
/// same transaction or not at all.
#[derive(Debug, Clone)]
pub struct ShipmentWrite {
    pub shipment: Shipment,
    pub expected_version: i64,
    pub event: Option<TrackingEvent>,
    pub order_change: Option<OrderChange>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Stored state after the write, version bumped
    Applied(Shipment),
    VersionConflict,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FulfillmentCommit {
    Committed(Shipment),
    /// The order no longer satisfied the fulfillment precondition at write time
    OrderNotEligible,
}

#[derive(Debug, Clone, Default)]
pub struct ShipmentFilter {
    pub order_id: Option<Uuid>,
    pub statuses: Option<Vec<ShipmentStatus>>,
    /// Strictly before
    pub estimated_before: Option<DateTime<Utc>>,
}

impl ShipmentFilter {
    pub fn for_order(order_id: Uuid) -> Self {
        Self {
            order_id: Some(order_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, shipment: &Shipment) -> bool {
        if let Some(order_id) = self.order_id {
            if shipment.order_id != order_id {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&shipment.status) {
                return false;
            }
        }
        if let Some(before) = self.estimated_before {
            match shipment.estimated_delivery {
                Some(eta) if eta < before => {}
                _ => return false,
            }
        }
        true
    }
}

/// Repository trait for the order records this core reads and advances
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>>;

    /// Insert or replace an order snapshot (fed by the order service)
    async fn upsert_order(&self, order: &Order) -> StoreResult<()>;
}

/// Repository trait for shipments and their tracking history
#[async_trait]
pub trait ShipmentRepository: Send + Sync {
    async fn get_shipment(&self, id: Uuid) -> StoreResult<Option<Shipment>>;

    async fn find_by_tracking_number(&self, tracking_number: &str) -> StoreResult<Option<Shipment>>;

    /// Newest first
    async fn list_shipments(&self, filter: &ShipmentFilter) -> StoreResult<Vec<Shipment>>;

    /// Oldest first by event timestamp
    async fn list_tracking_events(&self, shipment_id: Uuid) -> StoreResult<Vec<TrackingEvent>>;

    /// Audit-only append; never touches the shipment row
    async fn append_tracking_event(&self, event: &TrackingEvent) -> StoreResult<()>;

    /// Insert the shipment and its first event and mark the order shipped, in
    /// one transaction, conditional on the order still being fulfillable.
    async fn create_fulfillment(
        &self,
        shipment: &Shipment,
        event: &TrackingEvent,
        shipped_at: DateTime<Utc>,
    ) -> StoreResult<FulfillmentCommit>;

    async fn write_shipment(&self, write: ShipmentWrite) -> StoreResult<WriteOutcome>;
}

/// Short-lived cache of carrier tracking payloads keyed by tracking number
#[async_trait]
pub trait TrackingCache: Send + Sync {
    async fn get_tracking(&self, tracking_number: &str) -> StoreResult<Option<serde_json::Value>>;

    async fn put_tracking(&self, tracking_number: &str, payload: &serde_json::Value, ttl_seconds: u64) -> StoreResult<()>;
}
