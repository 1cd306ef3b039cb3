use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shipwise_core::models::{FulfillmentStatus, Order, OrderStatus, Shipment, TrackingEvent};
use shipwise_core::repository::{
    FulfillmentCommit, OrderRepository, ShipmentFilter, ShipmentRepository, ShipmentWrite, StoreResult, WriteOutcome,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    orders: HashMap<Uuid, Order>,
    shipments: HashMap<Uuid, Shipment>,
    events: Vec<TrackingEvent>,
}

/// Single-process store used when no database is configured, and in tests.
///
/// Every multi-row write happens under one write lock, which gives the same
/// all-or-nothing behaviour as the Postgres transactions.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn upsert_order(&self, order: &Order) -> StoreResult<()> {
        self.tables.write().await.orders.insert(order.id, order.clone());
        Ok(())
    }
}

#[async_trait]
impl ShipmentRepository for InMemoryStore {
    async fn get_shipment(&self, id: Uuid) -> StoreResult<Option<Shipment>> {
        Ok(self.tables.read().await.shipments.get(&id).cloned())
    }

    async fn find_by_tracking_number(&self, tracking_number: &str) -> StoreResult<Option<Shipment>> {
        let tables = self.tables.read().await;
        Ok(tables
            .shipments
            .values()
            .find(|s| s.tracking_number == tracking_number)
            .cloned())
    }

    async fn list_shipments(&self, filter: &ShipmentFilter) -> StoreResult<Vec<Shipment>> {
        let tables = self.tables.read().await;
        let mut found: Vec<Shipment> = tables.shipments.values().filter(|s| filter.matches(s)).cloned().collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn list_tracking_events(&self, shipment_id: Uuid) -> StoreResult<Vec<TrackingEvent>> {
        let tables = self.tables.read().await;
        let mut events: Vec<TrackingEvent> = tables
            .events
            .iter()
            .filter(|e| e.shipment_id == shipment_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.recorded_at.cmp(&b.recorded_at)));
        Ok(events)
    }

    async fn append_tracking_event(&self, event: &TrackingEvent) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.shipments.contains_key(&event.shipment_id) {
            return Err(format!("shipment {} does not exist", event.shipment_id).into());
        }
        tables.events.push(event.clone());
        Ok(())
    }

    async fn create_fulfillment(
        &self,
        shipment: &Shipment,
        event: &TrackingEvent,
        shipped_at: DateTime<Utc>,
    ) -> StoreResult<FulfillmentCommit> {
        let mut tables = self.tables.write().await;

        let Some(order) = tables.orders.get_mut(&shipment.order_id) else {
            return Ok(FulfillmentCommit::OrderNotEligible);
        };
        if !order.is_fulfillable() {
            return Ok(FulfillmentCommit::OrderNotEligible);
        }
        order.status = OrderStatus::Shipped;
        order.fulfillment_status = FulfillmentStatus::Fulfilled;
        order.shipped_at = Some(shipped_at);
        order.updated_at = Utc::now();

        let mut stored = shipment.clone();
        stored.version = 1;
        tables.shipments.insert(stored.id, stored.clone());
        tables.events.push(event.clone());

        Ok(FulfillmentCommit::Committed(stored))
    }

    async fn write_shipment(&self, write: ShipmentWrite) -> StoreResult<WriteOutcome> {
        let mut tables = self.tables.write().await;

        let Some(current) = tables.shipments.get(&write.shipment.id) else {
            return Ok(WriteOutcome::NotFound);
        };
        if current.version != write.expected_version {
            return Ok(WriteOutcome::VersionConflict);
        }

        let mut next = write.shipment;
        // identity columns are fixed at creation
        next.order_id = current.order_id;
        next.carrier = current.carrier.clone();
        next.tracking_number = current.tracking_number.clone();
        next.created_at = current.created_at;
        next.version = current.version + 1;

        if let Some(change) = &write.order_change {
            if let Some(order) = tables.orders.get_mut(&change.order_id) {
                order.status = change.status;
                if let Some(fulfillment) = change.fulfillment_status {
                    order.fulfillment_status = fulfillment;
                }
                order.delivered_at = change.delivered_at.apply(order.delivered_at);
                order.updated_at = Utc::now();
            }
        }
        if let Some(event) = write.event {
            tables.events.push(event);
        }
        tables.shipments.insert(next.id, next.clone());

        Ok(WriteOutcome::Applied(next))
    }
}
