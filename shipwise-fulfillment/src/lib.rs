pub mod delivery;
pub mod orchestrator;
pub mod tracking;
pub mod transition;

pub use delivery::{DelayedShipment, DeliveryFinalizer, DeliverySummary};
pub use orchestrator::FulfillmentOrchestrator;
pub use tracking::{IngestOutcome, TrackingReconciler, TrackingSnapshot};
pub use transition::{Authority, Disposition};

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use shipwise_carrier::{CallPolicy, CarrierRegistry, RetryPolicy, SandboxLedger};
    use shipwise_core::models::{
        Address, Dimensions, EventSource, Order, OrderStatus, Package, PaymentStatus, Recipient, Shipment,
        ShipmentStatus, TrackingEvent,
    };
    use shipwise_core::notify::ShipmentEventSink;
    use shipwise_core::repository::{FulfillmentCommit, ShipmentWrite, StoreResult, WriteOutcome};
    use shipwise_core::request::{CreateShipmentRequest, RateRequest};
    use shipwise_core::{OrderRepository, ShipmentRepository, TrackingCache};
    use shipwise_shared::{Masked, ShipmentEvent};
    use shipwise_store::InMemoryStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    use crate::{DeliveryFinalizer, FulfillmentOrchestrator, TrackingReconciler};

    pub fn create_request(order_id: Uuid, carrier: &str, service_type: &str) -> CreateShipmentRequest {
        CreateShipmentRequest {
            order_id,
            order_number: "ORD-1001".to_string(),
            recipient: Recipient {
                name: "Asha Rao".to_string(),
                phone: Masked::from("+919876543210"),
                email: Masked::from("asha@example.com"),
            },
            shipping_address: address(),
            package: package(),
            carrier: carrier.to_string(),
            service_type: service_type.to_string(),
            special_instructions: None,
        }
    }

    pub fn rate_request(carrier: Option<&str>) -> RateRequest {
        RateRequest {
            carrier: carrier.map(str::to_string),
            origin_postal_code: "400001".to_string(),
            destination_postal_code: "560001".to_string(),
            destination_country: "IN".to_string(),
            package: package(),
            service_type: None,
        }
    }

    fn address() -> Address {
        Address {
            line1: "12 MG Road".to_string(),
            line2: None,
            city: "Bengaluru".to_string(),
            state: "KA".to_string(),
            postal_code: "560001".to_string(),
            country: "IN".to_string(),
        }
    }

    fn package() -> Package {
        Package {
            weight: 1.5,
            dimensions: Dimensions { length: 30.0, width: 20.0, height: 10.0 },
            description: "Books".to_string(),
            value: 2500.0,
        }
    }

    /// A detached shipment in `status`, not stored anywhere
    pub fn shipment(status: ShipmentStatus) -> Shipment {
        let now = Utc::now();
        Shipment {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            carrier: "blue_dart".to_string(),
            service_type: "express".to_string(),
            tracking_number: "50012345678".to_string(),
            status,
            shipped_at: Some(now),
            delivered_at: None,
            estimated_delivery: None,
            tracking_url: None,
            recipient_name: "Asha Rao".to_string(),
            destination: address(),
            package: package(),
            special_instructions: None,
            last_event_at: Some(now),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[derive(Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<ShipmentEvent>>,
    }

    impl RecordingSink {
        pub async fn kinds(&self) -> Vec<&'static str> {
            self.events.lock().await.iter().map(ShipmentEvent::kind).collect()
        }
    }

    #[async_trait]
    impl ShipmentEventSink for RecordingSink {
        async fn emit(&self, event: &ShipmentEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.events.lock().await.push(event.clone());
            Ok(())
        }
    }

    /// Always answers with the snapshot it was given, like a reader that
    /// loaded the order before a concurrent writer committed.
    struct StaleOrders(Order);

    #[async_trait]
    impl OrderRepository for StaleOrders {
        async fn get_order(&self, _id: Uuid) -> StoreResult<Option<Order>> {
            Ok(Some(self.0.clone()))
        }

        async fn upsert_order(&self, _order: &Order) -> StoreResult<()> {
            Ok(())
        }
    }

    pub struct Harness {
        pub store: Arc<InMemoryStore>,
        pub ledger: Arc<SandboxLedger>,
        pub registry: Arc<CarrierRegistry>,
        pub sink: Arc<RecordingSink>,
        pub orchestrator: FulfillmentOrchestrator,
        pub tracker: TrackingReconciler,
        pub finalizer: DeliveryFinalizer,
    }

    impl Harness {
        pub fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let ledger = Arc::new(SandboxLedger::new());
            let policy = CallPolicy {
                timeout: Duration::from_millis(100),
                retry: RetryPolicy::default(),
            };
            let registry = Arc::new(CarrierRegistry::sandbox(ledger.clone(), &[], policy));
            let sink = Arc::new(RecordingSink::default());

            let orchestrator =
                FulfillmentOrchestrator::new(store.clone(), store.clone(), registry.clone(), sink.clone());
            let tracker = TrackingReconciler::new(store.clone(), registry.clone(), sink.clone());
            let finalizer = DeliveryFinalizer::new(store.clone(), sink.clone());

            Self {
                store,
                ledger,
                registry,
                sink,
                orchestrator,
                tracker,
                finalizer,
            }
        }

        /// Same store, carriers and sink, but orders are read from `snapshot`
        pub fn orchestrator_reading(&self, snapshot: Order) -> FulfillmentOrchestrator {
            FulfillmentOrchestrator::new(
                Arc::new(StaleOrders(snapshot)),
                self.store.clone(),
                self.registry.clone(),
                self.sink.clone(),
            )
        }

        pub fn tracker_with_cache(&self, cache: Arc<dyn TrackingCache>) -> TrackingReconciler {
            TrackingReconciler::new(self.store.clone(), self.registry.clone(), self.sink.clone()).with_cache(cache, 60)
        }

        pub async fn paid_order(&self) -> Order {
            let mut order = Order::new(format!("ORD-{}", &Uuid::new_v4().simple().to_string()[..8]));
            order.status = OrderStatus::Confirmed;
            order.payment_status = PaymentStatus::Completed;
            self.store.upsert_order(&order).await.unwrap();
            order
        }

        pub async fn order(&self, id: Uuid) -> Order {
            self.store.get_order(id).await.unwrap().unwrap()
        }

        /// A paid order shipped through the orchestrator
        pub async fn shipped(&self, carrier: &str, service_type: &str) -> Shipment {
            let order = self.paid_order().await;
            self.orchestrator
                .create_shipment(create_request(order.id, carrier, service_type))
                .await
                .unwrap()
        }

        /// Store a shipment in `status` directly, bypassing the carriers
        pub async fn seed(&self, status: ShipmentStatus, estimated_delivery: Option<DateTime<Utc>>) -> Shipment {
            let order = self.paid_order().await;
            let mut s = shipment(status);
            s.order_id = order.id;
            s.tracking_number = Uuid::new_v4().simple().to_string();
            s.estimated_delivery = estimated_delivery;
            let event = TrackingEvent::new(s.id, status, "Seeded for test", EventSource::Fulfillment, Utc::now());

            match self.store.create_fulfillment(&s, &event, Utc::now()).await.unwrap() {
                FulfillmentCommit::Committed(stored) => stored,
                FulfillmentCommit::OrderNotEligible => panic!("seed order was not fulfillable"),
            }
        }

        /// Overwrite the stored shipment's mutable columns
        pub async fn rewrite(&self, shipment: Shipment) -> Shipment {
            let write = ShipmentWrite {
                expected_version: shipment.version,
                shipment,
                event: None,
                order_change: None,
            };
            match self.store.write_shipment(write).await.unwrap() {
                WriteOutcome::Applied(stored) => stored,
                other => panic!("rewrite failed: {:?}", other),
            }
        }
    }
}
