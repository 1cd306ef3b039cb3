use shipwise_carrier::CarrierRegistry;
use shipwise_core::notify::ShipmentEventSink;
use shipwise_core::{OrderRepository, ShipmentRepository, TrackingCache};
use shipwise_fulfillment::{DeliveryFinalizer, FulfillmentOrchestrator, TrackingReconciler};
use shipwise_store::RedisClient;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone, Copy)]
pub struct RateLimit {
    pub requests: i64,
    pub window_seconds: i64,
}

/// Storage, carriers and event sink the services are built from
pub struct Ports {
    pub orders: Arc<dyn OrderRepository>,
    pub shipments: Arc<dyn ShipmentRepository>,
    pub carriers: Arc<CarrierRegistry>,
    pub events: Arc<dyn ShipmentEventSink>,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<FulfillmentOrchestrator>,
    pub tracker: Arc<TrackingReconciler>,
    pub finalizer: Arc<DeliveryFinalizer>,
    pub carriers: Arc<CarrierRegistry>,
    /// Rate limiting and the tracking cache are skipped without Redis
    pub redis: Option<Arc<RedisClient>>,
    pub rate_limit: RateLimit,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(ports: Ports, auth: AuthConfig) -> Self {
        Self::build(ports, auth, None, 0)
    }

    pub fn with_redis(ports: Ports, auth: AuthConfig, redis: Arc<RedisClient>, cache_ttl_seconds: u64) -> Self {
        Self::build(ports, auth, Some(redis), cache_ttl_seconds)
    }

    fn build(ports: Ports, auth: AuthConfig, redis: Option<Arc<RedisClient>>, cache_ttl_seconds: u64) -> Self {
        let orchestrator = FulfillmentOrchestrator::new(
            ports.orders,
            ports.shipments.clone(),
            ports.carriers.clone(),
            ports.events.clone(),
        );

        let mut tracker = TrackingReconciler::new(ports.shipments.clone(), ports.carriers.clone(), ports.events.clone());
        if let Some(redis) = &redis {
            let cache: Arc<dyn TrackingCache> = redis.clone();
            tracker = tracker.with_cache(cache, cache_ttl_seconds);
        }

        let finalizer = DeliveryFinalizer::new(ports.shipments, ports.events);

        Self {
            orchestrator: Arc::new(orchestrator),
            tracker: Arc::new(tracker),
            finalizer: Arc::new(finalizer),
            carriers: ports.carriers,
            redis,
            rate_limit: RateLimit {
                requests: 100,
                window_seconds: 60,
            },
            auth,
        }
    }

    pub fn rate_limited(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = rate_limit;
        self
    }
}
