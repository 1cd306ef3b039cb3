use anyhow::Context;
use shipwise_api::state::{AppState, AuthConfig, Ports, RateLimit};
use shipwise_api::{app, worker};
use shipwise_carrier::{CallPolicy, CarrierRegistry, RetryPolicy, SandboxLedger};
use shipwise_core::notify::{FanoutEventSink, ShipmentEventSink, TracingEventSink};
use shipwise_core::{OrderRepository, ShipmentRepository};
use shipwise_store::app_config::Config;
use shipwise_store::{DbClient, EventProducer, InMemoryStore, RedisClient, StoreOrderRepository, StoreShipmentRepository};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shipwise_api=debug,shipwise_fulfillment=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Shipwise API on port {}", config.server.port);

    // Storage
    let (orders, shipments): (Arc<dyn OrderRepository>, Arc<dyn ShipmentRepository>) = match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            let orders: Arc<dyn OrderRepository> = Arc::new(StoreOrderRepository::new(db.pool.clone()));
            let shipments: Arc<dyn ShipmentRepository> = Arc::new(StoreShipmentRepository::new(db.pool));
            (orders, shipments)
        }
        None => {
            tracing::warn!("No database configured, using the in-memory store");
            let store = Arc::new(InMemoryStore::new());
            let orders: Arc<dyn OrderRepository> = store.clone();
            let shipments: Arc<dyn ShipmentRepository> = store;
            (orders, shipments)
        }
    };

    // Events
    let mut sinks: Vec<Arc<dyn ShipmentEventSink>> = vec![Arc::new(TracingEventSink)];
    if let Some(brokers) = &config.kafka.brokers {
        let producer = EventProducer::new(brokers, &config.kafka.topic).context("Failed to create Kafka producer")?;
        sinks.push(Arc::new(producer));
    }
    let events = Arc::new(FanoutEventSink::new(sinks));

    // Carriers
    let carriers_cfg = &config.carriers;
    let ledger = Arc::new(SandboxLedger::new().with_day_length(Duration::from_secs(carriers_cfg.sandbox_day_seconds)));
    let policy = CallPolicy {
        timeout: Duration::from_millis(carriers_cfg.call_timeout_ms),
        retry: RetryPolicy {
            max_attempts: carriers_cfg.retry.max_attempts,
            initial_backoff: Duration::from_millis(carriers_cfg.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(carriers_cfg.retry.max_backoff_ms),
            ..RetryPolicy::default()
        },
    };
    let carriers = Arc::new(CarrierRegistry::sandbox(ledger, &carriers_cfg.enabled, policy));

    let ports = Ports {
        orders,
        shipments,
        carriers,
        events,
    };
    let auth = AuthConfig {
        secret: config.auth.jwt_secret.clone(),
    };

    // Redis is optional; without it there is no rate limiting or tracking cache
    let redis = match &config.redis.url {
        Some(url) => match RedisClient::new(url).await {
            Ok(client) => match client.ping().await {
                Ok(()) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::warn!("Redis unreachable, continuing without it: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Invalid Redis URL, continuing without it: {}", e);
                None
            }
        },
        None => None,
    };
    let state = match redis {
        Some(redis) => AppState::with_redis(ports, auth, redis, config.tracking.cache_ttl_seconds),
        None => AppState::new(ports, auth),
    }
    .rate_limited(RateLimit {
        requests: config.rate_limit.requests,
        window_seconds: config.rate_limit.window_seconds,
    });

    tokio::spawn(worker::start_delay_sweep(
        state.finalizer.clone(),
        Duration::from_secs(config.sweep.interval_seconds.max(1)),
    ));

    let app = app(state, Duration::from_secs(config.server.request_timeout_seconds));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
