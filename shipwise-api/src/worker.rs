use shipwise_fulfillment::DeliveryFinalizer;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Runs the delayed-shipment sweep every `every`, forever.
pub async fn start_delay_sweep(finalizer: Arc<DeliveryFinalizer>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Delay sweep started, running every {:?}", every);

    loop {
        ticker.tick().await;
        match finalizer.sweep_delayed().await {
            Ok(0) => {}
            Ok(count) => info!(count, "Delay sweep flagged shipments"),
            Err(e) => error!("Delay sweep failed: {}", e),
        }
    }
}
