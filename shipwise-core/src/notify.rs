use async_trait::async_trait;
use shipwise_shared::ShipmentEvent;
use std::sync::Arc;
use tracing::{info, warn};

/// Outbound notification dispatcher. Delivery is somebody else's problem;
/// the core only hands events over.
#[async_trait]
pub trait ShipmentEventSink: Send + Sync {
    async fn emit(&self, event: &ShipmentEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Fire-and-forget: a failing sink is logged, never surfaced to the caller.
pub async fn publish(sink: &dyn ShipmentEventSink, event: ShipmentEvent) {
    if let Err(e) = sink.emit(&event).await {
        warn!(
            kind = event.kind(),
            shipment_id = %event.shipment_id(),
            "Failed to dispatch shipment event: {}",
            e
        );
    }
}

/// Renders every event as one structured log line
pub struct TracingEventSink;

#[async_trait]
impl ShipmentEventSink for TracingEventSink {
    async fn emit(&self, event: &ShipmentEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::to_string(event)?;
        info!(
            target: "shipwise::events",
            kind = event.kind(),
            shipment_id = %event.shipment_id(),
            payload = %payload,
            "shipment event"
        );
        Ok(())
    }
}

pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn ShipmentEventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn ShipmentEventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl ShipmentEventSink for FanoutEventSink {
    /// Every sink gets the event even if an earlier one fails; the first error is returned.
    async fn emit(&self, event: &ShipmentEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
