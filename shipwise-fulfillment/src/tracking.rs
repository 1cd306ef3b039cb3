use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use shipwise_carrier::CarrierRegistry;
use shipwise_core::models::{EventSource, Shipment, ShipmentStatus, TrackingEvent};
use shipwise_core::notify::{publish, ShipmentEventSink};
use shipwise_core::repository::ShipmentWrite;
use shipwise_core::request::{StatusOverride, TrackingUpdate};
use shipwise_core::validation::{check_event_time, validate_tracking_update, Violations};
use shipwise_core::{CoreError, CoreResult, ShipmentRepository, TrackingCache};
use shipwise_shared::events::{ShipmentDeliveredEvent, ShipmentStatusChangedEvent};
use shipwise_shared::ShipmentEvent;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transition::{self, Authority, Disposition, Step};

/// What a tracking lookup returns to the caller
#[derive(Debug, Clone, Serialize)]
pub struct TrackingSnapshot {
    pub shipment: Shipment,
    pub carrier_tracking: Value,
    pub tracking_url: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
    /// True when `carrier_tracking` came from the cache rather than the carrier
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub shipment: Shipment,
    pub disposition: Disposition,
    /// The stored event; `None` for duplicates, which store nothing
    pub event: Option<TrackingEvent>,
}

struct CacheConfig {
    cache: Arc<dyn TrackingCache>,
    ttl_seconds: u64,
}

/// Keeps shipment status in line with what carriers and operators report
pub struct TrackingReconciler {
    shipments: Arc<dyn ShipmentRepository>,
    carriers: Arc<CarrierRegistry>,
    events: Arc<dyn ShipmentEventSink>,
    cache: Option<CacheConfig>,
}

impl TrackingReconciler {
    pub fn new(
        shipments: Arc<dyn ShipmentRepository>,
        carriers: Arc<CarrierRegistry>,
        events: Arc<dyn ShipmentEventSink>,
    ) -> Self {
        Self {
            shipments,
            carriers,
            events,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn TrackingCache>, ttl_seconds: u64) -> Self {
        self.cache = Some(CacheConfig { cache, ttl_seconds });
        self
    }

    async fn load(&self, shipment_id: Uuid) -> CoreResult<Shipment> {
        self.shipments
            .get_shipment(shipment_id)
            .await
            .map_err(CoreError::storage)?
            .ok_or_else(|| CoreError::not_found("Shipment", shipment_id))
    }

    /// Ask the carrier where the parcel is and adopt its status if it differs.
    pub async fn track_shipment(&self, tracking_number: &str) -> CoreResult<TrackingSnapshot> {
        let tracking_number = tracking_number.trim();
        let shipment = self
            .shipments
            .find_by_tracking_number(tracking_number)
            .await
            .map_err(CoreError::storage)?
            .ok_or_else(|| CoreError::not_found("Shipment", tracking_number))?;
        let client = self.carriers.resolve(&shipment.carrier)?;

        if let Some(cfg) = &self.cache {
            match cfg.cache.get_tracking(tracking_number).await {
                Ok(Some(payload)) => {
                    debug!(tracking_number, "Tracking served from cache");
                    return Ok(TrackingSnapshot {
                        tracking_url: shipment.tracking_url.clone(),
                        estimated_delivery: shipment.estimated_delivery,
                        shipment,
                        carrier_tracking: payload,
                        cached: true,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!(tracking_number, "Tracking cache unavailable: {}", e),
            }
        }

        let response = client.track_shipment(tracking_number).await?;

        let mut current = shipment;
        if let Some(status) = response.status.filter(|s| *s != current.status) {
            let latest = response.history.last();
            let description = latest
                .map(|c| c.description.clone())
                .unwrap_or_else(|| format!("{} reported {}", client.display_name(), status));
            let event = TrackingEvent::new(
                current.id,
                status,
                description,
                EventSource::CarrierSync,
                response.status_at.unwrap_or_else(Utc::now),
            )
            .with_location(response.location.clone())
            .with_payload(serde_json::json!({
                "native_code": latest.map(|c| c.native_code.clone()),
            }));
            current = self.ingest(current.id, event, Authority::Carrier).await?.shipment;
        }

        let carrier_tracking = serde_json::to_value(&response).map_err(CoreError::storage)?;
        if let Some(cfg) = &self.cache {
            if let Err(e) = cfg
                .cache
                .put_tracking(tracking_number, &carrier_tracking, cfg.ttl_seconds)
                .await
            {
                warn!(tracking_number, "Failed to cache tracking payload: {}", e);
            }
        }

        Ok(TrackingSnapshot {
            tracking_url: current.tracking_url.clone().or(response.tracking_url),
            estimated_delivery: response.estimated_delivery.or(current.estimated_delivery),
            shipment: current,
            carrier_tracking,
            cached: false,
        })
    }

    /// Record an operator- or integration-supplied status report.
    pub async fn add_tracking_event(&self, shipment_id: Uuid, update: TrackingUpdate) -> CoreResult<IngestOutcome> {
        let shipment = self.load(shipment_id).await?;
        let status = validate_tracking_update(&update, &shipment.tracking_number)?;

        let event = TrackingEvent::new(
            shipment.id,
            status,
            update.description.trim(),
            EventSource::Manual,
            update.timestamp.unwrap_or_else(Utc::now),
        )
        .with_location(update.location)
        .with_attempt(update.delivery_attempt)
        .with_payload(update.carrier_payload.unwrap_or(Value::Null));

        self.ingest(shipment.id, event, Authority::Carrier).await
    }

    /// Oldest first by event time
    pub async fn get_tracking_events(&self, shipment_id: Uuid) -> CoreResult<Vec<TrackingEvent>> {
        self.load(shipment_id).await?;
        self.shipments
            .list_tracking_events(shipment_id)
            .await
            .map_err(CoreError::storage)
    }

    /// Administrative override. Skips the transition and ordering checks.
    pub async fn update_shipment_status(&self, shipment_id: Uuid, request: StatusOverride) -> CoreResult<IngestOutcome> {
        let description = request
            .notes
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Status set to {} by an administrator", request.status));
        let event = TrackingEvent::new(shipment_id, request.status, description, EventSource::Admin, Utc::now());

        let outcome = self.ingest(shipment_id, event, Authority::Override).await?;
        info!(shipment_id = %shipment_id, status = %request.status, "Administrative status override");
        Ok(outcome)
    }

    /// Apply a carrier push notification in the carrier's own format.
    pub async fn ingest_carrier_webhook(&self, carrier: &str, payload: Value) -> CoreResult<IngestOutcome> {
        let client = self.carriers.resolve(carrier)?;
        let update = client.parse_webhook(&payload)?;

        let shipment = self
            .shipments
            .find_by_tracking_number(&update.tracking_number)
            .await
            .map_err(CoreError::storage)?
            .ok_or_else(|| CoreError::not_found("Shipment", &update.tracking_number))?;
        if shipment.carrier != client.key() {
            return Err(CoreError::ValidationError(vec![format!(
                "tracking number {} belongs to {}, not {}",
                update.tracking_number,
                shipment.carrier,
                client.key()
            )]));
        }
        let mut v = Violations::new();
        check_event_time(update.timestamp, Utc::now(), &mut v);
        v.into_result()?;

        let event = TrackingEvent::new(
            shipment.id,
            update.status,
            update.description,
            EventSource::CarrierWebhook,
            update.timestamp,
        )
        .with_location(update.location)
        .with_attempt(update.delivery_attempt)
        .with_payload(payload);

        self.ingest(shipment.id, event, Authority::Carrier).await
    }

    /// The single path every status report goes through.
    pub(crate) async fn ingest(
        &self,
        shipment_id: Uuid,
        event: TrackingEvent,
        authority: Authority,
    ) -> CoreResult<IngestOutcome> {
        // a report already kept for audit is not kept again
        let already_kept = self
            .shipments
            .list_tracking_events(shipment_id)
            .await
            .map_err(CoreError::storage)?
            .iter()
            .any(|e| !e.applied && e.status == event.status && e.timestamp == event.timestamp && e.source == event.source);

        let committed = transition::commit(self.shipments.as_ref(), shipment_id, |current| {
            let disposition = transition::classify(current, &event, authority);
            Ok(match disposition {
                Disposition::Duplicate => Step::Done((disposition, None)),
                Disposition::Stale | Disposition::Regression if already_kept => Step::Done((disposition, None)),
                Disposition::Stale | Disposition::Regression => {
                    let unapplied = event.clone().unapplied();
                    Step::Record(unapplied.clone(), (disposition, Some(unapplied)))
                }
                Disposition::Applied => {
                    let (next, order_change) = transition::apply(current, &event, Utc::now());
                    Step::Write(
                        ShipmentWrite {
                            shipment: next,
                            expected_version: current.version,
                            event: Some(event.clone()),
                            order_change,
                        },
                        (disposition, Some(event.clone())),
                    )
                }
            })
        })
        .await?;

        let (disposition, stored_event) = committed.value;
        match disposition {
            Disposition::Applied => self.announce(&committed.before, &committed.after, &event).await,
            Disposition::Stale | Disposition::Regression => debug!(
                shipment_id = %shipment_id,
                current = %committed.after.status,
                reported = %event.status,
                ?disposition,
                "Tracking event kept for audit only"
            ),
            Disposition::Duplicate => {}
        }

        Ok(IngestOutcome {
            shipment: committed.after,
            disposition,
            event: stored_event,
        })
    }

    async fn announce(&self, before: &Shipment, after: &Shipment, event: &TrackingEvent) {
        info!(
            shipment_id = %after.id,
            from = %before.status,
            to = %after.status,
            source = event.source.as_str(),
            "Shipment status changed"
        );
        publish(
            self.events.as_ref(),
            ShipmentEvent::StatusChanged(ShipmentStatusChangedEvent {
                shipment_id: after.id,
                order_id: after.order_id,
                tracking_number: after.tracking_number.clone(),
                from_status: before.status.as_str().to_string(),
                to_status: after.status.as_str().to_string(),
                location: event.location.clone(),
                source: event.source.as_str().to_string(),
                timestamp: event.timestamp.timestamp(),
            }),
        )
        .await;

        if after.status == ShipmentStatus::Delivered {
            publish(
                self.events.as_ref(),
                ShipmentEvent::Delivered(ShipmentDeliveredEvent {
                    shipment_id: after.id,
                    order_id: after.order_id,
                    tracking_number: after.tracking_number.clone(),
                    delivered_at: after.delivered_at.unwrap_or(event.timestamp).timestamp(),
                    notes: Some(event.description.clone()),
                }),
            )
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{create_request, Harness};
    use async_trait::async_trait;
    use chrono::Duration;
    use serde_json::json;
    use shipwise_carrier::SandboxStage;
    use shipwise_core::models::OrderStatus;
    use shipwise_core::repository::StoreResult;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    fn update(tracking_number: &str, status: &str, at: DateTime<Utc>) -> TrackingUpdate {
        TrackingUpdate {
            tracking_number: tracking_number.to_string(),
            status: status.to_string(),
            location: Some("Bengaluru Hub".to_string()),
            timestamp: Some(at),
            description: format!("Carrier reported {}", status),
            delivery_attempt: None,
            carrier_payload: None,
        }
    }

    #[tokio::test]
    async fn test_delivered_event_cascades_once() {
        let h = Harness::new();
        let shipment = h.shipped("blue_dart", "express").await;
        let at = Utc::now();

        let first = h
            .tracker
            .add_tracking_event(shipment.id, update(&shipment.tracking_number, "DELIVERED", at))
            .await
            .unwrap();
        assert_eq!(first.disposition, Disposition::Applied);
        assert_eq!(first.shipment.status, ShipmentStatus::Delivered);
        assert_eq!(first.shipment.delivered_at, Some(at));

        let order = h.order(shipment.order_id).await;
        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.delivered_at, Some(at));

        let again = h
            .tracker
            .add_tracking_event(
                shipment.id,
                update(&shipment.tracking_number, "DELIVERED", at + Duration::minutes(5)),
            )
            .await
            .unwrap();
        assert_eq!(again.disposition, Disposition::Duplicate);
        assert_eq!(again.shipment.delivered_at, Some(at));

        let events = h.tracker.get_tracking_events(shipment.id).await.unwrap();
        assert_eq!(
            events.iter().filter(|e| e.status == ShipmentStatus::Delivered).count(),
            1
        );
        assert_eq!(
            h.sink.kinds().await,
            vec!["shipment_created", "shipment_status_changed", "shipment_delivered"]
        );
    }

    #[tokio::test]
    async fn test_stale_and_regressing_events_are_recorded_unapplied() {
        let h = Harness::new();
        let shipment = h.shipped("fedex", "ground").await;
        let now = Utc::now();

        h.tracker
            .add_tracking_event(shipment.id, update(&shipment.tracking_number, "OUT_FOR_DELIVERY", now))
            .await
            .unwrap();

        let stale = h
            .tracker
            .add_tracking_event(
                shipment.id,
                update(&shipment.tracking_number, "DELIVERED", now - Duration::hours(1)),
            )
            .await
            .unwrap();
        assert_eq!(stale.disposition, Disposition::Stale);
        assert_eq!(stale.shipment.status, ShipmentStatus::OutForDelivery);

        let backwards = h
            .tracker
            .add_tracking_event(
                shipment.id,
                update(&shipment.tracking_number, "IN_TRANSIT", now + Duration::minutes(1)),
            )
            .await
            .unwrap();
        assert_eq!(backwards.disposition, Disposition::Regression);

        let events = h.tracker.get_tracking_events(shipment.id).await.unwrap();
        let unapplied: Vec<_> = events.iter().filter(|e| !e.applied).collect();
        assert_eq!(unapplied.len(), 2);
        // listed by event time, so the late DELIVERED report comes first
        assert_eq!(events[0].status, ShipmentStatus::Delivered);
        assert!(!events[0].applied);
    }

    #[tokio::test]
    async fn test_event_validation_aggregates() {
        let h = Harness::new();
        let shipment = h.shipped("dhl", "economy_select").await;

        let bad = TrackingUpdate {
            tracking_number: "999".to_string(),
            status: "LOST_IN_SPACE".to_string(),
            location: None,
            timestamp: None,
            description: "short".to_string(),
            delivery_attempt: Some(0),
            carrier_payload: None,
        };
        let err = h.tracker.add_tracking_event(shipment.id, bad).await.unwrap_err();
        assert_eq!(err.violations().len(), 5);

        let missing = h
            .tracker
            .add_tracking_event(Uuid::new_v4(), update("1234567890", "IN_TRANSIT", Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(missing, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_track_adopts_carrier_status() {
        let h = Harness::new();
        let shipment = h.shipped("dhl", "express_worldwide").await;
        h.ledger
            .force_stage(&shipment.tracking_number, SandboxStage::OutForDelivery)
            .await
            .unwrap();

        let snapshot = h.tracker.track_shipment(&shipment.tracking_number).await.unwrap();
        assert_eq!(snapshot.shipment.status, ShipmentStatus::OutForDelivery);
        assert_eq!(snapshot.shipment.carrier, "dhl");
        assert!(!snapshot.cached);
        assert_eq!(snapshot.carrier_tracking["status"], json!("OUT_FOR_DELIVERY"));

        let unknown = h.tracker.track_shipment("0000000000").await.unwrap_err();
        assert!(matches!(unknown, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_future_dated_event_cannot_freeze_shipment() {
        let h = Harness::new();
        let shipment = h.shipped("fedex", "ground").await;
        let now = Utc::now();

        let err = h
            .tracker
            .add_tracking_event(
                shipment.id,
                update(&shipment.tracking_number, "IN_TRANSIT", now + Duration::days(3650)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));

        let delivered = h
            .tracker
            .add_tracking_event(shipment.id, update(&shipment.tracking_number, "DELIVERED", now))
            .await
            .unwrap();
        assert_eq!(delivered.disposition, Disposition::Applied);
        assert_eq!(delivered.shipment.status, ShipmentStatus::Delivered);
        assert_eq!(delivered.event.unwrap().source, EventSource::Manual);
    }

    #[tokio::test]
    async fn test_repeated_polls_keep_one_audit_copy() {
        let h = Harness::new();
        let shipment = h.shipped("dhl", "express_worldwide").await;
        h.ledger
            .force_stage(&shipment.tracking_number, SandboxStage::Delivered)
            .await
            .unwrap();
        h.tracker.track_shipment(&shipment.tracking_number).await.unwrap();
        h.finalizer
            .report_delivery_issue(shipment.id, "Parcel left at wrong door", None)
            .await
            .unwrap();
        let before = h.tracker.get_tracking_events(shipment.id).await.unwrap().len();

        for _ in 0..5 {
            let snapshot = h.tracker.track_shipment(&shipment.tracking_number).await.unwrap();
            assert_eq!(snapshot.shipment.status, ShipmentStatus::Pending);
        }

        let events = h.tracker.get_tracking_events(shipment.id).await.unwrap();
        assert_eq!(events.len(), before + 1);
        assert_eq!(events.iter().filter(|e| !e.applied).count(), 1);
    }

    #[derive(Default)]
    struct MapCache(Mutex<HashMap<String, Value>>);

    #[async_trait]
    impl TrackingCache for MapCache {
        async fn get_tracking(&self, tracking_number: &str) -> StoreResult<Option<Value>> {
            Ok(self.0.lock().await.get(tracking_number).cloned())
        }

        async fn put_tracking(&self, tracking_number: &str, payload: &Value, _ttl: u64) -> StoreResult<()> {
            self.0.lock().await.insert(tracking_number.to_string(), payload.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_second_lookup_is_served_from_cache() {
        let h = Harness::new();
        let cache = Arc::new(MapCache::default());
        let tracker = h.tracker_with_cache(cache.clone());
        let shipment = h.shipped("fedex", "express").await;

        let calls_before = h.ledger.call_count("fedex").await;
        assert!(!tracker.track_shipment(&shipment.tracking_number).await.unwrap().cached);
        assert!(tracker.track_shipment(&shipment.tracking_number).await.unwrap().cached);
        assert_eq!(h.ledger.call_count("fedex").await, calls_before + 1);
    }

    #[tokio::test]
    async fn test_admin_override_bypasses_lattice_but_keeps_cascade() {
        let h = Harness::new();
        let shipment = h.shipped("blue_dart", "surface").await;

        h.tracker
            .update_shipment_status(
                shipment.id,
                StatusOverride { status: ShipmentStatus::Delivered, notes: None },
            )
            .await
            .unwrap();
        assert_eq!(h.order(shipment.order_id).await.status, OrderStatus::Delivered);

        let reopened = h
            .tracker
            .update_shipment_status(
                shipment.id,
                StatusOverride {
                    status: ShipmentStatus::InTransit,
                    notes: Some("Scanned delivered by mistake".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(reopened.disposition, Disposition::Applied);
        assert_eq!(reopened.shipment.status, ShipmentStatus::InTransit);
        assert_eq!(reopened.shipment.delivered_at, None);

        let order = h.order(shipment.order_id).await;
        assert_eq!(order.status, OrderStatus::Shipped);
        assert_eq!(order.delivered_at, None);

        let events = h.tracker.get_tracking_events(shipment.id).await.unwrap();
        assert_eq!(events.last().unwrap().source, EventSource::Admin);
    }

    #[tokio::test]
    async fn test_webhook_is_parsed_and_applied() {
        let h = Harness::new();
        let order = h.paid_order().await;
        let shipment = h
            .orchestrator
            .create_shipment(create_request(order.id, "fedex", "priority_overnight"))
            .await
            .unwrap();

        let outcome = h
            .tracker
            .ingest_carrier_webhook(
                "FedEx",
                json!({
                    "trackingNumber": shipment.tracking_number,
                    "scanEvent": {
                        "eventType": "IT",
                        "date": (Utc::now() + Duration::minutes(1)).to_rfc3339(),
                        "eventDescription": "Departed FedEx hub",
                        "scanLocation": { "city": "MEMPHIS", "countryCode": "US" }
                    }
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome.disposition, Disposition::Applied);
        assert_eq!(outcome.shipment.status, ShipmentStatus::InTransit);
        let event = outcome.event.unwrap();
        assert_eq!(event.source, EventSource::CarrierWebhook);
        assert_eq!(event.location.as_deref(), Some("MEMPHIS, US"));

        let wrong_carrier = h
            .tracker
            .ingest_carrier_webhook(
                "dhl",
                json!({ "shipments": [{ "id": shipment.tracking_number, "status": {
                    "statusCode": "delivered", "timestamp": Utc::now().to_rfc3339() } }] }),
            )
            .await
            .unwrap_err();
        assert!(matches!(wrong_carrier, CoreError::ValidationError(_)));

        let unsupported = h.tracker.ingest_carrier_webhook("ups", json!({})).await.unwrap_err();
        assert!(matches!(unsupported, CoreError::UnsupportedCarrier(_)));
    }
}
