use chrono::Utc;
use shipwise_carrier::{CarrierClient, CarrierRegistry};
use shipwise_core::carrier::CarrierShipmentRequest;
use shipwise_core::models::{EventSource, FulfillmentStatus, OrderStatus, Shipment, ShipmentStatus, TrackingEvent};
use shipwise_core::notify::{publish, ShipmentEventSink};
use shipwise_core::repository::{FulfillmentCommit, OrderChange, ShipmentFilter, ShipmentWrite, Stamp};
use shipwise_core::request::{CreateShipmentRequest, RateRequest};
use shipwise_core::validation::{validate_create_shipment, validate_rate_request};
use shipwise_core::{CoreError, CoreResult, OrderRepository, ShipmentRepository, ShippingRate};
use shipwise_shared::events::{ShipmentCancelledEvent, ShipmentCreatedEvent};
use shipwise_shared::ShipmentEvent;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::transition::{self, Step};

/// Turns paid orders into carrier shipments
pub struct FulfillmentOrchestrator {
    orders: Arc<dyn OrderRepository>,
    shipments: Arc<dyn ShipmentRepository>,
    carriers: Arc<CarrierRegistry>,
    events: Arc<dyn ShipmentEventSink>,
}

impl FulfillmentOrchestrator {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        shipments: Arc<dyn ShipmentRepository>,
        carriers: Arc<CarrierRegistry>,
        events: Arc<dyn ShipmentEventSink>,
    ) -> Self {
        Self {
            orders,
            shipments,
            carriers,
            events,
        }
    }

    /// Book the order with its carrier and record the shipment.
    ///
    /// Nothing is written unless the carrier accepted. If the local commit
    /// then fails, the carrier booking is cancelled before returning.
    pub async fn create_shipment(&self, request: CreateShipmentRequest) -> CoreResult<Shipment> {
        validate_create_shipment(&request)?;

        let order = self
            .orders
            .get_order(request.order_id)
            .await
            .map_err(CoreError::storage)?
            .ok_or_else(|| CoreError::not_found("Order", request.order_id))?;
        if !order.is_fulfillable() {
            return Err(CoreError::InvalidState(format!(
                "order {} is {} with payment {}; it must be CONFIRMED or PROCESSING and paid",
                order.order_number,
                order.status,
                order.payment_status.as_str()
            )));
        }

        let client = self.carriers.resolve(&request.carrier)?;
        let booking = client
            .create_shipment(&CarrierShipmentRequest::from(&request))
            .await?;
        let tracking_number = booking.tracking_number.clone().unwrap_or_default();

        let now = Utc::now();
        let shipment = Shipment {
            id: Uuid::new_v4(),
            order_id: order.id,
            carrier: client.key().to_string(),
            service_type: request.service_type.trim().to_ascii_lowercase(),
            tracking_number: tracking_number.clone(),
            status: ShipmentStatus::Pending,
            shipped_at: Some(now),
            delivered_at: None,
            estimated_delivery: booking.estimated_delivery,
            tracking_url: booking.tracking_url.clone(),
            recipient_name: request.recipient.name.clone(),
            destination: request.shipping_address.clone(),
            package: request.package.clone(),
            special_instructions: request.special_instructions.clone(),
            last_event_at: Some(now),
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let picked_up = TrackingEvent::new(
            shipment.id,
            ShipmentStatus::Pending,
            format!("Shipment picked up by {}", client.display_name()),
            EventSource::Fulfillment,
            now,
        )
        .with_payload(booking.carrier_response.clone());

        let stored = match self.shipments.create_fulfillment(&shipment, &picked_up, now).await {
            Ok(FulfillmentCommit::Committed(stored)) => stored,
            Ok(FulfillmentCommit::OrderNotEligible) => {
                self.compensate(client, &tracking_number).await;
                return Err(CoreError::InvalidState(format!(
                    "order {} was fulfilled by a concurrent request",
                    order.order_number
                )));
            }
            Err(e) => {
                error!(order_id = %order.id, "Failed to store shipment: {}", e);
                self.compensate(client, &tracking_number).await;
                return Err(CoreError::storage(e));
            }
        };

        info!(
            shipment_id = %stored.id,
            order_id = %stored.order_id,
            carrier = %stored.carrier,
            tracking_number = %stored.tracking_number,
            "Shipment created"
        );
        publish(
            self.events.as_ref(),
            ShipmentEvent::Created(ShipmentCreatedEvent {
                shipment_id: stored.id,
                order_id: stored.order_id,
                carrier: stored.carrier.clone(),
                service_type: stored.service_type.clone(),
                tracking_number: stored.tracking_number.clone(),
                tracking_url: stored.tracking_url.clone(),
                estimated_delivery: stored.estimated_delivery.map(|t| t.timestamp()),
                timestamp: now.timestamp(),
            }),
        )
        .await;

        Ok(stored)
    }

    /// Best effort: a failed cancel is logged for manual follow-up.
    async fn compensate(&self, client: &CarrierClient, tracking_number: &str) {
        match client.cancel_shipment(tracking_number).await {
            Ok(_) => warn!(
                carrier = client.key(),
                tracking_number, "Cancelled carrier booking after local commit failed"
            ),
            Err(e) => error!(
                carrier = client.key(),
                tracking_number, "Orphaned carrier booking, cancel failed: {}", e
            ),
        }
    }

    pub async fn get_shipment(&self, shipment_id: Uuid) -> CoreResult<Shipment> {
        self.shipments
            .get_shipment(shipment_id)
            .await
            .map_err(CoreError::storage)?
            .ok_or_else(|| CoreError::not_found("Shipment", shipment_id))
    }

    /// Most recent first
    pub async fn get_shipments_by_order(&self, order_id: Uuid) -> CoreResult<Vec<Shipment>> {
        self.shipments
            .list_shipments(&ShipmentFilter::for_order(order_id))
            .await
            .map_err(CoreError::storage)
    }

    /// Cancel at the carrier, then locally; the order becomes fulfillable again.
    pub async fn cancel_shipment(&self, shipment_id: Uuid, reason: &str) -> CoreResult<Shipment> {
        let shipment = self.get_shipment(shipment_id).await?;
        if shipment.status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "shipment {} is already {}",
                shipment_id, shipment.status
            )));
        }

        let client = self.carriers.resolve(&shipment.carrier)?;
        client.cancel_shipment(&shipment.tracking_number).await?;

        let reason = if reason.trim().is_empty() {
            "Cancelled on request".to_string()
        } else {
            reason.trim().to_string()
        };

        let committed = transition::commit(self.shipments.as_ref(), shipment_id, |current| {
            if current.status.is_terminal() {
                return Err(CoreError::Conflict(format!(
                    "shipment {} is already {}",
                    shipment_id, current.status
                )));
            }
            let now = Utc::now();
            let mut next = current.clone();
            next.status = ShipmentStatus::Cancelled;
            next.last_event_at = Some(current.last_event_at.map_or(now, |t| t.max(now)));
            next.updated_at = now;

            let event = TrackingEvent::new(
                current.id,
                ShipmentStatus::Cancelled,
                format!("Shipment cancelled: {}", reason),
                EventSource::Fulfillment,
                now,
            );
            Ok(Step::Write(
                ShipmentWrite {
                    shipment: next,
                    expected_version: current.version,
                    event: Some(event),
                    order_change: Some(OrderChange {
                        order_id: current.order_id,
                        status: OrderStatus::Processing,
                        fulfillment_status: Some(FulfillmentStatus::Unfulfilled),
                        delivered_at: Stamp::Keep,
                    }),
                },
                now,
            ))
        })
        .await?;

        let cancelled = committed.after;
        info!(shipment_id = %cancelled.id, carrier = %cancelled.carrier, "Shipment cancelled");
        publish(
            self.events.as_ref(),
            ShipmentEvent::Cancelled(ShipmentCancelledEvent {
                shipment_id: cancelled.id,
                order_id: cancelled.order_id,
                carrier: cancelled.carrier.clone(),
                tracking_number: cancelled.tracking_number.clone(),
                reason,
                timestamp: committed.value.timestamp(),
            }),
        )
        .await;

        Ok(cancelled)
    }

    /// Quotes from the named carrier, or from every registered carrier.
    ///
    /// When several carriers are asked, one failing carrier is skipped; the
    /// call only fails if none of them answered.
    pub async fn get_shipping_rates(&self, request: &RateRequest) -> CoreResult<Vec<ShippingRate>> {
        validate_rate_request(request)?;

        if let Some(carrier) = request.carrier.as_deref().filter(|c| !c.trim().is_empty()) {
            return self.carriers.resolve(carrier)?.get_shipping_rates(request).await;
        }

        let mut rates = Vec::new();
        let mut first_error = None;
        let mut answered = false;
        for client in self.carriers.clients() {
            match client.get_shipping_rates(request).await {
                Ok(quotes) => {
                    answered = true;
                    rates.extend(quotes);
                }
                Err(e) => {
                    warn!(carrier = client.key(), "Rate quote failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if !answered => Err(e),
            _ => {
                rates.sort_by(|a, b| a.total_rate.total_cmp(&b.total_rate));
                Ok(rates)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{create_request, Harness};
    use shipwise_carrier::{Fault, SandboxStage};
    use shipwise_core::models::PaymentStatus;
    use shipwise_core::CarrierFailure;

    #[tokio::test]
    async fn test_create_shipment_ships_order() {
        let h = Harness::new();
        let order = h.paid_order().await;

        let shipment = h.orchestrator.create_shipment(create_request(order.id, "blue_dart", "express")).await.unwrap();

        assert_eq!(shipment.status, ShipmentStatus::Pending);
        assert_eq!(shipment.carrier, "blue_dart");
        assert_eq!(shipment.tracking_number.len(), 11);
        assert!(shipment.tracking_url.as_deref().unwrap().contains(&shipment.tracking_number));
        assert!(shipment.estimated_delivery.is_some());

        let order = h.order(order.id).await;
        assert_eq!(order.status, OrderStatus::Shipped);
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Fulfilled);
        assert!(order.shipped_at.is_some());

        let events = h.store.list_tracking_events(shipment.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].description.contains("picked up"));
        assert_eq!(h.sink.kinds().await, vec!["shipment_created"]);
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_carrier() {
        let h = Harness::new();
        let order = h.paid_order().await;
        let mut request = create_request(order.id, "blue_dart", "express");
        request.package.weight = 30.5;
        request.package.value = 150_000.0;

        let err = h.orchestrator.create_shipment(request).await.unwrap_err();
        assert_eq!(err.violations().len(), 2);
        assert_eq!(h.ledger.call_count("blue_dart").await, 0);
    }

    #[tokio::test]
    async fn test_unpaid_or_unconfirmed_order_is_invalid_state() {
        let h = Harness::new();
        let mut order = h.paid_order().await;
        order.payment_status = PaymentStatus::Pending;
        h.store.upsert_order(&order).await.unwrap();

        let err = h
            .orchestrator
            .create_shipment(create_request(order.id, "fedex", "ground"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidState(_)));

        let missing = h
            .orchestrator
            .create_shipment(create_request(Uuid::new_v4(), "fedex", "ground"))
            .await
            .unwrap_err();
        assert!(matches!(missing, CoreError::NotFound { entity: "Order", .. }));
    }

    #[tokio::test]
    async fn test_unsupported_carrier_rejected_before_any_call() {
        let h = Harness::new();
        let order = h.paid_order().await;

        let err = h
            .orchestrator
            .create_shipment(create_request(order.id, "pigeon_post", "express"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedCarrier(_)));
        assert_eq!(h.order(order.id).await.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_carrier_rejection_and_timeout_leave_no_trace() {
        let h = Harness::new();
        let order = h.paid_order().await;

        h.ledger.inject_fault("fedex", Fault::Reject("account on hold".into())).await;
        let rejected = h
            .orchestrator
            .create_shipment(create_request(order.id, "fedex", "ground"))
            .await
            .unwrap_err();
        assert!(matches!(rejected, CoreError::CarrierError { kind: CarrierFailure::Rejected, .. }));

        h.ledger
            .inject_fault("fedex", Fault::Delay(std::time::Duration::from_millis(500)))
            .await;
        let timed_out = h
            .orchestrator
            .create_shipment(create_request(order.id, "fedex", "ground"))
            .await
            .unwrap_err();
        assert!(matches!(timed_out, CoreError::CarrierError { kind: CarrierFailure::Timeout, .. }));

        assert!(h.orchestrator.get_shipments_by_order(order.id).await.unwrap().is_empty());
        assert_eq!(h.order(order.id).await.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_concurrent_fulfillment_has_one_winner() {
        let h = Harness::new();
        let order = h.paid_order().await;

        let (a, b) = tokio::join!(
            h.orchestrator.create_shipment(create_request(order.id, "dhl", "express_worldwide")),
            h.orchestrator.create_shipment(create_request(order.id, "dhl", "express_worldwide")),
        );

        let (winner, loser) = match (a, b) {
            (Ok(s), Err(e)) | (Err(e), Ok(s)) => (s, e),
            other => panic!("expected exactly one success, got {:?}", other),
        };
        assert!(matches!(loser, CoreError::InvalidState(_)));

        let shipments = h.orchestrator.get_shipments_by_order(order.id).await.unwrap();
        assert_eq!(shipments.len(), 1);
        assert_eq!(shipments[0].id, winner.id);
    }

    #[tokio::test]
    async fn test_lost_race_cancels_carrier_booking() {
        let h = Harness::new();
        let order = h.paid_order().await;
        h.orchestrator
            .create_shipment(create_request(order.id, "fedex", "ground"))
            .await
            .unwrap();

        // a second request that read the order before the first one committed
        let mut snapshot = h.order(order.id).await;
        snapshot.status = OrderStatus::Confirmed;
        let racing = h.orchestrator_reading(snapshot);

        let err = racing
            .create_shipment(create_request(order.id, "fedex", "ground"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidState(_)));

        let parcels = h.ledger.parcels("fedex").await;
        assert_eq!(parcels.len(), 2);
        assert_eq!(parcels[1].stage, SandboxStage::Cancelled);
        assert_eq!(h.orchestrator.get_shipments_by_order(order.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_returns_order_to_processing() {
        let h = Harness::new();
        let order = h.paid_order().await;
        let shipment = h
            .orchestrator
            .create_shipment(create_request(order.id, "blue_dart", "standard"))
            .await
            .unwrap();

        let cancelled = h.orchestrator.cancel_shipment(shipment.id, "customer request").await.unwrap();
        assert_eq!(cancelled.status, ShipmentStatus::Cancelled);
        assert_eq!(cancelled.carrier, "blue_dart");

        let order = h.order(order.id).await;
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.fulfillment_status, FulfillmentStatus::Unfulfilled);

        let again = h.orchestrator.cancel_shipment(shipment.id, "twice").await.unwrap_err();
        assert!(matches!(again, CoreError::Conflict(_)));

        // fulfillable again
        assert!(h
            .orchestrator
            .create_shipment(create_request(order.id, "fedex", "express"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_rates_across_carriers_skip_a_failing_one() {
        let h = Harness::new();
        let request = crate::testing::rate_request(None);

        h.ledger.inject_fault("dhl", Fault::Transport("down".into())).await;
        let rates = h.orchestrator.get_shipping_rates(&request).await.unwrap();

        assert!(rates.iter().any(|r| r.carrier == "blue_dart"));
        assert!(rates.iter().any(|r| r.carrier == "fedex"));
        assert!(rates.iter().all(|r| r.carrier != "dhl"));
        assert!(rates.windows(2).all(|w| w[0].total_rate <= w[1].total_rate));

        let only_fedex = h
            .orchestrator
            .get_shipping_rates(&crate::testing::rate_request(Some("fedex")))
            .await
            .unwrap();
        assert_eq!(only_fedex.len(), 3);
    }
}
