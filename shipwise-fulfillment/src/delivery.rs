use chrono::{DateTime, Utc};
use serde::Serialize;
use shipwise_core::models::{EventSource, OrderStatus, Shipment, ShipmentStatus, TrackingEvent};
use shipwise_core::notify::{publish, ShipmentEventSink};
use shipwise_core::repository::{OrderChange, ShipmentFilter, ShipmentWrite, Stamp};
use shipwise_core::{CoreError, CoreResult, ShipmentRepository};
use shipwise_shared::events::{
    DeliveryIssueEvent, DeliveryRescheduledEvent, ShipmentDeliveredEvent, ShipmentDelayedEvent,
};
use shipwise_shared::ShipmentEvent;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::transition::{self, Step};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeliverySummary {
    pub order_id: Option<Uuid>,
    pub total: usize,
    /// Every status is present, zero when no shipment has it
    pub by_status: BTreeMap<ShipmentStatus, usize>,
    /// Mean of shipped-to-delivered time in days, two decimals
    pub average_delivery_days: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DelayedShipment {
    pub shipment: Shipment,
    pub days_delayed: i64,
}

/// Delivery confirmation, exception handling and the overdue report
pub struct DeliveryFinalizer {
    shipments: Arc<dyn ShipmentRepository>,
    events: Arc<dyn ShipmentEventSink>,
}

impl DeliveryFinalizer {
    pub fn new(shipments: Arc<dyn ShipmentRepository>, events: Arc<dyn ShipmentEventSink>) -> Self {
        Self { shipments, events }
    }

    /// Mark the shipment and its order delivered as of now.
    pub async fn confirm_delivery(&self, shipment_id: Uuid, notes: Option<String>) -> CoreResult<Shipment> {
        let notes = notes.filter(|n| !n.trim().is_empty());

        let committed = transition::commit(self.shipments.as_ref(), shipment_id, |current| {
            if current.status == ShipmentStatus::Delivered {
                return Err(CoreError::Conflict(format!("shipment {} is already delivered", shipment_id)));
            }
            let now = Utc::now();
            let event = TrackingEvent::new(
                current.id,
                ShipmentStatus::Delivered,
                notes.clone().unwrap_or_else(|| "Delivery confirmed".to_string()),
                EventSource::Delivery,
                now,
            );
            let (next, order_change) = transition::apply(current, &event, now);
            Ok(Step::Write(
                ShipmentWrite {
                    shipment: next,
                    expected_version: current.version,
                    event: Some(event),
                    order_change,
                },
                now,
            ))
        })
        .await?;

        let delivered = committed.after;
        info!(
            shipment_id = %delivered.id,
            order_id = %delivered.order_id,
            previous = %committed.before.status,
            "Delivery confirmed"
        );
        publish(
            self.events.as_ref(),
            ShipmentEvent::Delivered(ShipmentDeliveredEvent {
                shipment_id: delivered.id,
                order_id: delivered.order_id,
                tracking_number: delivered.tracking_number.clone(),
                delivered_at: delivered.delivered_at.unwrap_or(committed.value).timestamp(),
                notes,
            }),
        )
        .await;

        Ok(delivered)
    }

    /// Roll the shipment back to PENDING and its order to PROCESSING so the
    /// delivery can be retried. Applies whatever the current status is.
    pub async fn report_delivery_issue(
        &self,
        shipment_id: Uuid,
        issue: &str,
        notes: Option<String>,
    ) -> CoreResult<Shipment> {
        let issue = issue.trim();
        if issue.is_empty() {
            return Err(CoreError::ValidationError(vec!["issue is required".to_string()]));
        }
        let notes = notes.filter(|n| !n.trim().is_empty());

        let committed = transition::commit(self.shipments.as_ref(), shipment_id, |current| {
            let now = Utc::now();
            let mut next = current.clone();
            next.status = ShipmentStatus::Pending;
            next.delivered_at = None;
            next.last_event_at = Some(current.last_event_at.map_or(now, |t| t.max(now)));
            next.updated_at = now;

            let description = match &notes {
                Some(n) => format!("Delivery issue: {} ({})", issue, n),
                None => format!("Delivery issue: {}", issue),
            };
            let event = TrackingEvent::new(current.id, ShipmentStatus::Pending, description, EventSource::Delivery, now);

            Ok(Step::Write(
                ShipmentWrite {
                    shipment: next,
                    expected_version: current.version,
                    event: Some(event),
                    order_change: Some(OrderChange {
                        order_id: current.order_id,
                        status: OrderStatus::Processing,
                        fulfillment_status: None,
                        delivered_at: Stamp::Clear,
                    }),
                },
                now,
            ))
        })
        .await?;

        let shipment = committed.after;
        warn!(
            shipment_id = %shipment.id,
            previous = %committed.before.status,
            issue,
            "Delivery issue reported, shipment reset for retry"
        );
        publish(
            self.events.as_ref(),
            ShipmentEvent::IssueReported(DeliveryIssueEvent {
                shipment_id: shipment.id,
                order_id: shipment.order_id,
                previous_status: committed.before.status.as_str().to_string(),
                issue: issue.to_string(),
                notes,
                timestamp: committed.value.timestamp(),
            }),
        )
        .await;

        Ok(shipment)
    }

    /// Move the estimated delivery date. Status and history are untouched.
    pub async fn reschedule_delivery(
        &self,
        shipment_id: Uuid,
        new_date: DateTime<Utc>,
        reason: &str,
    ) -> CoreResult<Shipment> {
        let reason = reason.trim();
        let now = Utc::now();
        let mut violations = Vec::new();
        if new_date < now {
            violations.push("new delivery date must not be in the past".to_string());
        }
        if reason.is_empty() {
            violations.push("reason is required".to_string());
        }
        if !violations.is_empty() {
            return Err(CoreError::ValidationError(violations));
        }

        let committed = transition::commit(self.shipments.as_ref(), shipment_id, |current| {
            if current.status == ShipmentStatus::Delivered {
                return Err(CoreError::Conflict(format!(
                    "shipment {} is already delivered and cannot be rescheduled",
                    shipment_id
                )));
            }
            let mut next = current.clone();
            next.estimated_delivery = Some(new_date);
            next.updated_at = Utc::now();
            Ok(Step::Write(
                ShipmentWrite {
                    shipment: next,
                    expected_version: current.version,
                    event: None,
                    order_change: None,
                },
                (),
            ))
        })
        .await?;

        let shipment = committed.after;
        info!(shipment_id = %shipment.id, new_date = %new_date, reason, "Delivery rescheduled");
        publish(
            self.events.as_ref(),
            ShipmentEvent::Rescheduled(DeliveryRescheduledEvent {
                shipment_id: shipment.id,
                order_id: shipment.order_id,
                previous_estimate: committed.before.estimated_delivery.map(|t| t.timestamp()),
                new_estimate: new_date.timestamp(),
                reason: reason.to_string(),
                timestamp: now.timestamp(),
            }),
        )
        .await;

        Ok(shipment)
    }

    pub async fn get_delivery_summary(&self, order_id: Option<Uuid>) -> CoreResult<DeliverySummary> {
        let filter = ShipmentFilter {
            order_id,
            ..Default::default()
        };
        let shipments = self.shipments.list_shipments(&filter).await.map_err(CoreError::storage)?;
        Ok(summarize(order_id, &shipments))
    }

    pub async fn get_delayed_shipments(&self) -> CoreResult<Vec<DelayedShipment>> {
        self.delayed_shipments_at(Utc::now()).await
    }

    /// In-flight shipments whose estimated delivery is strictly before `now`,
    /// most delayed first.
    pub async fn delayed_shipments_at(&self, now: DateTime<Utc>) -> CoreResult<Vec<DelayedShipment>> {
        let filter = ShipmentFilter {
            order_id: None,
            statuses: Some(ShipmentStatus::IN_FLIGHT.to_vec()),
            estimated_before: Some(now),
        };
        let shipments = self.shipments.list_shipments(&filter).await.map_err(CoreError::storage)?;

        let mut delayed: Vec<DelayedShipment> = shipments
            .into_iter()
            .filter_map(|shipment| {
                let eta = shipment.estimated_delivery?;
                let overdue = (now - eta).num_milliseconds() as f64 / MILLIS_PER_DAY;
                Some(DelayedShipment {
                    // any overdue amount counts as a started day
                    days_delayed: (overdue.ceil() as i64).max(1),
                    shipment,
                })
            })
            .collect();
        delayed.sort_by(|a, b| {
            b.days_delayed
                .cmp(&a.days_delayed)
                .then(a.shipment.estimated_delivery.cmp(&b.shipment.estimated_delivery))
        });
        Ok(delayed)
    }

    /// One pass of the overdue sweep: announce every delayed shipment.
    pub async fn sweep_delayed(&self) -> CoreResult<usize> {
        let now = Utc::now();
        let delayed = self.delayed_shipments_at(now).await?;
        for d in &delayed {
            publish(
                self.events.as_ref(),
                ShipmentEvent::Delayed(ShipmentDelayedEvent {
                    shipment_id: d.shipment.id,
                    order_id: d.shipment.order_id,
                    carrier: d.shipment.carrier.clone(),
                    status: d.shipment.status.as_str().to_string(),
                    estimated_delivery: d.shipment.estimated_delivery.map_or(0, |t| t.timestamp()),
                    days_delayed: d.days_delayed,
                    detected_at: now.timestamp(),
                }),
            )
            .await;
        }
        if !delayed.is_empty() {
            warn!(count = delayed.len(), "Delayed shipments detected");
        }
        Ok(delayed.len())
    }
}

fn summarize(order_id: Option<Uuid>, shipments: &[Shipment]) -> DeliverySummary {
    let mut by_status: BTreeMap<ShipmentStatus, usize> = ShipmentStatus::ALL.iter().map(|s| (*s, 0)).collect();
    for s in shipments {
        *by_status.entry(s.status).or_insert(0) += 1;
    }

    let durations: Vec<f64> = shipments.iter().filter_map(Shipment::delivery_days).collect();
    let average_delivery_days = if durations.is_empty() {
        None
    } else {
        let mean = durations.iter().sum::<f64>() / durations.len() as f64;
        Some((mean * 100.0).round() / 100.0)
    };

    DeliverySummary {
        order_id,
        total: shipments.len(),
        by_status,
        average_delivery_days,
    }
}
