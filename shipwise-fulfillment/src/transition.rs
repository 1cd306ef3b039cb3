use chrono::{DateTime, Utc};
use shipwise_core::models::{OrderStatus, Shipment, ShipmentStatus, TrackingEvent};
use shipwise_core::repository::{OrderChange, ShipmentRepository, ShipmentWrite, Stamp, WriteOutcome};
use shipwise_core::{CoreError, CoreResult};
use tracing::{debug, warn};
use uuid::Uuid;

/// Re-reads allowed after losing a version race before giving up
pub const MAX_CAS_ATTEMPTS: usize = 3;

/// Who is asking for a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// Carrier scans and operator-entered events: lattice and ordering enforced
    Carrier,
    /// Administrative override: lattice and ordering skipped
    Override,
}

/// What happened to an incoming tracking event
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Applied,
    /// Older than the newest applied event; kept for audit only
    Stale,
    /// Would move the shipment backwards; kept for audit only
    Regression,
    /// Shipment already has this status; nothing recorded
    Duplicate,
}

/// Decide how `event` affects `shipment`.
pub fn classify(shipment: &Shipment, event: &TrackingEvent, authority: Authority) -> Disposition {
    if shipment.status == event.status {
        return Disposition::Duplicate;
    }
    if authority == Authority::Override {
        return Disposition::Applied;
    }
    if let Some(last) = shipment.last_event_at {
        if event.timestamp < last {
            return Disposition::Stale;
        }
    }
    if shipment.status.can_transition_to(event.status) {
        Disposition::Applied
    } else {
        Disposition::Regression
    }
}

/// Shipment after `event` is applied, plus the order change it cascades to.
///
/// Reaching DELIVERED stamps both shipment and order with the event time.
/// Leaving DELIVERED (override only) clears both stamps and puts the order
/// back to SHIPPED.
pub fn apply(shipment: &Shipment, event: &TrackingEvent, now: DateTime<Utc>) -> (Shipment, Option<OrderChange>) {
    let mut next = shipment.clone();
    next.status = event.status;
    next.last_event_at = Some(shipment.last_event_at.map_or(event.timestamp, |t| t.max(event.timestamp)));
    next.updated_at = now;

    let order_change = if event.status == ShipmentStatus::Delivered {
        next.delivered_at = Some(event.timestamp);
        Some(OrderChange {
            order_id: shipment.order_id,
            status: OrderStatus::Delivered,
            fulfillment_status: None,
            delivered_at: Stamp::Set(event.timestamp),
        })
    } else if shipment.status == ShipmentStatus::Delivered {
        next.delivered_at = None;
        Some(OrderChange {
            order_id: shipment.order_id,
            status: OrderStatus::Shipped,
            fulfillment_status: None,
            delivered_at: Stamp::Clear,
        })
    } else {
        None
    };

    (next, order_change)
}

/// One decision taken against a freshly read shipment
pub enum Step<T> {
    /// Compare-and-set write; `T` is carried through to the caller
    Write(ShipmentWrite, T),
    /// Audit-only event append
    Record(TrackingEvent, T),
    /// Nothing to store
    Done(T),
}

/// Result of a committed step, with the shipment as it was read and as it is now
pub struct Committed<T> {
    pub before: Shipment,
    pub after: Shipment,
    pub value: T,
}

/// Read, decide, write; on a lost version race read again and re-decide.
///
/// `decide` sees the current stored shipment every round. After
/// `MAX_CAS_ATTEMPTS` lost races the operation fails with `Conflict`.
pub async fn commit<T, F>(
    shipments: &dyn ShipmentRepository,
    shipment_id: Uuid,
    mut decide: F,
) -> CoreResult<Committed<T>>
where
    F: FnMut(&Shipment) -> CoreResult<Step<T>>,
{
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let current = shipments
            .get_shipment(shipment_id)
            .await
            .map_err(CoreError::storage)?
            .ok_or_else(|| CoreError::not_found("Shipment", shipment_id))?;

        match decide(&current)? {
            Step::Done(value) => {
                return Ok(Committed { after: current.clone(), before: current, value });
            }
            Step::Record(event, value) => {
                shipments.append_tracking_event(&event).await.map_err(CoreError::storage)?;
                return Ok(Committed { after: current.clone(), before: current, value });
            }
            Step::Write(write, value) => match shipments.write_shipment(write).await.map_err(CoreError::storage)? {
                WriteOutcome::Applied(after) => {
                    return Ok(Committed { before: current, after, value });
                }
                WriteOutcome::NotFound => return Err(CoreError::not_found("Shipment", shipment_id)),
                WriteOutcome::VersionConflict => {
                    debug!(shipment_id = %shipment_id, attempt, "Lost version race, re-reading");
                }
            },
        }
    }

    warn!(shipment_id = %shipment_id, "Giving up after {} concurrent modifications", MAX_CAS_ATTEMPTS);
    Err(CoreError::Conflict(format!(
        "shipment {} was modified concurrently, retry the request",
        shipment_id
    )))
}
