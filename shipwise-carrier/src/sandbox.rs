use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use shipwise_core::carrier::{CarrierCheckpoint, CarrierResponse};
use shipwise_core::ShipmentStatus;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Carrier-side parcel state, in the order a parcel normally moves through it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStage {
    Booked,
    PickedUp,
    InTransit,
    OutForDelivery,
    Delivered,
    Undelivered,
    Returned,
    Cancelled,
}

impl SandboxStage {
    /// Stages reached on their own as transit time elapses, with the
    /// fraction of transit time at which each is reached.
    const PROGRESSION: [(SandboxStage, f64); 5] = [
        (SandboxStage::Booked, 0.0),
        (SandboxStage::PickedUp, 0.1),
        (SandboxStage::InTransit, 0.25),
        (SandboxStage::OutForDelivery, 0.8),
        (SandboxStage::Delivered, 1.0),
    ];

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            SandboxStage::Delivered | SandboxStage::Returned | SandboxStage::Cancelled
        )
    }
}

/// A failure mode queued for the next call to one carrier
#[derive(Debug, Clone)]
pub enum Fault {
    /// The carrier answers but refuses
    Reject(String),
    /// The carrier cannot be reached
    Transport(String),
    /// The carrier answers normally after a pause
    Delay(Duration),
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("connection to {carrier} failed: {reason}")]
    Unreachable { carrier: String, reason: String },
    /// Refusal on a call that has no response envelope to carry it
    #[error("{carrier} refused the request: {reason}")]
    Refused { carrier: String, reason: String },
}

/// What the gate decided for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Proceed,
    Reject(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyCancelled,
    TooLate(SandboxStage),
    UnknownParcel,
}

#[derive(Debug, Clone, Serialize)]
pub struct Scan {
    pub stage: SandboxStage,
    pub at: DateTime<Utc>,
    pub location: String,
}

/// Read-only snapshot of a parcel
#[derive(Debug, Clone, Serialize)]
pub struct ParcelView {
    pub carrier: String,
    pub tracking_number: String,
    pub service_type: String,
    pub stage: SandboxStage,
    pub booked_at: DateTime<Utc>,
    pub estimated_delivery: DateTime<Utc>,
    pub scans: Vec<Scan>,
}

#[derive(Debug, Clone)]
struct Parcel {
    carrier: String,
    tracking_number: String,
    service_type: String,
    destination_city: String,
    booked_at: DateTime<Utc>,
    transit: ChronoDuration,
    scans: Vec<Scan>,
    /// Set once a stage is forced or the parcel is cancelled; time no longer moves it
    frozen: bool,
}

impl Parcel {
    fn location_for(&self, stage: SandboxStage) -> String {
        match stage {
            SandboxStage::Booked | SandboxStage::PickedUp => "Origin facility".to_string(),
            SandboxStage::InTransit => "Sort hub".to_string(),
            SandboxStage::Returned => "Return centre".to_string(),
            _ => self.destination_city.clone(),
        }
    }

    /// Record every stage whose threshold has passed but is not yet scanned.
    fn advance(&mut self, now: DateTime<Utc>) {
        if self.frozen {
            return;
        }
        let total_ms = self.transit.num_milliseconds().max(1) as f64;
        for (stage, fraction) in SandboxStage::PROGRESSION {
            let reached_at = self.booked_at + ChronoDuration::milliseconds((total_ms * fraction) as i64);
            if reached_at > now {
                break;
            }
            if self.scans.iter().any(|s| s.stage == stage) {
                continue;
            }
            let location = self.location_for(stage);
            self.scans.push(Scan { stage, at: reached_at, location });
        }
    }

    fn stage(&self) -> SandboxStage {
        self.scans.last().map(|s| s.stage).unwrap_or(SandboxStage::Booked)
    }

    fn view(&self) -> ParcelView {
        ParcelView {
            carrier: self.carrier.clone(),
            tracking_number: self.tracking_number.clone(),
            service_type: self.service_type.clone(),
            stage: self.stage(),
            booked_at: self.booked_at,
            estimated_delivery: self.booked_at + self.transit,
            scans: self.scans.clone(),
        }
    }
}

#[derive(Default)]
struct LedgerState {
    parcels: HashMap<String, Parcel>,
    faults: HashMap<String, VecDeque<Fault>>,
    calls: HashMap<String, usize>,
}

/// In-process stand-in for the carriers' own systems.
///
/// Issues tracking numbers, keeps carrier-side parcel state and moves it
/// along as transit time elapses. Tests queue faults or force a stage.
pub struct SandboxLedger {
    state: Mutex<LedgerState>,
    /// Wall-clock length of one transit day
    day_length: Duration,
    latency: Duration,
}

impl Default for SandboxLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            day_length: Duration::from_secs(86_400),
            latency: Duration::ZERO,
        }
    }

    /// Compress transit time, e.g. one minute per day for a demo deployment
    pub fn with_day_length(mut self, day_length: Duration) -> Self {
        if !day_length.is_zero() {
            self.day_length = day_length;
        }
        self
    }

    /// Fixed delay added to every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Entry point of every carrier call: counts it and applies any queued fault.
    pub async fn gate(&self, carrier: &str) -> Result<GateVerdict, SandboxError> {
        let fault = {
            let mut state = self.state.lock().await;
            *state.calls.entry(carrier.to_string()).or_insert(0) += 1;
            state.faults.get_mut(carrier).and_then(|queue| queue.pop_front())
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match fault {
            None => Ok(GateVerdict::Proceed),
            Some(Fault::Delay(pause)) => {
                debug!(carrier, ?pause, "sandbox delaying call");
                tokio::time::sleep(pause).await;
                Ok(GateVerdict::Proceed)
            }
            Some(Fault::Reject(reason)) => Ok(GateVerdict::Reject(reason)),
            Some(Fault::Transport(reason)) => Err(SandboxError::Unreachable {
                carrier: carrier.to_string(),
                reason,
            }),
        }
    }

    pub async fn inject_fault(&self, carrier: &str, fault: Fault) {
        let mut state = self.state.lock().await;
        state.faults.entry(carrier.to_string()).or_default().push_back(fault);
    }

    pub async fn call_count(&self, carrier: &str) -> usize {
        let state = self.state.lock().await;
        state.calls.get(carrier).copied().unwrap_or(0)
    }

    /// Book a parcel and issue a fresh tracking number of `digits` digits.
    pub async fn book(
        &self,
        carrier: &str,
        digits: usize,
        service_type: &str,
        transit_days: i64,
        destination_city: &str,
    ) -> ParcelView {
        let now = Utc::now();
        let transit = ChronoDuration::from_std(self.day_length * transit_days.max(1) as u32)
            .unwrap_or_else(|_| ChronoDuration::days(transit_days.max(1)));

        let mut state = self.state.lock().await;
        let tracking_number = loop {
            let candidate = random_digits(digits);
            if !state.parcels.contains_key(&candidate) {
                break candidate;
            }
        };

        let mut parcel = Parcel {
            carrier: carrier.to_string(),
            tracking_number: tracking_number.clone(),
            service_type: service_type.to_string(),
            destination_city: destination_city.to_string(),
            booked_at: now,
            transit,
            scans: Vec::new(),
            frozen: false,
        };
        parcel.advance(now);
        let view = parcel.view();
        state.parcels.insert(tracking_number, parcel);
        view
    }

    pub async fn parcel(&self, tracking_number: &str) -> Option<ParcelView> {
        let mut state = self.state.lock().await;
        let parcel = state.parcels.get_mut(tracking_number)?;
        parcel.advance(Utc::now());
        Some(parcel.view())
    }

    /// Every parcel booked with `carrier`, oldest booking first
    pub async fn parcels(&self, carrier: &str) -> Vec<ParcelView> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let mut views: Vec<ParcelView> = state
            .parcels
            .values_mut()
            .filter(|p| p.carrier == carrier)
            .map(|p| {
                p.advance(now);
                p.view()
            })
            .collect();
        views.sort_by_key(|v| v.booked_at);
        views
    }

    /// Cancel at the carrier. Repeating a cancellation is harmless.
    pub async fn cancel(&self, tracking_number: &str) -> CancelOutcome {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let Some(parcel) = state.parcels.get_mut(tracking_number) else {
            return CancelOutcome::UnknownParcel;
        };
        parcel.advance(now);
        match parcel.stage() {
            SandboxStage::Cancelled => CancelOutcome::AlreadyCancelled,
            stage @ (SandboxStage::Delivered | SandboxStage::Returned) => CancelOutcome::TooLate(stage),
            _ => {
                let location = parcel.location_for(SandboxStage::Cancelled);
                parcel.scans.push(Scan { stage: SandboxStage::Cancelled, at: now, location });
                parcel.frozen = true;
                CancelOutcome::Cancelled
            }
        }
    }

    /// Put a parcel into `stage` now and stop its automatic progression.
    pub async fn force_stage(&self, tracking_number: &str, stage: SandboxStage) -> Option<ParcelView> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let parcel = state.parcels.get_mut(tracking_number)?;
        parcel.advance(now);
        let location = parcel.location_for(stage);
        parcel.scans.push(Scan { stage, at: now, location });
        parcel.frozen = true;
        Some(parcel.view())
    }
}

fn random_digits(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(len);
    // no leading zero
    out.push(char::from(b'0' + rng.gen_range(1..=9u8)));
    for _ in 1..len {
        out.push(char::from(b'0' + rng.gen_range(0..=9u8)));
    }
    out
}

/// Per-carrier vocabulary used to render sandbox state as a carrier response
pub(crate) struct Vocabulary {
    pub native_code: fn(SandboxStage) -> &'static str,
    pub map_status: fn(&str) -> ShipmentStatus,
    pub tracking_url: fn(&str) -> String,
}

pub(crate) fn tracking_response(view: &ParcelView, vocab: &Vocabulary) -> CarrierResponse {
    let history: Vec<CarrierCheckpoint> = view
        .scans
        .iter()
        .map(|scan| {
            let code = (vocab.native_code)(scan.stage);
            CarrierCheckpoint {
                status: (vocab.map_status)(code),
                native_code: code.to_string(),
                location: Some(scan.location.clone()),
                timestamp: scan.at,
                description: describe(scan.stage).to_string(),
            }
        })
        .collect();

    let latest = history.last().cloned();
    CarrierResponse {
        success: true,
        tracking_number: Some(view.tracking_number.clone()),
        tracking_url: Some((vocab.tracking_url)(&view.tracking_number)),
        estimated_delivery: Some(view.estimated_delivery),
        status: latest.as_ref().map(|c| c.status),
        location: latest.as_ref().and_then(|c| c.location.clone()),
        status_at: latest.as_ref().map(|c| c.timestamp),
        carrier_response: json!({
            "tracking_number": view.tracking_number,
            "service_type": view.service_type,
            "code": latest.as_ref().map(|c| c.native_code.clone()),
            "scans": view.scans,
        }),
        history,
        error: None,
    }
}

fn describe(stage: SandboxStage) -> &'static str {
    match stage {
        SandboxStage::Booked => "Shipment information received",
        SandboxStage::PickedUp => "Picked up from shipper",
        SandboxStage::InTransit => "In transit to destination",
        SandboxStage::OutForDelivery => "Out for delivery",
        SandboxStage::Delivered => "Delivered",
        SandboxStage::Undelivered => "Delivery attempted, consignee unavailable",
        SandboxStage::Returned => "Returned to shipper",
        SandboxStage::Cancelled => "Shipment cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_book_issues_unique_numbers_of_requested_length() {
        let ledger = SandboxLedger::new();
        let a = ledger.book("dhl", 10, "express_worldwide", 3, "Berlin").await;
        let b = ledger.book("dhl", 10, "express_worldwide", 3, "Berlin").await;

        assert_eq!(a.tracking_number.len(), 10);
        assert!(a.tracking_number.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(a.tracking_number, b.tracking_number);
        assert_eq!(a.stage, SandboxStage::Booked);
    }

    #[tokio::test]
    async fn test_parcel_advances_with_elapsed_time() {
        let ledger = SandboxLedger::new().with_day_length(Duration::from_millis(40));
        let parcel = ledger.book("fedex", 12, "ground", 1, "Austin").await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        let view = ledger.parcel(&parcel.tracking_number).await.unwrap();
        assert_eq!(view.stage, SandboxStage::Delivered);
        let stages: Vec<_> = view.scans.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![
                SandboxStage::Booked,
                SandboxStage::PickedUp,
                SandboxStage::InTransit,
                SandboxStage::OutForDelivery,
                SandboxStage::Delivered
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_refused_after_delivery() {
        let ledger = SandboxLedger::new();
        let parcel = ledger.book("blue_dart", 11, "express", 2, "Pune").await;

        assert_eq!(ledger.cancel(&parcel.tracking_number).await, CancelOutcome::Cancelled);
        assert_eq!(ledger.cancel(&parcel.tracking_number).await, CancelOutcome::AlreadyCancelled);
        assert_eq!(ledger.cancel("00000000000").await, CancelOutcome::UnknownParcel);

        let delivered = ledger.book("blue_dart", 11, "express", 2, "Pune").await;
        ledger.force_stage(&delivered.tracking_number, SandboxStage::Delivered).await;
        assert_eq!(
            ledger.cancel(&delivered.tracking_number).await,
            CancelOutcome::TooLate(SandboxStage::Delivered)
        );
    }

    #[tokio::test]
    async fn test_faults_apply_once_in_order() {
        let ledger = SandboxLedger::new();
        ledger.inject_fault("fedex", Fault::Reject("address not serviceable".into())).await;
        ledger.inject_fault("fedex", Fault::Transport("connection reset".into())).await;

        assert_eq!(
            ledger.gate("fedex").await.unwrap(),
            GateVerdict::Reject("address not serviceable".into())
        );
        assert!(ledger.gate("fedex").await.is_err());
        assert_eq!(ledger.gate("fedex").await.unwrap(), GateVerdict::Proceed);
        // other carriers are unaffected
        assert_eq!(ledger.gate("dhl").await.unwrap(), GateVerdict::Proceed);
        assert_eq!(ledger.call_count("fedex").await, 3);
    }
}
