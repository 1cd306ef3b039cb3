pub mod carrier;
pub mod models;
pub mod notify;
pub mod repository;
pub mod request;
pub mod validation;

use std::fmt;

pub use carrier::{CarrierAdapter, CarrierResponse, ShippingRate};
pub use models::{Order, OrderStatus, PaymentStatus, Shipment, ShipmentStatus, TrackingEvent};
pub use notify::ShipmentEventSink;
pub use repository::{OrderRepository, ShipmentRepository, TrackingCache};

/// How a carrier call went wrong. The three cases are kept apart so callers
/// can tell a refusal from an outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierFailure {
    /// The carrier answered with `success: false`.
    Rejected,
    /// No answer within the configured call timeout.
    Timeout,
    /// Network or protocol failure before a business answer was produced.
    Transport,
}

impl fmt::Display for CarrierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CarrierFailure::Rejected => "rejected the request",
            CarrierFailure::Timeout => "timed out",
            CarrierFailure::Transport => "transport failure",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {}", .0.join("; "))]
    ValidationError(Vec<String>),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Unsupported carrier: {0}")]
    UnsupportedCarrier(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Carrier {carrier} {kind}: {message}")]
    CarrierError {
        carrier: String,
        kind: CarrierFailure,
        message: String,
    },
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn storage(err: impl fmt::Display) -> Self {
        CoreError::Storage(err.to_string())
    }

    /// Every violation, in the order it was detected. Empty for other variants.
    pub fn violations(&self) -> &[String] {
        match self {
            CoreError::ValidationError(v) => v,
            _ => &[],
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_lists_every_violation() {
        let err = CoreError::ValidationError(vec![
            "package weight must not exceed 30 kg".to_string(),
            "email is not a valid address".to_string(),
        ]);

        assert_eq!(err.violations().len(), 2);
        assert!(err.to_string().contains("30 kg; email"));
    }

    #[test]
    fn test_carrier_error_message() {
        let err = CoreError::CarrierError {
            carrier: "fedex".to_string(),
            kind: CarrierFailure::Timeout,
            message: "no answer after 5000 ms".to_string(),
        };
        assert_eq!(err.to_string(), "Carrier fedex timed out: no answer after 5000 ms");
    }
}
