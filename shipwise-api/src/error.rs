use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shipwise_core::{CarrierFailure, CoreError};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    AuthorizationError(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Core(err) => match err {
                CoreError::ValidationError(_) | CoreError::UnsupportedCarrier(_) => StatusCode::BAD_REQUEST,
                CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                CoreError::InvalidState(_) | CoreError::Conflict(_) => StatusCode::CONFLICT,
                CoreError::CarrierError { kind: CarrierFailure::Timeout, .. } => StatusCode::GATEWAY_TIMEOUT,
                CoreError::CarrierError { .. } => StatusCode::BAD_GATEWAY,
                CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            AppError::AuthorizationError(_) => StatusCode::FORBIDDEN,
            AppError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let (error_message, details) = match &self {
            AppError::Core(CoreError::ValidationError(violations)) => {
                ("Validation failed".to_string(), violations.clone())
            }
            _ if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!("Internal Server Error: {}", self);
                ("Internal Server Error".to_string(), Vec::new())
            }
            other => (other.to_string(), Vec::new()),
        };

        let body = Json(json!({
            "error": error_message,
            "details": details,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CoreError::ValidationError(vec!["x".into()]), StatusCode::BAD_REQUEST),
            (CoreError::not_found("Shipment", "s-1"), StatusCode::NOT_FOUND),
            (CoreError::UnsupportedCarrier("ups".into()), StatusCode::BAD_REQUEST),
            (CoreError::InvalidState("unpaid".into()), StatusCode::CONFLICT),
            (CoreError::Conflict("delivered".into()), StatusCode::CONFLICT),
            (
                CoreError::CarrierError {
                    carrier: "dhl".into(),
                    kind: CarrierFailure::Rejected,
                    message: "no".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                CoreError::CarrierError {
                    carrier: "dhl".into(),
                    kind: CarrierFailure::Timeout,
                    message: "slow".into(),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (CoreError::Storage("pool closed".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).into_response().status(), expected);
        }
    }
}
