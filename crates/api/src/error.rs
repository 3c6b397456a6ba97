//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout_saga::CheckoutError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Caller identity headers are missing.
    #[error("{0}")]
    Unauthorized(String),
    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),
    /// Checkout saga error.
    #[error(transparent)]
    Checkout(#[from] CheckoutError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Checkout(err) => checkout_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, String) {
    let status = match &err {
        CheckoutError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        CheckoutError::IdempotencyKeyReused { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CheckoutError::ProductNotFound { .. } | CheckoutError::OrderNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        CheckoutError::InsufficientStock { .. }
        | CheckoutError::SagaAlreadyTerminal { .. }
        | CheckoutError::CheckoutInProgress { .. } => StatusCode::CONFLICT,
        CheckoutError::PaymentDeclined { .. } => StatusCode::PAYMENT_REQUIRED,
        CheckoutError::PaymentUnavailable { .. } | CheckoutError::InventoryUnavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CheckoutError::Abandoned { .. }
        | CheckoutError::CompensationIncomplete { .. }
        | CheckoutError::Domain(_) => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_domain::ProductId;

    fn status_of(err: CheckoutError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_checkout_errors_map_to_statuses() {
        assert_eq!(
            status_of(CheckoutError::InvalidRequest("empty".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(CheckoutError::InsufficientStock {
                product_id: ProductId::new()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(CheckoutError::PaymentDeclined {
                reason: "no".to_string()
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(CheckoutError::PaymentUnavailable {
                reason: "down".to_string()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(CheckoutError::Abandoned {
                reason: "event log unreachable".to_string()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(CheckoutError::IdempotencyKeyReused {
                order_id: common::AggregateId::new()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_display_passes_through_the_saga_error() {
        let err = ApiError::from(CheckoutError::PaymentDeclined {
            reason: "no".to_string(),
        });
        assert_eq!(err.to_string(), "Payment declined: no");
        assert_eq!(ApiError::BadRequest("bad".to_string()).to_string(), "bad");
    }
}
