//! Payment service boundary.

mod http;
mod memory;

pub use http::HttpPaymentGateway;
pub use memory::{CancelBehavior, InMemoryPaymentGateway, PaymentBehavior};

use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, TenantId};
use market_domain::{BuyerId, Money};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status of a payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Authorized,
    Cancelled,
    Declined,
}

/// A payment authorization as recorded by the payment service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Payment ID on the payment service.
    pub id: String,

    /// The order this payment authorizes; at most one active per order.
    pub order_id: AggregateId,

    /// The payer.
    pub buyer_id: BuyerId,

    /// Authorized amount.
    pub amount: Money,

    /// Current status.
    pub status: PaymentStatus,

    /// Provider-side reference.
    pub provider_reference: String,
}

/// Authorization request; `order_id` is the idempotency key.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub tenant_id: TenantId,
    pub order_id: AggregateId,
    pub buyer_id: BuyerId,
    pub amount: Money,
}

/// Payment failures.
///
/// Only `Unavailable` is worth retrying; `Declined` is a final answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// The payment service explicitly rejected the request.
    #[error("payment declined: {reason}")]
    Declined { reason: String },

    /// Timeout, connection failure or a server-side error.
    #[error("payment service unavailable: {reason}")]
    Unavailable { reason: String },
}

impl PaymentError {
    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        PaymentError::Unavailable {
            reason: reason.into(),
        }
    }
}

/// The remote payment service.
///
/// Both operations are keyed by order ID: authorizing an order that already
/// holds an authorization returns that record, and cancelling an order with
/// nothing to cancel succeeds.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Requests an authorization for the full order amount.
    async fn authorize(&self, request: &AuthorizeRequest) -> Result<PaymentRecord, PaymentError>;

    /// Cancels the authorization held for the order.
    async fn cancel(&self, tenant: &TenantId, order_id: AggregateId) -> Result<(), PaymentError>;
}

#[async_trait]
impl<T: PaymentGateway + ?Sized> PaymentGateway for Arc<T> {
    async fn authorize(&self, request: &AuthorizeRequest) -> Result<PaymentRecord, PaymentError> {
        (**self).authorize(request).await
    }

    async fn cancel(&self, tenant: &TenantId, order_id: AggregateId) -> Result<(), PaymentError> {
        (**self).cancel(tenant, order_id).await
    }
}
