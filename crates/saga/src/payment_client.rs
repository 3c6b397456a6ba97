//! Timeout, retry and local bookkeeping around a payment gateway.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::{AggregateId, TenantId};
use tokio::time::Instant;
use tracing::warn;

use crate::config::SagaConfig;
use crate::retry::RetryPolicy;
use crate::services::{AuthorizeRequest, PaymentError, PaymentGateway, PaymentRecord, PaymentStatus};

/// What this process last learned about an order's payment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Mirrored {
    Authorized(PaymentRecord),
    Declined(String),
    Cancelled,
}

/// Payment gateway client used by the saga.
///
/// Every call is bounded by the configured timeout, and a timeout counts as
/// unavailability. Unavailable calls are retried with backoff until the
/// policy or the caller's deadline runs out; declines are never retried.
/// Outcomes are mirrored locally, so a retried authorize returns the known
/// record and cancelling a payment known to be cancelled or declined does
/// not reach the gateway.
pub struct PaymentClient<G> {
    gateway: G,
    timeout: Duration,
    retry: RetryPolicy,
    mirror: Mutex<HashMap<AggregateId, Mirrored>>,
}

impl<G: PaymentGateway> PaymentClient<G> {
    /// Creates a client with the saga's payment settings.
    pub fn new(gateway: G, config: &SagaConfig) -> Self {
        Self {
            gateway,
            timeout: config.payment_timeout,
            retry: config.payment_retry.clone(),
            mirror: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the wrapped gateway.
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Returns the locally known status of an order's payment.
    pub fn known_status(&self, order_id: AggregateId) -> Option<PaymentStatus> {
        self.lock().get(&order_id).map(|m| match m {
            Mirrored::Authorized(_) => PaymentStatus::Authorized,
            Mirrored::Declined(_) => PaymentStatus::Declined,
            Mirrored::Cancelled => PaymentStatus::Cancelled,
        })
    }

    /// Drops the local record of a finished order.
    pub fn forget(&self, order_id: AggregateId) {
        self.lock().remove(&order_id);
    }

    /// Authorizes the full order amount, giving up at `deadline`.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    pub async fn authorize(
        &self,
        request: &AuthorizeRequest,
        deadline: Instant,
    ) -> Result<PaymentRecord, PaymentError> {
        match self.lock().get(&request.order_id) {
            Some(Mirrored::Authorized(record)) => return Ok(record.clone()),
            Some(Mirrored::Declined(reason)) => {
                return Err(PaymentError::Declined {
                    reason: reason.clone(),
                });
            }
            _ => {}
        }

        let gateway = &self.gateway;
        let outcome = self
            .with_retry("authorize", deadline, move || gateway.authorize(request))
            .await;

        match &outcome {
            Ok(record) => self.remember(request.order_id, Mirrored::Authorized(record.clone())),
            Err(PaymentError::Declined { reason }) => {
                self.remember(request.order_id, Mirrored::Declined(reason.clone()))
            }
            Err(PaymentError::Unavailable { .. }) => {}
        }
        outcome
    }

    /// Cancels the order's authorization, giving up at `deadline`.
    ///
    /// Succeeds without a remote call when the payment is known to be
    /// cancelled or declined.
    #[tracing::instrument(skip(self, tenant))]
    pub async fn cancel(
        &self,
        tenant: &TenantId,
        order_id: AggregateId,
        deadline: Instant,
    ) -> Result<(), PaymentError> {
        if matches!(
            self.lock().get(&order_id),
            Some(Mirrored::Cancelled | Mirrored::Declined(_))
        ) {
            return Ok(());
        }

        let gateway = &self.gateway;
        self.with_retry("cancel", deadline, move || gateway.cancel(tenant, order_id))
            .await?;
        self.remember(order_id, Mirrored::Cancelled);
        Ok(())
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        deadline: Instant,
        mut call: F,
    ) -> Result<T, PaymentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PaymentError>>,
    {
        let mut attempts = 0u32;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PaymentError::unavailable(format!(
                    "{operation} abandoned: saga deadline exceeded"
                )));
            }

            attempts += 1;
            metrics::counter!("payment_call_attempts_total", "operation" => operation)
                .increment(1);

            let limit = self.timeout.min(remaining);
            let error = match tokio::time::timeout(limit, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err @ PaymentError::Declined { .. })) => return Err(err),
                Ok(Err(err)) => err,
                Err(_) => PaymentError::unavailable(format!(
                    "{operation} timed out after {}ms",
                    limit.as_millis()
                )),
            };

            if !self.retry.can_retry(attempts) {
                return Err(error);
            }
            let delay = self.retry.delay_for(attempts - 1);
            if Instant::now() + delay >= deadline {
                return Err(error);
            }

            warn!(operation, attempts, delay_ms = delay.as_millis() as u64, error = %error, "Retrying payment call");
            tokio::time::sleep(delay).await;
        }
    }

    fn remember(&self, order_id: AggregateId, state: Mirrored) {
        self.lock().insert(order_id, state);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AggregateId, Mirrored>> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{CancelBehavior, InMemoryPaymentGateway, PaymentBehavior};
    use market_domain::{BuyerId, Money};

    fn config(attempts: u32) -> SagaConfig {
        SagaConfig {
            payment_timeout: Duration::from_millis(50),
            payment_retry: RetryPolicy::immediate(attempts),
            ..SagaConfig::default()
        }
    }

    fn request() -> AuthorizeRequest {
        AuthorizeRequest {
            tenant_id: TenantId::new("engineering"),
            order_id: AggregateId::new(),
            buyer_id: BuyerId::new(),
            amount: Money::from_cents(4200),
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_unavailable_is_retried_until_success() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.script([
            PaymentBehavior::Unavailable("503".to_string()),
            PaymentBehavior::Unavailable("503".to_string()),
        ]);
        let client = PaymentClient::new(gateway.clone(), &config(3));

        let record = client.authorize(&request(), deadline()).await.unwrap();
        assert_eq!(record.status, PaymentStatus::Authorized);
        assert_eq!(gateway.authorize_calls(), 3);
    }

    #[tokio::test]
    async fn test_retries_stop_at_attempt_cap() {
        let gateway = InMemoryPaymentGateway::with_default(PaymentBehavior::Unavailable(
            "down".to_string(),
        ));
        let client = PaymentClient::new(gateway.clone(), &config(3));

        let err = client.authorize(&request(), deadline()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Unavailable { .. }));
        assert_eq!(gateway.authorize_calls(), 3);
    }

    #[tokio::test]
    async fn test_decline_is_not_retried() {
        let gateway =
            InMemoryPaymentGateway::with_default(PaymentBehavior::Decline("no funds".to_string()));
        let client = PaymentClient::new(gateway.clone(), &config(5));
        let req = request();

        assert!(matches!(
            client.authorize(&req, deadline()).await,
            Err(PaymentError::Declined { .. })
        ));
        assert_eq!(gateway.authorize_calls(), 1);
        assert_eq!(client.known_status(req.order_id), Some(PaymentStatus::Declined));

        client.cancel(&req.tenant_id, req.order_id, deadline()).await.unwrap();
        assert_eq!(gateway.cancel_calls(), 0);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_unavailable() {
        let gateway =
            InMemoryPaymentGateway::with_default(PaymentBehavior::Hang(Duration::from_millis(500)));
        let client = PaymentClient::new(gateway.clone(), &config(2));

        let err = client.authorize(&request(), deadline()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Unavailable { .. }));
        assert_eq!(gateway.authorize_calls(), 2);
    }

    #[tokio::test]
    async fn test_expired_deadline_makes_no_call() {
        let gateway = InMemoryPaymentGateway::new();
        let client = PaymentClient::new(gateway.clone(), &config(3));

        let err = client
            .authorize(&request(), Instant::now())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Unavailable { .. }));
        assert_eq!(gateway.authorize_calls(), 0);
    }

    #[tokio::test]
    async fn test_known_authorization_is_returned_without_a_call() {
        let gateway = InMemoryPaymentGateway::new();
        let client = PaymentClient::new(gateway.clone(), &config(3));
        let req = request();

        let first = client.authorize(&req, deadline()).await.unwrap();
        let second = client.authorize(&req, deadline()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(gateway.authorize_calls(), 1);
        assert_eq!(gateway.authorized_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_retries_and_is_idempotent() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.script_cancels([CancelBehavior::Unavailable("blip".to_string())]);
        let client = PaymentClient::new(gateway.clone(), &config(3));
        let req = request();
        client.authorize(&req, deadline()).await.unwrap();

        client.cancel(&req.tenant_id, req.order_id, deadline()).await.unwrap();
        client.cancel(&req.tenant_id, req.order_id, deadline()).await.unwrap();

        assert_eq!(gateway.cancel_calls(), 2);
        assert_eq!(client.known_status(req.order_id), Some(PaymentStatus::Cancelled));
        assert_eq!(
            gateway.record(req.order_id).map(|r| r.status),
            Some(PaymentStatus::Cancelled)
        );
    }
}
