//! Best-effort notifications behind a circuit breaker.

use common::TenantId;
use tracing::{debug, warn};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState};
use crate::services::{NotificationEvent, Notifier};

/// Wraps a notifier so that calling it can never fail.
///
/// Failures and calls short-circuited by an open breaker are logged and
/// counted in `notifications_total{outcome}`.
pub struct NotificationSidecar<N> {
    notifier: N,
    breaker: CircuitBreaker,
}

impl<N: Notifier> NotificationSidecar<N> {
    pub fn new(notifier: N, config: CircuitBreakerConfig) -> Self {
        Self {
            notifier,
            breaker: CircuitBreaker::new("notification", config),
        }
    }

    /// Returns the wrapped notifier.
    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Returns the breaker state.
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Sends the notification if the breaker allows it.
    pub async fn notify(&self, tenant: &TenantId, event: &NotificationEvent) {
        let outcome = match self.breaker.call(self.notifier.notify(tenant, event)).await {
            Ok(()) => "sent",
            Err(CircuitError::Open(circuit)) => {
                debug!(%circuit, order_id = %event.order_id, "Notification skipped, circuit open");
                "short_circuited"
            }
            Err(CircuitError::Inner(e)) => {
                warn!(order_id = %event.order_id, error = %e, "Notification failed");
                "failed"
            }
        };
        metrics::counter!("notifications_total", "outcome" => outcome).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryNotifier;
    use common::AggregateId;
    use market_domain::{BuyerId, Money};
    use std::time::Duration;

    fn event() -> NotificationEvent {
        NotificationEvent {
            order_id: AggregateId::new(),
            buyer_id: BuyerId::new(),
            total_amount: Money::from_cents(500),
            message: "Order confirmed".to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits_calls() {
        let notifier = InMemoryNotifier::new();
        notifier.set_failing(true);
        let sidecar = NotificationSidecar::new(
            notifier.clone(),
            CircuitBreakerConfig {
                failure_threshold: 2,
                cooldown: Duration::from_secs(60),
            },
        );
        let tenant = TenantId::new("engineering");

        for _ in 0..5 {
            sidecar.notify(&tenant, &event()).await;
        }

        assert_eq!(notifier.calls(), 2);
        assert_eq!(sidecar.breaker_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_breaker_closes_after_successful_trial() {
        let notifier = InMemoryNotifier::new();
        notifier.set_failing(true);
        let sidecar = NotificationSidecar::new(
            notifier.clone(),
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(20),
            },
        );
        let tenant = TenantId::new("engineering");

        sidecar.notify(&tenant, &event()).await;
        assert_eq!(sidecar.breaker_state(), CircuitState::Open);

        notifier.set_failing(false);
        tokio::time::sleep(Duration::from_millis(40)).await;
        sidecar.notify(&tenant, &event()).await;

        assert_eq!(sidecar.breaker_state(), CircuitState::Closed);
        assert_eq!(notifier.sent().len(), 1);
    }
}
