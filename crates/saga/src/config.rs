//! Saga tunables.

use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;

/// Tunables for the checkout saga and its collaborators.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Bound on a single payment service call; a timeout counts as unavailable.
    pub payment_timeout: Duration,

    /// Retry policy for payment calls that fail as unavailable.
    pub payment_retry: RetryPolicy,

    /// Maximum wall-clock time a checkout may spend retrying before it gives
    /// up and compensates.
    pub deadline: Duration,

    /// Retry policy for cancelling an unconfirmed authorization after its
    /// order has already failed.
    pub void_retry: RetryPolicy,

    /// Retry policy for the background publish queue.
    pub publish_retry: RetryPolicy,

    /// Circuit breaker guarding the notifier.
    pub notification_breaker: CircuitBreakerConfig,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            payment_timeout: Duration::from_secs(2),
            payment_retry: RetryPolicy::bounded(3),
            deadline: Duration::from_secs(10),
            void_retry: RetryPolicy::unbounded(Duration::from_secs(1), Duration::from_secs(60)),
            publish_retry: RetryPolicy::unbounded(
                Duration::from_millis(200),
                Duration::from_secs(30),
            ),
            notification_breaker: CircuitBreakerConfig::default(),
        }
    }
}
