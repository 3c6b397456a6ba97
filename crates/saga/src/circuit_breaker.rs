//! Circuit breaker guarding calls to a flaky dependency.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through; consecutive failures are counted.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// A single trial call is in flight.
    HalfOpen,
}

impl CircuitState {
    fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker tunables.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a trial call.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The breaker rejected the call without running it.
    #[error("circuit {0} is open")]
    Open(String),

    /// The call ran and failed.
    #[error(transparent)]
    Inner(E),
}

/// What `admit` decided for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Pass,
    Trial,
    Reject,
}

/// Hands the trial slot back if the trial future is dropped unfinished.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.on_abandoned_trial();
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker.
///
/// `Closed → Open` after `failure_threshold` consecutive failures. While open,
/// calls are rejected until `cooldown` elapses; the next call then runs as the
/// only trial (`HalfOpen`). Success closes the breaker, failure reopens it.
/// A trial dropped before it finishes returns the breaker to `Open` with its
/// cooldown already spent, so the next call becomes the trial.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Returns the current state, without advancing an expired cooldown.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Runs `operation` unless the breaker rejects it.
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let mut slot = match self.admit() {
            Admission::Reject => return Err(CircuitError::Open(self.name.clone())),
            admission => TrialSlot {
                breaker: self,
                armed: admission == Admission::Trial,
            },
        };

        let outcome = operation.await;
        slot.armed = false;
        match outcome {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Admission::Pass,
            CircuitState::HalfOpen => Admission::Reject,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.config.cooldown);
                if cooled_down {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    Admission::Trial
                } else {
                    Admission::Reject
                }
            }
        }
    }

    fn on_abandoned_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            // opened_at is left as is: the cooldown has already elapsed.
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if should_open {
            inner.opened_at = Some(Instant::now());
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        metrics::counter!(
            "circuit_breaker_transitions_total",
            "circuit" => self.name.clone(),
            "to" => to.as_str()
        )
        .increment(1);
        tracing::warn!(
            circuit = %self.name,
            %from,
            %to,
            failures = inner.consecutive_failures,
            "circuit breaker transition"
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown,
            },
        )
    }

    async fn ok() -> Result<u32, &'static str> {
        Ok(1)
    }

    async fn fail() -> Result<u32, &'static str> {
        Err("boom")
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(60));

        for _ in 0..2 {
            assert!(matches!(cb.call(fail()).await, Err(CircuitError::Inner(_))));
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        assert!(cb.call(fail()).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        // Short-circuits without running the operation.
        assert!(matches!(cb.call(ok()).await, Err(CircuitError::Open(_))));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(2, Duration::from_secs(60));
        assert!(cb.call(fail()).await.is_err());
        assert!(cb.call(ok()).await.is_ok());
        assert!(cb.call(fail()).await.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes() {
        let cb = breaker(1, Duration::from_millis(20));
        assert!(cb.call(fail()).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cb.call(ok()).await.ok(), Some(1));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(20));
        assert!(cb.call(fail()).await.is_err());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(cb.call(fail()).await, Err(CircuitError::Inner(_))));
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(cb.call(ok()).await, Err(CircuitError::Open(_))));
    }

    #[tokio::test]
    async fn test_half_open_admits_a_single_trial() {
        let cb = std::sync::Arc::new(breaker(1, Duration::from_millis(10)));
        assert!(cb.call(fail()).await.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (release, wait) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.call(async move {
                    let _ = wait.await;
                    Ok::<_, &'static str>(7)
                })
                .await
                .ok()
            })
        };

        while cb.state() != CircuitState::HalfOpen {
            tokio::task::yield_now().await;
        }
        assert!(matches!(cb.call(ok()).await, Err(CircuitError::Open(_))));

        release.send(()).unwrap();
        assert_eq!(trial.await.unwrap(), Some(7));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_trial_frees_the_slot() {
        let cb = breaker(1, Duration::from_millis(10));
        assert!(cb.call(fail()).await.is_err());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let hung = cb.call(async {
            std::future::pending::<()>().await;
            Ok::<_, &'static str>(0)
        });
        assert!(
            tokio::time::timeout(Duration::from_millis(20), hung)
                .await
                .is_err()
        );
        assert_eq!(cb.state(), CircuitState::Open);

        assert_eq!(cb.call(ok()).await.ok(), Some(1));
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
