//! Scriptable in-memory payment service.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::{AggregateId, TenantId};

use super::{AuthorizeRequest, PaymentError, PaymentGateway, PaymentRecord, PaymentStatus};

/// How the next authorize call behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentBehavior {
    /// Authorize the payment.
    Approve,
    /// Reject the payment.
    Decline(String),
    /// Fail as if the service were down.
    Unavailable(String),
    /// Sleep, then authorize. Callers with a shorter timeout give up first,
    /// leaving an authorization on the service side.
    Hang(Duration),
}

/// How the next cancel call behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelBehavior {
    Succeed,
    Unavailable(String),
}

#[derive(Debug)]
struct State {
    default_behavior: PaymentBehavior,
    scripted: VecDeque<PaymentBehavior>,
    scripted_cancels: VecDeque<CancelBehavior>,
    records: HashMap<AggregateId, PaymentRecord>,
    authorize_calls: usize,
    cancel_calls: usize,
    next_id: u32,
}

/// Deterministic payment service double.
///
/// Calls consume scripted behaviors first and fall back to the default
/// (approve unless changed). Records are keyed by order ID.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentGateway {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryPaymentGateway {
    fn default() -> Self {
        Self::with_default(PaymentBehavior::Approve)
    }
}

impl InMemoryPaymentGateway {
    /// Creates a gateway that approves every payment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a gateway with the given fallback behavior.
    pub fn with_default(behavior: PaymentBehavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                default_behavior: behavior,
                scripted: VecDeque::new(),
                scripted_cancels: VecDeque::new(),
                records: HashMap::new(),
                authorize_calls: 0,
                cancel_calls: 0,
                next_id: 0,
            })),
        }
    }

    /// Changes the fallback behavior.
    pub fn set_default(&self, behavior: PaymentBehavior) {
        self.lock().default_behavior = behavior;
    }

    /// Queues behaviors for the next authorize calls.
    pub fn script(&self, behaviors: impl IntoIterator<Item = PaymentBehavior>) {
        self.lock().scripted.extend(behaviors);
    }

    /// Queues behaviors for the next cancel calls.
    pub fn script_cancels(&self, behaviors: impl IntoIterator<Item = CancelBehavior>) {
        self.lock().scripted_cancels.extend(behaviors);
    }

    /// Returns the record held for an order.
    pub fn record(&self, order_id: AggregateId) -> Option<PaymentRecord> {
        self.lock().records.get(&order_id).cloned()
    }

    /// Returns how many records are currently `AUTHORIZED`.
    pub fn authorized_count(&self) -> usize {
        self.lock()
            .records
            .values()
            .filter(|r| r.status == PaymentStatus::Authorized)
            .count()
    }

    /// Number of authorize calls received.
    pub fn authorize_calls(&self) -> usize {
        self.lock().authorize_calls
    }

    /// Number of cancel calls received.
    pub fn cancel_calls(&self) -> usize {
        self.lock().cancel_calls
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn approve(&self, request: &AuthorizeRequest) -> PaymentRecord {
        let mut state = self.lock();
        if let Some(existing) = state.records.get(&request.order_id)
            && existing.status == PaymentStatus::Authorized
        {
            return existing.clone();
        }

        state.next_id += 1;
        let record = PaymentRecord {
            id: format!("PAY-{:04}", state.next_id),
            order_id: request.order_id,
            buyer_id: request.buyer_id,
            amount: request.amount,
            status: PaymentStatus::Authorized,
            provider_reference: format!("SIMULATED-{}", request.order_id),
        };
        state.records.insert(request.order_id, record.clone());
        record
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn authorize(&self, request: &AuthorizeRequest) -> Result<PaymentRecord, PaymentError> {
        let behavior = {
            let mut state = self.lock();
            state.authorize_calls += 1;
            if let Some(existing) = state.records.get(&request.order_id)
                && existing.status == PaymentStatus::Authorized
            {
                return Ok(existing.clone());
            }
            let fallback = state.default_behavior.clone();
            state.scripted.pop_front().unwrap_or(fallback)
        };

        match behavior {
            PaymentBehavior::Approve => Ok(self.approve(request)),
            PaymentBehavior::Decline(reason) => {
                let mut state = self.lock();
                state.next_id += 1;
                let record = PaymentRecord {
                    id: format!("PAY-{:04}", state.next_id),
                    order_id: request.order_id,
                    buyer_id: request.buyer_id,
                    amount: request.amount,
                    status: PaymentStatus::Declined,
                    provider_reference: String::new(),
                };
                state.records.insert(request.order_id, record);
                Err(PaymentError::Declined { reason })
            }
            PaymentBehavior::Unavailable(reason) => Err(PaymentError::Unavailable { reason }),
            PaymentBehavior::Hang(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.approve(request))
            }
        }
    }

    async fn cancel(&self, _tenant: &TenantId, order_id: AggregateId) -> Result<(), PaymentError> {
        let mut state = self.lock();
        state.cancel_calls += 1;
        if let Some(CancelBehavior::Unavailable(reason)) = state.scripted_cancels.pop_front() {
            return Err(PaymentError::Unavailable { reason });
        }
        if let Some(record) = state.records.get_mut(&order_id)
            && record.status == PaymentStatus::Authorized
        {
            record.status = PaymentStatus::Cancelled;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_domain::{BuyerId, Money};

    fn request() -> AuthorizeRequest {
        AuthorizeRequest {
            tenant_id: TenantId::new("engineering"),
            order_id: AggregateId::new(),
            buyer_id: BuyerId::new(),
            amount: Money::from_cents(2500),
        }
    }

    #[tokio::test]
    async fn test_authorize_is_idempotent_per_order() {
        let gateway = InMemoryPaymentGateway::new();
        let req = request();

        let first = gateway.authorize(&req).await.unwrap();
        let second = gateway.authorize(&req).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(gateway.authorized_count(), 1);
        assert_eq!(gateway.authorize_calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_behaviors_run_in_order() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.script([
            PaymentBehavior::Unavailable("down".to_string()),
            PaymentBehavior::Decline("no funds".to_string()),
        ]);

        assert!(matches!(
            gateway.authorize(&request()).await,
            Err(PaymentError::Unavailable { .. })
        ));
        let declined = request();
        assert!(matches!(
            gateway.authorize(&declined).await,
            Err(PaymentError::Declined { .. })
        ));
        assert_eq!(
            gateway.record(declined.order_id).map(|r| r.status),
            Some(PaymentStatus::Declined)
        );
        assert!(gateway.authorize(&request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let gateway = InMemoryPaymentGateway::new();
        let req = request();
        gateway.authorize(&req).await.unwrap();

        gateway.cancel(&req.tenant_id, req.order_id).await.unwrap();
        gateway.cancel(&req.tenant_id, req.order_id).await.unwrap();

        assert_eq!(
            gateway.record(req.order_id).map(|r| r.status),
            Some(PaymentStatus::Cancelled)
        );
        assert_eq!(gateway.authorized_count(), 0);
    }

    #[tokio::test]
    async fn test_scripted_cancel_failure() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.script_cancels([CancelBehavior::Unavailable("down".to_string())]);
        let tenant = TenantId::new("engineering");

        assert!(gateway.cancel(&tenant, AggregateId::new()).await.is_err());
        assert!(gateway.cancel(&tenant, AggregateId::new()).await.is_ok());
    }
}
