//! Tenant-scoped notifier boundary.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::{AggregateId, TenantId};
use market_domain::{BuyerId, Money, Order};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TENANT_HEADER: &str = "X-Tenant-Id";

/// Something worth telling a buyer about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub order_id: AggregateId,
    pub buyer_id: BuyerId,
    pub total_amount: Money,
    pub message: String,
}

impl NotificationEvent {
    /// Notification for a confirmed order.
    pub fn order_confirmed(order_id: AggregateId, order: &Order) -> Option<Self> {
        Some(Self {
            order_id,
            buyer_id: order.buyer_id()?,
            total_amount: order.total_amount(),
            message: format!("Order {order_id} confirmed for {}", order.total_amount()),
        })
    }
}

/// Notifier failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("notifier answered {status}")]
    Rejected { status: u16 },

    #[error("notifier unreachable: {0}")]
    Transport(String),
}

/// The external notifier. Fallible; callers go through the sidecar.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, tenant: &TenantId, event: &NotificationEvent)
    -> Result<(), NotifyError>;
}

#[async_trait]
impl<T: Notifier + ?Sized> Notifier for Arc<T> {
    async fn notify(
        &self,
        tenant: &TenantId,
        event: &NotificationEvent,
    ) -> Result<(), NotifyError> {
        (**self).notify(tenant, event).await
    }
}

/// Notification service reached over HTTP at
/// `POST {base}/notification/notify/market/{orderId}`.
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpNotifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(2),
        }
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(
        &self,
        tenant: &TenantId,
        event: &NotificationEvent,
    ) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(format!(
                "{}/notification/notify/market/{}",
                self.base_url, event.order_id
            ))
            .header(TENANT_HEADER, tenant.as_str())
            .timeout(self.timeout)
            .json(event)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

#[derive(Debug, Default)]
struct NotifierState {
    sent: Vec<(TenantId, NotificationEvent)>,
    calls: usize,
    failing: bool,
}

/// Recording notifier that can be switched into failure.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<Mutex<NotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Notifications delivered so far.
    pub fn sent(&self) -> Vec<(TenantId, NotificationEvent)> {
        self.lock().sent.clone()
    }

    /// Calls received, including failed ones.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, NotifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(
        &self,
        tenant: &TenantId,
        event: &NotificationEvent,
    ) -> Result<(), NotifyError> {
        let mut state = self.lock();
        state.calls += 1;
        if state.failing {
            return Err(NotifyError::Rejected { status: 503 });
        }
        state.sent.push((tenant.clone(), event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::HeaderMap, http::StatusCode, routing::post};

    fn event() -> NotificationEvent {
        NotificationEvent {
            order_id: AggregateId::new(),
            buyer_id: BuyerId::new(),
            total_amount: Money::from_cents(999),
            message: "Order confirmed".to_string(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_notifier_records_and_fails_on_demand() {
        let notifier = InMemoryNotifier::new();
        let tenant = TenantId::new("engineering");

        notifier.notify(&tenant, &event()).await.unwrap();
        notifier.set_failing(true);
        assert!(notifier.notify(&tenant, &event()).await.is_err());

        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(notifier.calls(), 2);
    }

    #[tokio::test]
    async fn test_http_notifier_posts_to_market_path() {
        let router = Router::new().route(
            "/notification/notify/market/{order_id}",
            post(|headers: HeaderMap| async move {
                if headers.get("x-tenant-id").is_some() {
                    StatusCode::ACCEPTED
                } else {
                    StatusCode::UNAUTHORIZED
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let notifier = HttpNotifier::new(format!("http://{addr}/"));
        notifier
            .notify(&TenantId::new("engineering"), &event())
            .await
            .unwrap();

        let unreachable = HttpNotifier::new("http://127.0.0.1:1");
        assert!(matches!(
            unreachable.notify(&TenantId::new("engineering"), &event()).await,
            Err(NotifyError::Transport(_))
        ));
    }
}
