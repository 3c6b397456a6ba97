//! Event bus boundary for confirmed orders.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, TenantId};
use market_domain::{Aggregate, BuyerId, Money, Order, OrderStatus, ProductId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Exchange shared by the campus services.
pub const EXCHANGE: &str = "university.events";

/// Routing key of the order-confirmed event.
pub const ORDER_CONFIRMED_ROUTING_KEY: &str = "market.order.confirmed";

/// One line of a confirmed order as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedItem {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Payload published when an order is confirmed.
///
/// Consumers deduplicate on `order_id`; delivery is at-least-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConfirmedMessage {
    pub order_id: AggregateId,
    pub tenant_id: TenantId,
    pub buyer_id: BuyerId,
    pub items: Vec<ConfirmedItem>,
    pub total_amount: Money,
    pub confirmed_at: DateTime<Utc>,
}

impl OrderConfirmedMessage {
    /// Builds the message for a confirmed order; None for any other status.
    pub fn from_order(order: &Order) -> Option<Self> {
        if order.status() != OrderStatus::Confirmed {
            return None;
        }
        Some(Self {
            order_id: order.id()?,
            tenant_id: order.tenant_id()?.clone(),
            buyer_id: order.buyer_id()?,
            items: order
                .items()
                .iter()
                .map(|line| ConfirmedItem {
                    product_id: line.product_id,
                    product_name: line.product_name.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
            total_amount: order.total_amount(),
            confirmed_at: order.updated_at().unwrap_or_else(Utc::now),
        })
    }
}

/// A message as handed to the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub payload: serde_json::Value,
}

impl Delivery {
    /// Decodes the payload of an order-confirmed delivery.
    pub fn order_confirmed(&self) -> Option<OrderConfirmedMessage> {
        if self.routing_key != ORDER_CONFIRMED_ROUTING_KEY {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Publishing failures. Both kinds are retried by the publish queue.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event bus unavailable: {0}")]
    Unavailable(String),
}

/// Publishes domain events to the shared bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `market.order.confirmed` for one order.
    async fn publish_order_confirmed(
        &self,
        message: &OrderConfirmedMessage,
    ) -> Result<(), PublishError>;
}

#[async_trait]
impl<T: EventPublisher + ?Sized> EventPublisher for Arc<T> {
    async fn publish_order_confirmed(
        &self,
        message: &OrderConfirmedMessage,
    ) -> Result<(), PublishError> {
        (**self).publish_order_confirmed(message).await
    }
}

#[derive(Debug, Default)]
struct BusState {
    deliveries: Vec<Delivery>,
    fail_next: usize,
}

/// In-process event bus.
///
/// Keeps every delivery and forwards it to broadcast subscribers. It can be
/// told to reject the next N publishes.
#[derive(Debug, Clone)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
    sender: broadcast::Sender<Delivery>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    /// Creates a bus with room for 1024 undelivered broadcast messages.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            sender,
        }
    }

    /// Subscribes to deliveries made from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.sender.subscribe()
    }

    /// Makes the next `count` publishes fail.
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// Returns every delivery so far.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.lock().deliveries.clone()
    }

    /// Returns the order-confirmed messages delivered so far.
    pub fn confirmed_orders(&self) -> Vec<OrderConfirmedMessage> {
        self.lock()
            .deliveries
            .iter()
            .filter_map(Delivery::order_confirmed)
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish_order_confirmed(
        &self,
        message: &OrderConfirmedMessage,
    ) -> Result<(), PublishError> {
        let delivery = Delivery {
            exchange: EXCHANGE.to_string(),
            routing_key: ORDER_CONFIRMED_ROUTING_KEY.to_string(),
            payload: serde_json::to_value(message)?,
        };

        {
            let mut state = self.lock();
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(PublishError::Unavailable("bus rejected publish".to_string()));
            }
            state.deliveries.push(delivery.clone());
        }

        // No subscribers is not a failure.
        let _ = self.sender.send(delivery);
        tracing::debug!(order_id = %message.order_id, "Published order confirmed");
        Ok(())
    }
}
