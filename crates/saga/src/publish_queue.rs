//! Background delivery of order-confirmed events.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::retry::RetryPolicy;
use crate::services::{EventPublisher, OrderConfirmedMessage, PublishError};

/// Hands confirmed orders to a worker task that publishes them.
///
/// Enqueueing never waits on the bus. The worker makes the first publish
/// attempt in arrival order; a message that fails gets its own retry task
/// with backoff, so a message the bus keeps rejecting never holds up the
/// ones behind it. Delivery is at-least-once with no ordering across orders.
/// When the retry policy is capped, a message that exhausts it is logged as
/// dead-lettered and dropped.
///
/// The worker stops once every handle to the queue is dropped, the remaining
/// messages are attempted and every retry task has finished.
#[derive(Debug, Clone)]
pub struct PublishQueue {
    sender: mpsc::UnboundedSender<OrderConfirmedMessage>,
    pending: Arc<AtomicUsize>,
}

impl PublishQueue {
    /// Starts the worker on the current runtime.
    pub fn spawn<P>(publisher: P, retry: RetryPolicy) -> (Self, JoinHandle<()>)
    where
        P: EventPublisher + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<OrderConfirmedMessage>();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = Arc::clone(&pending);

        let handle = tokio::spawn(async move {
            let publisher = Arc::new(publisher);
            let mut retries = JoinSet::new();

            loop {
                tokio::select! {
                    received = receiver.recv() => {
                        let Some(message) = received else { break };
                        match publish(publisher.as_ref(), &message).await {
                            Ok(()) => {
                                worker_pending.fetch_sub(1, Ordering::AcqRel);
                            }
                            Err(e) => {
                                let publisher = Arc::clone(&publisher);
                                let retry = retry.clone();
                                let pending = Arc::clone(&worker_pending);
                                retries.spawn(async move {
                                    redeliver(publisher.as_ref(), &retry, &message, e).await;
                                    pending.fetch_sub(1, Ordering::AcqRel);
                                });
                            }
                        }
                    }
                    Some(_) = retries.join_next(), if !retries.is_empty() => {}
                }
            }

            while retries.join_next().await.is_some() {}
            info!("Publish queue drained");
        });

        (Self { sender, pending }, handle)
    }

    /// Queues a message. Returns false if the worker has stopped.
    pub fn enqueue(&self, message: OrderConfirmedMessage) -> bool {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(message).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            error!("Publish queue worker is gone; event not queued");
            return false;
        }
        true
    }

    /// Messages queued or in delivery.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

async fn publish<P: EventPublisher>(
    publisher: &P,
    message: &OrderConfirmedMessage,
) -> Result<(), PublishError> {
    publisher.publish_order_confirmed(message).await?;
    metrics::counter!("order_events_published_total").increment(1);
    Ok(())
}

/// Retries a message whose first publish failed with `error`.
async fn redeliver<P: EventPublisher>(
    publisher: &P,
    retry: &RetryPolicy,
    message: &OrderConfirmedMessage,
    mut error: PublishError,
) {
    let mut attempts = 1u32;
    while retry.can_retry(attempts) {
        let delay = retry.delay_for(attempts - 1);
        metrics::counter!("order_event_publish_retries_total").increment(1);
        warn!(
            order_id = %message.order_id,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Publish failed, retrying"
        );
        tokio::time::sleep(delay).await;

        attempts += 1;
        match publish(publisher, message).await {
            Ok(()) => return,
            Err(e) => error = e,
        }
    }

    metrics::counter!("order_events_dead_lettered_total").increment(1);
    error!(
        order_id = %message.order_id,
        attempts,
        error = %error,
        payload = %serde_json::to_string(message).unwrap_or_default(),
        "Publish retries exhausted, dead-lettering event"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryEventBus;
    use chrono::Utc;
    use common::{AggregateId, TenantId};
    use market_domain::{BuyerId, Money};
    use std::time::Duration;

    fn message() -> OrderConfirmedMessage {
        OrderConfirmedMessage {
            order_id: AggregateId::new(),
            tenant_id: TenantId::new("engineering"),
            buyer_id: BuyerId::new(),
            items: vec![],
            total_amount: Money::from_cents(100),
            confirmed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_failed_publish_is_retried_until_delivered() {
        let bus = InMemoryEventBus::new();
        bus.fail_next(3);
        let (queue, handle) = PublishQueue::spawn(
            bus.clone(),
            RetryPolicy::unbounded(Duration::from_millis(1), Duration::from_millis(5)),
        );

        let msg = message();
        assert!(queue.enqueue(msg.clone()));
        drop(queue);
        handle.await.unwrap();

        assert_eq!(bus.confirmed_orders(), vec![msg]);
    }

    async fn wait_until_idle(queue: &PublishQueue) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while queue.pending() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_capped_policy_dead_letters_and_moves_on() {
        let bus = InMemoryEventBus::new();
        bus.fail_next(2);
        let (queue, handle) = PublishQueue::spawn(bus.clone(), RetryPolicy::immediate(2));

        queue.enqueue(message());
        wait_until_idle(&queue).await;

        let delivered = message();
        queue.enqueue(delivered.clone());
        drop(queue);
        handle.await.unwrap();

        assert_eq!(bus.confirmed_orders(), vec![delivered]);
    }

    #[tokio::test]
    async fn test_failing_message_does_not_hold_up_later_ones() {
        let bus = InMemoryEventBus::new();
        bus.fail_next(1);
        let (queue, handle) = PublishQueue::spawn(
            bus.clone(),
            RetryPolicy::unbounded(Duration::from_millis(50), Duration::from_millis(50)),
        );

        let stuck = message();
        let behind = message();
        queue.enqueue(stuck.clone());
        queue.enqueue(behind.clone());
        drop(queue);
        handle.await.unwrap();

        assert_eq!(bus.confirmed_orders(), vec![behind, stuck]);
    }

    #[tokio::test]
    async fn test_pending_drops_to_zero_after_delivery() {
        let bus = InMemoryEventBus::new();
        let mut rx = bus.subscribe();
        let (queue, _handle) = PublishQueue::spawn(bus.clone(), RetryPolicy::immediate(1));

        queue.enqueue(message());
        rx.recv().await.unwrap();
        wait_until_idle(&queue).await;
    }
}
