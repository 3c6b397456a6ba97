//! Persistence of orders through the event store.

use common::AggregateId;
use event_store::EventStore;

use crate::aggregate::Aggregate;
use crate::error::DomainError;
use crate::repository::EventSourcedRepository;

use super::{CompensationStep, FailureReason, Money, Order, OrderError, OrderEvent, PlaceOrder};

/// Loads orders and records their saga transitions.
///
/// Every method appends with optimistic concurrency on the order's version,
/// so two writers racing on one order cannot both succeed.
pub struct OrderRepository<S: EventStore> {
    inner: EventSourcedRepository<S, Order>,
}

impl<S: EventStore> OrderRepository<S> {
    /// Creates a new order repository.
    pub fn new(store: S) -> Self {
        Self {
            inner: EventSourcedRepository::new(store),
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        self.inner.store()
    }

    /// Records a new order in `PENDING`.
    #[tracing::instrument(skip(self, command), fields(order_id = %command.order_id))]
    pub async fn place(&self, command: PlaceOrder) -> Result<Order, DomainError> {
        let order_id = command.order_id;
        let result = self
            .inner
            .execute(order_id, |order| order.place(command))
            .await?;

        metrics::counter!("orders_placed_total").increment(1);
        Ok(result.aggregate)
    }

    /// Records that every line item's stock is reserved.
    #[tracing::instrument(skip(self))]
    pub async fn mark_stock_reserved(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        self.run(order_id, |order| order.mark_stock_reserved()).await
    }

    /// Records the payment authorization.
    #[tracing::instrument(skip(self, payment_id, provider_reference))]
    pub async fn mark_payment_authorized(
        &self,
        order_id: AggregateId,
        payment_id: String,
        provider_reference: String,
        amount: Money,
    ) -> Result<Order, DomainError> {
        self.run(order_id, |order| {
            order.mark_payment_authorized(payment_id, provider_reference, amount)
        })
        .await
    }

    /// Commits the order.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        self.run(order_id, |order| order.confirm()).await
    }

    /// Enters compensation, or resumes it if already compensating.
    #[tracing::instrument(skip(self))]
    pub async fn begin_compensation(
        &self,
        order_id: AggregateId,
        reason: FailureReason,
    ) -> Result<Order, DomainError> {
        self.run(order_id, |order| order.begin_compensation(reason))
            .await
    }

    /// Records a finished compensation step.
    #[tracing::instrument(skip(self))]
    pub async fn record_compensation(
        &self,
        order_id: AggregateId,
        step: CompensationStep,
    ) -> Result<Order, DomainError> {
        self.run(order_id, |order| order.record_compensation(step))
            .await
    }

    /// Leaves the next owed step to a background retry.
    #[tracing::instrument(skip(self, reason))]
    pub async fn defer_compensation(
        &self,
        order_id: AggregateId,
        step: CompensationStep,
        reason: String,
    ) -> Result<Order, DomainError> {
        self.run(order_id, |order| order.defer_compensation(step, reason))
            .await
    }

    /// Finishes a fully compensated order as `FAILED`.
    #[tracing::instrument(skip(self))]
    pub async fn fail(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        self.run(order_id, |order| order.fail()).await
    }

    /// Loads an order, returning None if it was never placed.
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.inner.load_existing(order_id).await
    }

    /// Loads every order that has not reached CONFIRMED or FAILED.
    pub async fn incomplete_orders(&self) -> Result<Vec<Order>, DomainError> {
        self.load_matching(|order| !order.is_terminal()).await
    }

    /// Loads every FAILED order that finished with a deferred compensation.
    pub async fn orders_with_deferred_compensation(&self) -> Result<Vec<Order>, DomainError> {
        self.load_matching(|order| {
            order.is_terminal() && !order.deferred_compensations().is_empty()
        })
        .await
    }

    async fn load_matching(
        &self,
        predicate: impl Fn(&Order) -> bool,
    ) -> Result<Vec<Order>, DomainError> {
        let ids = self
            .store()
            .list_aggregate_ids(Order::aggregate_type())
            .await?;

        let mut matching = Vec::new();
        for id in ids {
            if let Some(order) = self.inner.load_existing(id).await?
                && predicate(&order)
            {
                matching.push(order);
            }
        }
        Ok(matching)
    }

    async fn run<F>(&self, order_id: AggregateId, command_fn: F) -> Result<Order, DomainError>
    where
        F: FnOnce(&Order) -> Result<Vec<OrderEvent>, OrderError>,
    {
        Ok(self.inner.execute(order_id, command_fn).await?.aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{BuyerId, LineItem, OrderStatus, ProductId, SellerId};
    use common::TenantId;
    use event_store::InMemoryEventStore;

    fn place_command(order_id: AggregateId) -> PlaceOrder {
        PlaceOrder {
            order_id,
            tenant_id: TenantId::new("engineering"),
            buyer_id: BuyerId::new(),
            items: vec![LineItem {
                product_id: ProductId::new(),
                seller_id: SellerId::new(),
                product_name: "Graph paper".to_string(),
                quantity: 4,
                unit_price: Money::from_cents(250),
            }],
            idempotency_key: Some("cart-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_place_and_reload() {
        let repo = OrderRepository::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        let placed = repo.place(place_command(id)).await.unwrap();
        assert_eq!(placed.total_amount(), Money::from_cents(1000));

        let loaded = repo.get_order(id).await.unwrap().unwrap();
        assert_eq!(loaded.status(), OrderStatus::Pending);
        assert_eq!(loaded.idempotency_key(), Some("cart-1"));
        assert_eq!(loaded.version().as_i64(), 1);
    }

    #[tokio::test]
    async fn test_second_place_is_rejected() {
        let repo = OrderRepository::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        repo.place(place_command(id)).await.unwrap();
        let err = repo.place(place_command(id)).await.unwrap_err();
        assert!(matches!(err, DomainError::Order(OrderError::AlreadyPlaced)));
    }

    #[tokio::test]
    async fn test_missing_order_is_none() {
        let repo = OrderRepository::new(InMemoryEventStore::new());
        assert!(repo.get_order(AggregateId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incomplete_orders_skip_terminal() {
        let repo = OrderRepository::new(InMemoryEventStore::new());
        let confirmed = AggregateId::new();
        let stuck = AggregateId::new();

        repo.place(place_command(confirmed)).await.unwrap();
        repo.mark_stock_reserved(confirmed).await.unwrap();
        repo.mark_payment_authorized(
            confirmed,
            "pay-1".to_string(),
            "ref-1".to_string(),
            Money::from_cents(1000),
        )
        .await
        .unwrap();
        repo.confirm(confirmed).await.unwrap();

        repo.place(place_command(stuck)).await.unwrap();
        repo.mark_stock_reserved(stuck).await.unwrap();

        let incomplete = repo.incomplete_orders().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id(), Some(stuck));
        assert_eq!(incomplete[0].status(), OrderStatus::StockReserved);
    }
}
