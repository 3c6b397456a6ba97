//! Checkout saga orchestration.

use std::collections::HashMap;
use std::sync::Arc;

use common::{AggregateId, TenantId};
use event_store::EventStore;
use market_domain::{
    Aggregate, CompensationStep, DomainError, FailureReason, Order, OrderError, OrderRepository,
    OrderStatus, PlaceOrder,
};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::SagaConfig;
use crate::error::{CheckoutError, Result};
use crate::notification::NotificationSidecar;
use crate::payment_client::PaymentClient;
use crate::publish_queue::PublishQueue;
use crate::request::{CheckoutLine, CheckoutRequest};
use crate::services::{
    AuthorizeRequest, InventoryError, InventoryStore, NotificationEvent, Notifier,
    OrderConfirmedMessage, PaymentError, PaymentGateway,
};

/// Outcome of a recovery pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Orders compensated and finalized as FAILED.
    pub recovered: Vec<AggregateId>,

    /// Orders whose compensation could not finish, with the reason.
    pub incomplete: Vec<(AggregateId, String)>,

    /// FAILED orders whose deferred payment cancel was scheduled again.
    pub voids_rescheduled: Vec<AggregateId>,
}

/// Orchestrates checkouts across inventory and payment.
///
/// Forward steps: place the order (`PENDING`), reserve every line
/// (`STOCK_RESERVED`), authorize the full amount (`PAYMENT_AUTHORIZED`),
/// then commit (`CONFIRMED`). Each status is appended to the order's event
/// log before the next side effect starts. A failure before the commit
/// enters `COMPENSATING` and runs the compensations the recorded status
/// owes, cancel before release, recording each before finalizing `FAILED`.
/// A cancel for an authorization that was never confirmed does not hold up
/// the release: when it fails it is deferred to a background retry.
///
/// After the commit the confirmed event is queued for publication and a
/// notification is sent in the background; neither can change the outcome.
pub struct CheckoutSaga<S, I, P, N>
where
    S: EventStore,
    I: InventoryStore,
    P: PaymentGateway,
    N: Notifier,
{
    orders: OrderRepository<S>,
    inventory: I,
    payments: Arc<PaymentClient<P>>,
    publish_queue: PublishQueue,
    notifications: Arc<NotificationSidecar<N>>,
    config: SagaConfig,
}

impl<S, I, P, N> CheckoutSaga<S, I, P, N>
where
    S: EventStore,
    I: InventoryStore,
    P: PaymentGateway + 'static,
    N: Notifier + 'static,
{
    /// Creates a saga over its collaborators.
    pub fn new(
        store: S,
        inventory: I,
        payment_gateway: P,
        notifier: N,
        publish_queue: PublishQueue,
        config: SagaConfig,
    ) -> Self {
        Self {
            orders: OrderRepository::new(store),
            inventory,
            payments: Arc::new(PaymentClient::new(payment_gateway, &config)),
            publish_queue,
            notifications: Arc::new(NotificationSidecar::new(
                notifier,
                config.notification_breaker.clone(),
            )),
            config,
        }
    }

    /// Returns the order repository.
    pub fn orders(&self) -> &OrderRepository<S> {
        &self.orders
    }

    /// Returns the inventory store.
    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    /// Returns the payment client.
    pub fn payments(&self) -> &PaymentClient<P> {
        &self.payments
    }

    /// Returns the notification sidecar.
    pub fn notifications(&self) -> &NotificationSidecar<N> {
        &self.notifications
    }

    /// Returns the publish queue.
    pub fn publish_queue(&self) -> &PublishQueue {
        &self.publish_queue
    }

    /// Runs a checkout to a terminal outcome.
    ///
    /// A keyed request whose order already exists is not executed again: a
    /// confirmed order is returned, a failed one returns its recorded error
    /// and one still running yields `CheckoutInProgress`. An existing order
    /// placed by another buyer is never returned.
    #[tracing::instrument(
        skip(self, request),
        fields(tenant = %request.tenant_id, buyer = %request.buyer_id)
    )]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<Order> {
        let lines = request.validated_lines()?;
        let order_id = request.order_id();

        if request.idempotency_key.is_some()
            && let Some(existing) = self.orders.get_order(order_id).await?
        {
            if existing.tenant_id() != Some(&request.tenant_id)
                || existing.buyer_id() != Some(request.buyer_id)
            {
                warn!(%order_id, "Idempotency key resolves to another buyer's order");
                return Err(CheckoutError::IdempotencyKeyReused { order_id });
            }
            info!(%order_id, status = %existing.status(), "Replaying recorded checkout outcome");
            return Self::recorded_outcome(order_id, existing);
        }

        metrics::counter!("checkout_started_total").increment(1);
        let started = Instant::now();

        let result = self.run(order_id, &request, &lines, started).await;

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        match &result {
            Ok(_) => metrics::counter!("checkout_confirmed_total").increment(1),
            Err(e) => {
                metrics::counter!("checkout_failed_total", "reason" => e.label()).increment(1)
            }
        }
        result
    }

    /// Compensates a non-terminal order and finalizes it as `FAILED`.
    ///
    /// Compensation resumes after the steps already recorded. A terminal
    /// order is rejected with `SagaAlreadyTerminal`.
    #[tracing::instrument(skip(self))]
    pub async fn compensate(&self, order_id: AggregateId) -> Result<Order> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;

        if order.is_terminal() {
            return Err(CheckoutError::SagaAlreadyTerminal {
                order_id,
                status: order.status(),
            });
        }

        let reason = order.failure().cloned().unwrap_or(FailureReason::Abandoned {
            reason: format!("checkout interrupted in {}", order.status()),
        });
        self.compensate_order(order_id, reason).await
    }

    /// Compensates every order left non-terminal, e.g. by a crash.
    ///
    /// Must not run while checkouts are in flight. Orders whose compensation
    /// cannot finish stay `COMPENSATING` and are reported; a later pass
    /// resumes them. Deferred payment cancels of FAILED orders, which died
    /// with the previous process, are scheduled again.
    #[tracing::instrument(skip(self))]
    pub async fn recover_incomplete(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for order in self.orders.orders_with_deferred_compensation().await? {
            if let (Some(order_id), Some(tenant)) = (order.id(), order.tenant_id()) {
                self.spawn_void(tenant.clone(), order_id);
                report.voids_rescheduled.push(order_id);
            }
        }

        for order in self.orders.incomplete_orders().await? {
            let Some(order_id) = order.id() else {
                continue;
            };
            match self.compensate(order_id).await {
                Ok(_) => report.recovered.push(order_id),
                Err(e) => {
                    error!(%order_id, error = %e, "Recovery could not finish compensation");
                    report.incomplete.push((order_id, e.to_string()));
                }
            }
        }

        info!(
            recovered = report.recovered.len(),
            incomplete = report.incomplete.len(),
            voids = report.voids_rescheduled.len(),
            "Recovery pass finished"
        );
        Ok(report)
    }

    /// Loads an order visible to `tenant`.
    pub async fn get_order(&self, tenant: &TenantId, order_id: AggregateId) -> Result<Order> {
        self.orders
            .get_order(order_id)
            .await?
            .filter(|order| order.tenant_id() == Some(tenant))
            .ok_or(CheckoutError::OrderNotFound(order_id))
    }

    fn recorded_outcome(order_id: AggregateId, order: Order) -> Result<Order> {
        match order.status() {
            OrderStatus::Confirmed => Ok(order),
            OrderStatus::Failed => Err(order
                .failure()
                .cloned()
                .map(CheckoutError::from)
                .unwrap_or(CheckoutError::SagaAlreadyTerminal {
                    order_id,
                    status: OrderStatus::Failed,
                })),
            _ => Err(CheckoutError::CheckoutInProgress { order_id }),
        }
    }

    async fn run(
        &self,
        order_id: AggregateId,
        request: &CheckoutRequest,
        lines: &[CheckoutLine],
        started: Instant,
    ) -> Result<Order> {
        let tenant = &request.tenant_id;

        // Price snapshot from the tenant's catalog
        let ids: Vec<_> = lines.iter().map(|line| line.product_id).collect();
        let catalog: HashMap<_, _> = self
            .inventory
            .find_by_ids_and_tenant(&ids, tenant)
            .await
            .map_err(|e| CheckoutError::InventoryUnavailable {
                reason: e.to_string(),
            })?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        let items = lines
            .iter()
            .map(|line| {
                catalog
                    .get(&line.product_id)
                    .map(|item| item.line_item(line.quantity))
                    .ok_or(CheckoutError::ProductNotFound {
                        product_id: line.product_id,
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let order = self
            .orders
            .place(PlaceOrder {
                order_id,
                tenant_id: tenant.clone(),
                buyer_id: request.buyer_id,
                items,
                idempotency_key: request.idempotency_key.clone(),
            })
            .await
            .map_err(|e| match e {
                e if e.is_conflict() => CheckoutError::CheckoutInProgress { order_id },
                DomainError::Order(OrderError::AlreadyPlaced) => {
                    CheckoutError::CheckoutInProgress { order_id }
                }
                e => e.into(),
            })?;
        info!(%order_id, total = %order.total_amount(), "Order placed");

        // Reserve
        for line in order.items() {
            if let Err(e) = self
                .inventory
                .reserve(order_id, tenant, line.product_id, line.quantity)
                .await
            {
                let reason = match e {
                    InventoryError::InsufficientStock { product_id, .. } => {
                        FailureReason::InsufficientStock { product_id }
                    }
                    other => FailureReason::InventoryUnavailable {
                        reason: other.to_string(),
                    },
                };
                return Err(self.abort(order_id, reason).await);
            }
        }
        let order = self.step(order_id, self.orders.mark_stock_reserved(order_id)).await?;
        info!(%order_id, "Stock reserved");

        // Authorize
        let authorize = AuthorizeRequest {
            tenant_id: tenant.clone(),
            order_id,
            buyer_id: request.buyer_id,
            amount: order.total_amount(),
        };
        let record = match self
            .payments
            .authorize(&authorize, started + self.config.deadline)
            .await
        {
            Ok(record) => record,
            Err(PaymentError::Declined { reason }) => {
                return Err(self
                    .abort(order_id, FailureReason::PaymentDeclined { reason })
                    .await);
            }
            Err(PaymentError::Unavailable { reason }) => {
                return Err(self
                    .abort(order_id, FailureReason::PaymentUnavailable { reason })
                    .await);
            }
        };
        self.step(
            order_id,
            self.orders.mark_payment_authorized(
                order_id,
                record.id,
                record.provider_reference,
                record.amount,
            ),
        )
        .await?;
        info!(%order_id, "Payment authorized");

        // Commit
        let order = self.step(order_id, self.orders.confirm(order_id)).await?;
        self.payments.forget(order_id);
        self.settle(order_id).await;
        info!(%order_id, "Order confirmed");

        self.after_commit(order_id, tenant, &order);
        Ok(order)
    }

    /// Awaits a forward transition; if it cannot be recorded the checkout is
    /// abandoned and compensated.
    async fn step(
        &self,
        order_id: AggregateId,
        transition: impl Future<Output = std::result::Result<Order, DomainError>>,
    ) -> Result<Order> {
        match transition.await {
            Ok(order) => Ok(order),
            Err(e) => {
                error!(%order_id, error = %e, "Could not record saga step");
                Err(self
                    .abort(
                        order_id,
                        FailureReason::Abandoned {
                            reason: e.to_string(),
                        },
                    )
                    .await)
            }
        }
    }

    async fn abort(&self, order_id: AggregateId, reason: FailureReason) -> CheckoutError {
        warn!(%order_id, reason = %reason, "Checkout failed, compensating");
        match self.compensate_order(order_id, reason.clone()).await {
            Ok(_) => CheckoutError::from(reason),
            Err(e) => e,
        }
    }

    async fn compensate_order(&self, order_id: AggregateId, reason: FailureReason) -> Result<Order> {
        let order = self.orders.begin_compensation(order_id, reason).await?;
        let tenant = order
            .tenant_id()
            .cloned()
            .ok_or(CheckoutError::OrderNotFound(order_id))?;
        let deadline = Instant::now() + self.config.deadline;

        for step in order.outstanding_compensations() {
            let outcome = match step {
                CompensationStep::CancelPayment => self
                    .payments
                    .cancel(&tenant, order_id, deadline)
                    .await
                    .map_err(|e| e.to_string()),
                CompensationStep::ReleaseStock => self.release_all(order_id, &tenant, &order).await,
            };

            match outcome {
                Ok(()) => {
                    self.orders.record_compensation(order_id, step).await?;
                    info!(%order_id, %step, "Compensation step completed");
                }
                Err(reason)
                    if step == CompensationStep::CancelPayment && order.payment().is_none() =>
                {
                    warn!(%order_id, %step, %reason, "Authorization unconfirmed; cancel continues in the background");
                    self.orders.defer_compensation(order_id, step, reason).await?;
                }
                Err(reason) => {
                    error!(%order_id, %step, %reason, "Compensation step failed; order stays COMPENSATING");
                    return Err(CheckoutError::CompensationIncomplete {
                        order_id,
                        step,
                        reason,
                    });
                }
            }
        }

        let failed = self.orders.fail(order_id).await?;
        self.payments.forget(order_id);
        self.settle(order_id).await;
        if !failed.deferred_compensations().is_empty() {
            self.spawn_void(tenant, order_id);
        }
        warn!(%order_id, "Order failed");
        Ok(failed)
    }

    /// Keeps cancelling an order's possible authorization until the payment
    /// service acknowledges it or the void policy gives up.
    fn spawn_void(&self, tenant: TenantId, order_id: AggregateId) {
        let payments = Arc::clone(&self.payments);
        let retry = self.config.void_retry.clone();
        let window = self.config.deadline;
        metrics::counter!("payment_voids_scheduled_total").increment(1);

        tokio::spawn(async move {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                match payments.cancel(&tenant, order_id, Instant::now() + window).await {
                    Ok(()) => {
                        payments.forget(order_id);
                        info!(%order_id, attempts, "Deferred payment cancel completed");
                        return;
                    }
                    Err(e) if retry.can_retry(attempts) => {
                        let delay = retry.delay_for(attempts - 1);
                        warn!(%order_id, attempts, delay_ms = delay.as_millis() as u64, error = %e, "Deferred payment cancel failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => {
                        error!(%order_id, attempts, error = %e, "Giving up on deferred payment cancel");
                        metrics::counter!("payment_voids_abandoned_total").increment(1);
                        return;
                    }
                }
            }
        });
    }

    /// Lets the inventory drop its bookkeeping for a terminal order.
    async fn settle(&self, order_id: AggregateId) {
        if let Err(e) = self.inventory.settle(order_id).await {
            warn!(%order_id, error = %e, "Could not settle inventory bookkeeping");
        }
    }

    async fn release_all(
        &self,
        order_id: AggregateId,
        tenant: &TenantId,
        order: &Order,
    ) -> std::result::Result<(), String> {
        for line in order.items() {
            self.inventory
                .release(order_id, tenant, line.product_id)
                .await
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    fn after_commit(&self, order_id: AggregateId, tenant: &TenantId, order: &Order) {
        if let Some(message) = OrderConfirmedMessage::from_order(order) {
            self.publish_queue.enqueue(message);
        }

        if let Some(event) = NotificationEvent::order_confirmed(order_id, order) {
            let sidecar = Arc::clone(&self.notifications);
            let tenant = tenant.clone();
            tokio::spawn(async move {
                sidecar.notify(&tenant, &event).await;
            });
        }
    }
}
