//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, TenantId};
use event_store::Version;

use crate::aggregate::Aggregate;

use super::{
    BuyerId, CompensationStep, FailureReason, LineItem, Money, OrderError, OrderEvent,
    OrderStatus, PlaceOrder, compensations_owed,
    events::{
        CompensationStartedData, CompensationStepCompletedData, CompensationStepDeferredData,
        OrderConfirmedData, OrderFailedData, OrderPlacedData, PaymentAuthorizedData,
        StockReservedData,
    },
};

/// Order aggregate root.
///
/// The order's status is the checkout saga's durable step log: each forward
/// step is recorded before the next side effect is attempted, and the
/// compensations still owed are a pure function of the recorded status.
#[derive(Debug, Clone, Default)]
pub struct Order {
    id: Option<AggregateId>,
    version: Version,
    tenant_id: Option<TenantId>,
    buyer_id: Option<BuyerId>,
    items: Vec<LineItem>,
    total_amount: Money,
    status: OrderStatus,
    idempotency_key: Option<String>,
    payment: Option<PaymentAuthorizedData>,
    compensating_from: Option<OrderStatus>,
    compensated: Vec<CompensationStep>,
    deferred: Vec<CompensationStep>,
    failure: Option<FailureReason>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderPlaced(data) => self.apply_order_placed(data),
            OrderEvent::StockReserved(data) => {
                self.status = OrderStatus::StockReserved;
                self.updated_at = Some(data.reserved_at);
            }
            OrderEvent::PaymentAuthorized(data) => {
                self.status = OrderStatus::PaymentAuthorized;
                self.updated_at = Some(data.authorized_at);
                self.payment = Some(data);
            }
            OrderEvent::OrderConfirmed(data) => {
                self.status = OrderStatus::Confirmed;
                self.updated_at = Some(data.confirmed_at);
            }
            OrderEvent::CompensationStarted(data) => {
                self.compensating_from = Some(data.from_status);
                self.status = OrderStatus::Compensating;
                self.failure = Some(data.reason);
                self.updated_at = Some(data.started_at);
            }
            OrderEvent::CompensationStepCompleted(data) => {
                self.compensated.push(data.step);
                self.updated_at = Some(data.completed_at);
            }
            OrderEvent::CompensationStepDeferred(data) => {
                self.deferred.push(data.step);
                self.updated_at = Some(data.deferred_at);
            }
            OrderEvent::OrderFailed(data) => {
                self.status = OrderStatus::Failed;
                self.failure = Some(data.reason);
                self.updated_at = Some(data.failed_at);
            }
        }
    }
}

// Query methods
impl Order {
    /// Returns the buyer.
    pub fn buyer_id(&self) -> Option<BuyerId> {
        self.buyer_id
    }

    /// Returns the current status.
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Returns the line items in checkout order.
    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    /// Returns the order total.
    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// Returns the idempotency key the order was placed with.
    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    /// Returns the recorded payment authorization.
    pub fn payment(&self) -> Option<&PaymentAuthorizedData> {
        self.payment.as_ref()
    }

    /// Returns the status compensation was entered from.
    pub fn compensating_from(&self) -> Option<OrderStatus> {
        self.compensating_from
    }

    /// Returns the recorded failure, set once compensation has started.
    pub fn failure(&self) -> Option<&FailureReason> {
        self.failure.as_ref()
    }

    /// Returns the compensation steps left to a background retry.
    pub fn deferred_compensations(&self) -> &[CompensationStep] {
        &self.deferred
    }

    /// Returns when the order was placed.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Returns when the order last changed.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Returns true once the order is CONFIRMED or FAILED.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the compensation steps still owed, in execution order.
    ///
    /// A compensating order owes what its entry status owed minus the steps
    /// already recorded or deferred; any other order owes what its status
    /// owes.
    pub fn outstanding_compensations(&self) -> Vec<CompensationStep> {
        let basis = match (self.status, self.compensating_from) {
            (OrderStatus::Compensating, Some(from)) => from,
            (status, _) => status,
        };
        compensations_owed(basis)
            .iter()
            .copied()
            .filter(|step| !self.compensated.contains(step) && !self.deferred.contains(step))
            .collect()
    }
}

// Command methods
impl Order {
    /// Records a new order in `PENDING`.
    pub fn place(&self, command: PlaceOrder) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyPlaced);
        }
        if command.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        for item in &command.items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id,
                    quantity: item.quantity,
                });
            }
            if item.unit_price.cents() < 0 {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id,
                    price: item.unit_price,
                });
            }
        }

        let total_amount = command.items.iter().map(LineItem::subtotal).sum();
        Ok(vec![OrderEvent::OrderPlaced(OrderPlacedData {
            order_id: command.order_id,
            tenant_id: command.tenant_id,
            buyer_id: command.buyer_id,
            items: command.items,
            total_amount,
            idempotency_key: command.idempotency_key,
            placed_at: Utc::now(),
        })])
    }

    /// Records that every line item's stock is reserved.
    pub fn mark_stock_reserved(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_status(OrderStatus::Pending, "mark stock reserved")?;

        Ok(vec![OrderEvent::StockReserved(StockReservedData {
            reserved_at: Utc::now(),
        })])
    }

    /// Records the payment authorization; the amount must equal the total.
    pub fn mark_payment_authorized(
        &self,
        payment_id: impl Into<String>,
        provider_reference: impl Into<String>,
        amount: Money,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_status(OrderStatus::StockReserved, "mark payment authorized")?;
        if amount != self.total_amount {
            return Err(OrderError::AmountMismatch {
                expected: self.total_amount,
                actual: amount,
            });
        }

        Ok(vec![OrderEvent::PaymentAuthorized(PaymentAuthorizedData {
            payment_id: payment_id.into(),
            provider_reference: provider_reference.into(),
            amount,
            authorized_at: Utc::now(),
        })])
    }

    /// Commits the order. Nothing is compensated past this point.
    pub fn confirm(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_status(OrderStatus::PaymentAuthorized, "confirm")?;

        Ok(vec![OrderEvent::OrderConfirmed(OrderConfirmedData {
            confirmed_at: Utc::now(),
        })])
    }

    /// Enters `COMPENSATING`, remembering the current status.
    ///
    /// Resuming an order that is already compensating records nothing.
    pub fn begin_compensation(&self, reason: FailureReason) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_placed()?;
        self.require_not_terminal()?;
        if self.status == OrderStatus::Compensating {
            return Ok(vec![]);
        }

        Ok(vec![OrderEvent::CompensationStarted(CompensationStartedData {
            from_status: self.status,
            reason,
            started_at: Utc::now(),
        })])
    }

    /// Records one compensation step.
    ///
    /// Steps must complete in the owed order; recording a finished step again
    /// records nothing.
    pub fn record_compensation(
        &self,
        step: CompensationStep,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_not_terminal()?;
        self.require_status(OrderStatus::Compensating, "record compensation")?;
        if self.compensated.contains(&step) {
            return Ok(vec![]);
        }
        if self.outstanding_compensations().first() != Some(&step) {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "complete compensation step out of order",
            });
        }

        Ok(vec![OrderEvent::CompensationStepCompleted(
            CompensationStepCompletedData {
                step,
                completed_at: Utc::now(),
            },
        )])
    }

    /// Leaves the next owed step to a background retry.
    ///
    /// Only a cancel for a payment that was never recorded as authorized can
    /// be deferred: the authorize call may have reached the payment service,
    /// but nothing was charged that the saga knows of, so stock release does
    /// not wait on it.
    pub fn defer_compensation(
        &self,
        step: CompensationStep,
        reason: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_status(OrderStatus::Compensating, "defer compensation")?;
        if self.deferred.contains(&step) {
            return Ok(vec![]);
        }
        if step != CompensationStep::CancelPayment || self.payment.is_some() {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "defer a compensation that must complete",
            });
        }
        if self.outstanding_compensations().first() != Some(&step) {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action: "defer compensation step out of order",
            });
        }

        Ok(vec![OrderEvent::CompensationStepDeferred(
            CompensationStepDeferredData {
                step,
                reason: reason.into(),
                deferred_at: Utc::now(),
            },
        )])
    }

    /// Finishes a fully compensated order as `FAILED`.
    pub fn fail(&self) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_not_terminal()?;
        self.require_status(OrderStatus::Compensating, "fail")?;
        let outstanding = self.outstanding_compensations();
        if !outstanding.is_empty() {
            return Err(OrderError::CompensationOutstanding { steps: outstanding });
        }

        let reason = self.failure.clone().unwrap_or(FailureReason::Abandoned {
            reason: "no reason recorded".to_string(),
        });
        Ok(vec![OrderEvent::OrderFailed(OrderFailedData {
            reason,
            failed_at: Utc::now(),
        })])
    }

    fn require_placed(&self) -> Result<(), OrderError> {
        if self.id.is_none() {
            return Err(OrderError::NotFound);
        }
        Ok(())
    }

    fn require_not_terminal(&self) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::AlreadyTerminal {
                status: self.status,
            });
        }
        Ok(())
    }

    fn require_status(&self, expected: OrderStatus, action: &'static str) -> Result<(), OrderError> {
        self.require_placed()?;
        self.require_not_terminal()?;
        if self.status != expected {
            return Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action,
            });
        }
        Ok(())
    }
}

// Apply event helpers
impl Order {
    fn apply_order_placed(&mut self, data: OrderPlacedData) {
        self.id = Some(data.order_id);
        self.tenant_id = Some(data.tenant_id);
        self.buyer_id = Some(data.buyer_id);
        self.items = data.items;
        self.total_amount = data.total_amount;
        self.idempotency_key = data.idempotency_key;
        self.status = OrderStatus::Pending;
        self.created_at = Some(data.placed_at);
        self.updated_at = Some(data.placed_at);
    }
}
