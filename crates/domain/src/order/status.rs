//! Order status state machine and the compensations each status owes.

use serde::{Deserialize, Serialize};

/// Status of an order in the checkout saga.
///
/// Success path: `Pending → StockReserved → PaymentAuthorized → Confirmed`.
/// Any non-terminal status may enter `Compensating`, which ends in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order recorded; no stock reserved yet (or only partially).
    #[default]
    Pending,

    /// Every line item's stock has been reserved.
    StockReserved,

    /// The payment service authorized the full amount.
    PaymentAuthorized,

    /// Prior steps are being undone.
    Compensating,

    /// Terminal: the order is committed.
    Confirmed,

    /// Terminal: every prior effect has been undone.
    Failed,
}

impl OrderStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::StockReserved => "STOCK_RESERVED",
            OrderStatus::PaymentAuthorized => "PAYMENT_AUTHORIZED",
            OrderStatus::Compensating => "COMPENSATING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Failed => "FAILED",
        }
    }

    /// Returns true for `Confirmed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Failed)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reverse action undoing one forward step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompensationStep {
    /// Cancel the payment authorization for the order.
    CancelPayment,

    /// Return every reserved unit to stock.
    ReleaseStock,
}

impl std::fmt::Display for CompensationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompensationStep::CancelPayment => f.write_str("CANCEL_PAYMENT"),
            CompensationStep::ReleaseStock => f.write_str("RELEASE_STOCK"),
        }
    }
}

/// Returns the compensations owed by an order whose last durable status is
/// `status`, in execution order (reverse of the forward steps).
///
/// `StockReserved` owes a payment cancel because an authorize call may have
/// reached the payment service before timing out; cancel is idempotent, so a
/// cancel for a never-authorized order is harmless. `Compensating` alone does
/// not say which steps ran, so it owes everything; callers resolve it through
/// the status compensation was entered from.
pub fn compensations_owed(status: OrderStatus) -> &'static [CompensationStep] {
    use CompensationStep::*;

    match status {
        OrderStatus::Pending => &[ReleaseStock],
        OrderStatus::StockReserved
        | OrderStatus::PaymentAuthorized
        | OrderStatus::Compensating => &[CancelPayment, ReleaseStock],
        OrderStatus::Confirmed | OrderStatus::Failed => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Confirmed.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Compensating.is_terminal());
    }

    #[test]
    fn test_compensations_owed_per_status() {
        use CompensationStep::*;

        assert_eq!(compensations_owed(OrderStatus::Pending), &[ReleaseStock]);
        assert_eq!(
            compensations_owed(OrderStatus::StockReserved),
            &[CancelPayment, ReleaseStock]
        );
        assert_eq!(
            compensations_owed(OrderStatus::PaymentAuthorized),
            &[CancelPayment, ReleaseStock]
        );
        assert!(compensations_owed(OrderStatus::Confirmed).is_empty());
        assert!(compensations_owed(OrderStatus::Failed).is_empty());
    }

    #[test]
    fn test_payment_cancel_precedes_stock_release() {
        let steps = compensations_owed(OrderStatus::PaymentAuthorized);
        let cancel = steps.iter().position(|s| *s == CompensationStep::CancelPayment);
        let release = steps.iter().position(|s| *s == CompensationStep::ReleaseStock);
        assert!(cancel < release);
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::PaymentAuthorized).unwrap(),
            "\"PAYMENT_AUTHORIZED\""
        );
        assert_eq!(OrderStatus::StockReserved.to_string(), "STOCK_RESERVED");
        let parsed: OrderStatus = serde_json::from_str("\"COMPENSATING\"").unwrap();
        assert_eq!(parsed, OrderStatus::Compensating);
    }
}
