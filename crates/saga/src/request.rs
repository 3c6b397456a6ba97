//! Checkout request as received from the entry point.

use common::{AggregateId, TenantId};
use market_domain::{BuyerId, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::CheckoutError;

/// One requested product and quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLine {
    /// The catalog item.
    pub product_id: ProductId,

    /// Units wanted; must be positive.
    pub quantity: u32,
}

/// A checkout request with tenant and buyer already authenticated.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// The tenant the buyer is acting in.
    pub tenant_id: TenantId,

    /// The buyer.
    pub buyer_id: BuyerId,

    /// Requested lines, in cart order.
    pub items: Vec<CheckoutLine>,

    /// Caller-supplied key making retries of this checkout idempotent.
    pub idempotency_key: Option<String>,
}

impl CheckoutRequest {
    /// Creates a request without an idempotency key.
    pub fn new(tenant_id: TenantId, buyer_id: BuyerId, items: Vec<CheckoutLine>) -> Self {
        Self {
            tenant_id,
            buyer_id,
            items,
            idempotency_key: None,
        }
    }

    /// Sets the idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Returns the order ID this request maps to.
    ///
    /// Keyed requests always map to the same ID for one buyer in a tenant;
    /// unkeyed requests get a fresh one per call.
    pub fn order_id(&self) -> AggregateId {
        match &self.idempotency_key {
            Some(key) => {
                AggregateId::from_idempotency_key(&self.tenant_id, self.buyer_id.as_uuid(), key)
            }
            None => AggregateId::new(),
        }
    }

    /// Checks preconditions and merges lines naming the same product.
    ///
    /// Merged lines keep the position of the product's first occurrence.
    pub fn validated_lines(&self) -> Result<Vec<CheckoutLine>, CheckoutError> {
        if self.tenant_id.as_str().trim().is_empty() {
            return Err(CheckoutError::InvalidRequest(
                "tenant must not be blank".to_string(),
            ));
        }
        if let Some(key) = &self.idempotency_key
            && key.trim().is_empty()
        {
            return Err(CheckoutError::InvalidRequest(
                "idempotency key must not be blank".to_string(),
            ));
        }
        if self.items.is_empty() {
            return Err(CheckoutError::InvalidRequest(
                "checkout requires at least one item".to_string(),
            ));
        }

        let mut merged: Vec<CheckoutLine> = Vec::with_capacity(self.items.len());
        for line in &self.items {
            if line.quantity == 0 {
                return Err(CheckoutError::InvalidRequest(format!(
                    "quantity for product {} must be positive",
                    line.product_id
                )));
            }
            match merged.iter_mut().find(|m| m.product_id == line.product_id) {
                Some(existing) => {
                    existing.quantity = existing.quantity.checked_add(line.quantity).ok_or_else(
                        || {
                            CheckoutError::InvalidRequest(format!(
                                "quantity for product {} is too large",
                                line.product_id
                            ))
                        },
                    )?;
                }
                None => merged.push(*line),
            }
        }
        Ok(merged)
    }
}
