//! Checkout and order lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use checkout_saga::{CheckoutLine, CheckoutRequest};
use common::{AggregateId, TenantId};
use market_domain::{Aggregate, BuyerId, Order};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

const TENANT_HEADER: &str = "X-Tenant-Id";
const USER_HEADER: &str = "X-User-Id";
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub items: Vec<CheckoutLine>,
}

// -- Response types --

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: String,
    pub tenant_id: Option<String>,
    pub buyer_id: Option<String>,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_amount: String,
    pub failure_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemResponse {
    pub product_id: String,
    pub seller_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: String,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().map(|id| id.to_string()).unwrap_or_default(),
            tenant_id: order.tenant_id().map(ToString::to_string),
            buyer_id: order.buyer_id().map(|b| b.to_string()),
            status: order.status().to_string(),
            items: order
                .items()
                .iter()
                .map(|line| OrderItemResponse {
                    product_id: line.product_id.to_string(),
                    seller_id: line.seller_id.to_string(),
                    product_name: line.product_name.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price.to_decimal_string(),
                })
                .collect(),
            total_amount: order.total_amount().to_decimal_string(),
            failure_reason: order.failure().map(ToString::to_string),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}

// -- Handlers --

/// POST /market/orders/checkout: run a checkout for the calling buyer.
#[tracing::instrument(skip(state, headers, body))]
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CheckoutBody>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let tenant = tenant(&headers)?;
    let buyer = required_header(&headers, USER_HEADER)?;
    let buyer_id = uuid::Uuid::parse_str(buyer)
        .map(BuyerId::from_uuid)
        .map_err(|e| ApiError::BadRequest(format!("Invalid {USER_HEADER}: {e}")))?;

    let mut request = CheckoutRequest::new(tenant, buyer_id, body.items);
    if let Some(key) = headers.get(IDEMPOTENCY_HEADER) {
        let key = key
            .to_str()
            .map_err(|_| ApiError::BadRequest(format!("Invalid {IDEMPOTENCY_HEADER}")))?;
        request = request.with_idempotency_key(key);
    }

    let order = state.saga.checkout(request).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /market/orders/{id}: load an order of the calling tenant.
#[tracing::instrument(skip(state, headers))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let tenant = tenant(&headers)?;
    let order_id = uuid::Uuid::parse_str(&id)
        .map(AggregateId::from_uuid)
        .map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))?;

    let order = state.saga.get_order(&tenant, order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

fn tenant(headers: &HeaderMap) -> Result<TenantId, ApiError> {
    required_header(headers, TENANT_HEADER).map(TenantId::new)
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Unauthorized(format!("Missing {name} header")))
}
