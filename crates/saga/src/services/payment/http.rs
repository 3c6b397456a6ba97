//! HTTP client for the payment service.

use async_trait::async_trait;
use common::{AggregateId, TenantId};
use market_domain::{BuyerId, Money};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{AuthorizeRequest, PaymentError, PaymentGateway, PaymentRecord, PaymentStatus};

const TENANT_HEADER: &str = "X-Tenant-Id";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeBody {
    order_id: AggregateId,
    user_id: BuyerId,
    amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentResponse {
    id: serde_json::Value,
    #[serde(default)]
    amount: Option<serde_json::Value>,
    status: PaymentStatus,
    #[serde(default)]
    provider: Option<String>,
}

/// Payment service reached over HTTP.
///
/// `POST {base}/payment/payments/authorize` and
/// `POST {base}/payment/payments/cancel/{orderId}`, tenant in `X-Tenant-Id`.
/// 4xx answers are declines, except 408 and 429 which, like 5xx answers and
/// transport errors, are unavailability. A 404 on cancel means there is
/// nothing to cancel.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPaymentGateway {
    /// Creates a gateway for the service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Creates a gateway reusing an existing client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn transport_error(err: reqwest::Error) -> PaymentError {
        PaymentError::unavailable(err.to_string())
    }
}

/// Answers that say "not now" rather than "no".
fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn authorize(&self, request: &AuthorizeRequest) -> Result<PaymentRecord, PaymentError> {
        let body = AuthorizeBody {
            order_id: request.order_id,
            user_id: request.buyer_id,
            amount: request.amount.to_decimal_string(),
        };

        let response = self
            .client
            .post(format!("{}/payment/payments/authorize", self.base_url))
            .header(TENANT_HEADER, request.tenant_id.as_str())
            .json(&body)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if is_transient(status) {
            return Err(PaymentError::unavailable(format!(
                "payment service answered {status}"
            )));
        }
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(PaymentError::Declined {
                reason: if detail.is_empty() {
                    format!("payment service answered {status}")
                } else {
                    detail
                },
            });
        }

        let payment: PaymentResponse = response.json().await.map_err(Self::transport_error)?;
        match payment.status {
            PaymentStatus::Authorized => Ok(PaymentRecord {
                id: json_text(&payment.id),
                order_id: request.order_id,
                buyer_id: request.buyer_id,
                amount: payment
                    .amount
                    .as_ref()
                    .and_then(|a| Money::parse_decimal(&json_text(a)))
                    .unwrap_or(request.amount),
                status: PaymentStatus::Authorized,
                provider_reference: payment.provider.unwrap_or_default(),
            }),
            PaymentStatus::Declined | PaymentStatus::Cancelled => Err(PaymentError::Declined {
                reason: format!("payment {} is {:?}", json_text(&payment.id), payment.status),
            }),
        }
    }

    #[tracing::instrument(skip(self, tenant))]
    async fn cancel(&self, tenant: &TenantId, order_id: AggregateId) -> Result<(), PaymentError> {
        let response = self
            .client
            .post(format!(
                "{}/payment/payments/cancel/{}",
                self.base_url, order_id
            ))
            .header(TENANT_HEADER, tenant.as_str())
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(PaymentError::unavailable(format!(
            "cancel answered {status}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Path,
        http::{HeaderMap, StatusCode as AxumStatus},
        routing::post,
    };
    use serde_json::{Value, json};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request() -> AuthorizeRequest {
        AuthorizeRequest {
            tenant_id: TenantId::new("engineering"),
            order_id: AggregateId::new(),
            buyer_id: BuyerId::new(),
            amount: Money::from_cents(1250),
        }
    }

    #[tokio::test]
    async fn test_authorized_response_becomes_record() {
        let router = Router::new().route(
            "/payment/payments/authorize",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["x-tenant-id"], "engineering");
                assert_eq!(body["amount"], "12.50");
                (
                    AxumStatus::CREATED,
                    Json(json!({
                        "id": "3f0c8f5e-0000-0000-0000-000000000001",
                        "orderId": body["orderId"],
                        "userId": body["userId"],
                        "amount": 12.5,
                        "status": "AUTHORIZED",
                        "provider": "SIMULATED"
                    })),
                )
            }),
        );
        let gateway = HttpPaymentGateway::new(serve(router).await);
        let req = request();

        let record = gateway.authorize(&req).await.unwrap();
        assert_eq!(record.order_id, req.order_id);
        assert_eq!(record.amount, Money::from_cents(1250));
        assert_eq!(record.provider_reference, "SIMULATED");
        assert_eq!(record.status, PaymentStatus::Authorized);
    }

    #[tokio::test]
    async fn test_declined_status_and_client_errors_are_declines() {
        let router = Router::new().route(
            "/payment/payments/authorize",
            post(|Json(body): Json<Value>| async move {
                if body["amount"] == "12.50" {
                    (
                        AxumStatus::OK,
                        Json(json!({ "id": "p-1", "status": "DECLINED" })),
                    )
                } else {
                    (AxumStatus::UNPROCESSABLE_ENTITY, Json(json!({})))
                }
            }),
        );
        let gateway = HttpPaymentGateway::new(serve(router).await);

        assert!(matches!(
            gateway.authorize(&request()).await,
            Err(PaymentError::Declined { .. })
        ));
        let other = AuthorizeRequest {
            amount: Money::from_cents(1),
            ..request()
        };
        assert!(matches!(
            gateway.authorize(&other).await,
            Err(PaymentError::Declined { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_errors_and_unreachable_service_are_unavailable() {
        let router = Router::new().route(
            "/payment/payments/authorize",
            post(|| async { AxumStatus::SERVICE_UNAVAILABLE }),
        );
        let gateway = HttpPaymentGateway::new(serve(router).await);
        assert!(matches!(
            gateway.authorize(&request()).await,
            Err(PaymentError::Unavailable { .. })
        ));

        let unreachable = HttpPaymentGateway::new("http://127.0.0.1:1");
        assert!(matches!(
            unreachable.authorize(&request()).await,
            Err(PaymentError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_timeouts_and_throttling_are_unavailable() {
        let router = Router::new().route(
            "/payment/payments/authorize",
            post(|Json(body): Json<Value>| async move {
                if body["amount"] == "12.50" {
                    AxumStatus::TOO_MANY_REQUESTS
                } else {
                    AxumStatus::REQUEST_TIMEOUT
                }
            }),
        );
        let gateway = HttpPaymentGateway::new(serve(router).await);

        assert!(matches!(
            gateway.authorize(&request()).await,
            Err(PaymentError::Unavailable { .. })
        ));
        let other = AuthorizeRequest {
            amount: Money::from_cents(1),
            ..request()
        };
        assert!(matches!(
            gateway.authorize(&other).await,
            Err(PaymentError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(is_transient(StatusCode::REQUEST_TIMEOUT));
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient(StatusCode::UNPROCESSABLE_ENTITY));
        assert!(!is_transient(StatusCode::PAYMENT_REQUIRED));
    }

    #[tokio::test]
    async fn test_cancel_accepts_success_and_missing_payment() {
        let router = Router::new().route(
            "/payment/payments/cancel/{order_id}",
            post(|Path(order_id): Path<String>| async move {
                if order_id.ends_with('0') {
                    AxumStatus::NOT_FOUND
                } else {
                    AxumStatus::OK
                }
            }),
        );
        let gateway = HttpPaymentGateway::new(serve(router).await);
        let tenant = TenantId::new("engineering");

        for _ in 0..4 {
            assert!(gateway.cancel(&tenant, AggregateId::new()).await.is_ok());
        }

        let failing = Router::new().route(
            "/payment/payments/cancel/{order_id}",
            post(|| async { AxumStatus::BAD_GATEWAY }),
        );
        let gateway = HttpPaymentGateway::new(serve(failing).await);
        assert!(matches!(
            gateway.cancel(&tenant, AggregateId::new()).await,
            Err(PaymentError::Unavailable { .. })
        ));
    }
}
