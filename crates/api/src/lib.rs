//! HTTP service hosting the marketplace checkout saga.
//!
//! Exposes the checkout endpoint and order lookup, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use checkout_saga::{
    CheckoutSaga, EventPublisher, InventoryStore, Notifier, PaymentGateway, PublishQueue,
    SagaConfig,
};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// The saga with its collaborators chosen at startup.
pub type AppSaga = CheckoutSaga<
    Arc<dyn EventStore>,
    Arc<dyn InventoryStore>,
    Arc<dyn PaymentGateway>,
    Arc<dyn Notifier>,
>;

/// Collaborators the service runs against.
pub struct Backends {
    pub store: Arc<dyn EventStore>,
    pub inventory: Arc<dyn InventoryStore>,
    pub payments: Arc<dyn PaymentGateway>,
    pub notifier: Arc<dyn Notifier>,
    pub publisher: Arc<dyn EventPublisher>,
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub saga: AppSaga,
}

impl AppState {
    /// Builds the saga and starts its publish worker.
    ///
    /// The worker finishes once the state is dropped and queued events are
    /// delivered.
    pub fn new(backends: Backends, config: SagaConfig) -> (Arc<Self>, JoinHandle<()>) {
        let (queue, worker) = PublishQueue::spawn(backends.publisher, config.publish_retry.clone());
        let saga = CheckoutSaga::new(
            backends.store,
            backends.inventory,
            backends.payments,
            backends.notifier,
            queue,
            config,
        );
        (Arc::new(Self { saga }), worker)
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state((Arc::clone(&state), metrics_handle));

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/market/orders/checkout", post(routes::orders::checkout))
        .route("/market/orders/{id}", get(routes::orders::get))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
