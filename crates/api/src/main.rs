//! API server entry point.

use std::sync::Arc;
use std::time::Duration;

use checkout_saga::{
    EventPublisher, HttpNotifier, HttpPaymentGateway, InMemoryEventBus, InMemoryInventory,
    InMemoryNotifier, InMemoryPaymentGateway, InventoryStore, Notifier, PaymentGateway,
    PostgresInventory,
};
use event_store::{EventStore, InMemoryEventStore, PostgresEventStore};
use market_api::config::{Config, LogFormat};
use market_api::{AppState, Backends};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn backends(config: &Config) -> Result<Backends, Box<dyn std::error::Error>> {
    let (store, inventory): (Arc<dyn EventStore>, Arc<dyn InventoryStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await?;
                let store = PostgresEventStore::new(pool.clone());
                store.run_migrations().await?;
                tracing::info!("using PostgreSQL for orders and stock");
                (Arc::new(store), Arc::new(PostgresInventory::new(pool)))
            }
            None => {
                tracing::warn!("DATABASE_URL not set, orders and stock are kept in memory");
                (
                    Arc::new(InMemoryEventStore::new()),
                    Arc::new(InMemoryInventory::new()),
                )
            }
        };

    let payments: Arc<dyn PaymentGateway> = match &config.payment_service_url {
        Some(url) => Arc::new(HttpPaymentGateway::new(url.as_str())),
        None => {
            tracing::warn!("PAYMENT_SERVICE_URL not set, payments are approved in memory");
            Arc::new(InMemoryPaymentGateway::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.notification_service_url {
        Some(url) => Arc::new(HttpNotifier::new(url.as_str())),
        None => Arc::new(InMemoryNotifier::new()),
    };

    let bus = InMemoryEventBus::new();
    let mut deliveries = bus.subscribe();
    tokio::spawn(async move {
        while let Ok(delivery) = deliveries.recv().await {
            tracing::info!(
                exchange = %delivery.exchange,
                routing_key = %delivery.routing_key,
                payload = %delivery.payload,
                "event delivered"
            );
        }
    });
    let publisher: Arc<dyn EventPublisher> = Arc::new(bus);

    Ok(Backends {
        store,
        inventory,
        payments,
        notifier,
        publisher,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Wire the saga
    let (state, publish_worker) = AppState::new(backends(&config).await?, config.to_saga_config());

    // 4. Compensate checkouts interrupted by a previous run
    let report = state.saga.recover_incomplete().await?;
    if !report.incomplete.is_empty() {
        tracing::warn!(
            incomplete = report.incomplete.len(),
            "some interrupted checkouts are still compensating"
        );
    }

    // 5. Start server
    let app = market_api::create_app(Arc::clone(&state), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 6. Let queued events go out
    drop(state);
    if tokio::time::timeout(Duration::from_secs(10), publish_worker)
        .await
        .is_err()
    {
        tracing::warn!("publish queue did not drain before shutdown");
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
