//! PostgreSQL inventory and checkout tests.
//!
//! These tests use a shared PostgreSQL container. Run with:
//!
//! ```bash
//! cargo test -p checkout-saga --test postgres_inventory -- --test-threads=1
//! ```

use std::sync::Arc;

use checkout_saga::{
    CheckoutError, CheckoutLine, CheckoutRequest, CheckoutSaga, InMemoryEventBus,
    InMemoryNotifier, InMemoryPaymentGateway, InventoryError, InventoryStore, PaymentBehavior,
    PostgresInventory, PublishQueue, SagaConfig,
};
use common::{AggregateId, TenantId};
use event_store::PostgresEventStore;
use market_domain::{BuyerId, CatalogItem, Money, OrderStatus, ProductId, SellerId};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresEventStore::new(pool.clone())
                .run_migrations()
                .await
                .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// A pool over emptied tables.
async fn fresh_pool() -> PgPool {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE stock_reservations, catalog_items, events")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

fn tenant() -> TenantId {
    TenantId::new("engineering")
}

async fn stocked(inventory: &PostgresInventory, stock: u32) -> ProductId {
    let item = CatalogItem::new(tenant(), SellerId::new(), "Beaker set", Money::from_cents(1200), stock);
    let id = item.id;
    inventory.add_item(&item).await.unwrap();
    id
}

async fn current(inventory: &PostgresInventory, id: ProductId) -> CatalogItem {
    inventory
        .find_by_ids_and_tenant(&[id], &tenant())
        .await
        .unwrap()
        .pop()
        .unwrap()
}

#[tokio::test]
#[serial]
async fn test_reserve_and_release_through_the_ledger() {
    let inventory = PostgresInventory::new(fresh_pool().await);
    let id = stocked(&inventory, 10).await;
    let order = AggregateId::new();

    inventory.reserve(order, &tenant(), id, 4).await.unwrap();
    inventory.reserve(order, &tenant(), id, 4).await.unwrap();
    let item = current(&inventory, id).await;
    assert_eq!(item.stock, 6);
    assert_eq!(item.revision, 1);

    inventory.release(order, &tenant(), id).await.unwrap();
    inventory.release(order, &tenant(), id).await.unwrap();
    assert_eq!(current(&inventory, id).await.stock, 10);

    assert!(matches!(
        inventory.reserve(order, &tenant(), id, 4).await,
        Err(InventoryError::ReservationReleased { .. })
    ));
}

#[tokio::test]
#[serial]
async fn test_settle_drops_released_rows_and_keeps_held_ones() {
    let pool = fresh_pool().await;
    let inventory = PostgresInventory::new(pool.clone());
    let id = stocked(&inventory, 10).await;
    let failed = AggregateId::new();
    let confirmed = AggregateId::new();

    inventory.reserve(failed, &tenant(), id, 2).await.unwrap();
    inventory.release(failed, &tenant(), id).await.unwrap();
    inventory.reserve(confirmed, &tenant(), id, 3).await.unwrap();

    inventory.settle(failed).await.unwrap();
    inventory.settle(confirmed).await.unwrap();

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_reservations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(current(&inventory, id).await.stock, 7);
}

#[tokio::test]
#[serial]
async fn test_oversized_quantity_is_refused_without_touching_stock() {
    let inventory = PostgresInventory::new(fresh_pool().await);
    let id = stocked(&inventory, 10).await;

    let err = inventory
        .reserve(AggregateId::new(), &tenant(), id, u32::MAX)
        .await
        .unwrap_err();

    assert!(matches!(err, InventoryError::Storage(_)));
    assert_eq!(current(&inventory, id).await.stock, 10);
}

#[tokio::test]
#[serial]
async fn test_insufficient_and_foreign_stock() {
    let inventory = PostgresInventory::new(fresh_pool().await);
    let id = stocked(&inventory, 2).await;

    assert!(matches!(
        inventory.reserve(AggregateId::new(), &tenant(), id, 5).await,
        Err(InventoryError::InsufficientStock { requested: 5, available: 2, .. })
    ));
    assert!(matches!(
        inventory
            .reserve(AggregateId::new(), &TenantId::new("medicine"), id, 1)
            .await,
        Err(InventoryError::ProductNotFound { .. })
    ));
    assert!(
        inventory
            .find_by_ids_and_tenant(&[id], &TenantId::new("medicine"))
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(current(&inventory, id).await.stock, 2);
}

#[tokio::test]
#[serial]
async fn test_concurrent_reservations_never_oversell() {
    let inventory = PostgresInventory::new(fresh_pool().await);
    let id = stocked(&inventory, 20).await;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let inventory = inventory.clone();
            tokio::spawn(async move {
                inventory
                    .reserve(AggregateId::new(), &tenant(), id, 3)
                    .await
                    .is_ok()
            })
        })
        .collect();

    let mut reserved = 0;
    for task in tasks {
        if task.await.unwrap() {
            reserved += 3;
        }
    }

    assert_eq!(reserved, 18);
    assert_eq!(current(&inventory, id).await.stock, 2);
}

#[tokio::test]
#[serial]
async fn test_checkout_against_postgres() {
    let pool = fresh_pool().await;
    let inventory = PostgresInventory::new(pool.clone());
    let payments = InMemoryPaymentGateway::new();
    let bus = InMemoryEventBus::new();
    let config = SagaConfig::default();
    let (queue, _worker) = PublishQueue::spawn(bus.clone(), config.publish_retry.clone());
    let saga = CheckoutSaga::new(
        PostgresEventStore::new(pool),
        inventory.clone(),
        payments.clone(),
        InMemoryNotifier::new(),
        queue,
        config,
    );
    let id = stocked(&inventory, 10).await;
    let line = |quantity| vec![CheckoutLine { product_id: id, quantity }];

    let order = saga
        .checkout(CheckoutRequest::new(tenant(), BuyerId::new(), line(3)))
        .await
        .unwrap();
    assert_eq!(order.status(), OrderStatus::Confirmed);
    assert_eq!(current(&inventory, id).await.stock, 7);

    payments.set_default(PaymentBehavior::Decline("no funds".to_string()));
    let request = CheckoutRequest::new(tenant(), BuyerId::new(), line(5)).with_idempotency_key("pg-declined");
    let order_id = request.order_id();
    assert!(matches!(
        saga.checkout(request).await,
        Err(CheckoutError::PaymentDeclined { .. })
    ));
    assert_eq!(current(&inventory, id).await.stock, 7);
    assert_eq!(
        saga.get_order(&tenant(), order_id).await.unwrap().status(),
        OrderStatus::Failed
    );
}
