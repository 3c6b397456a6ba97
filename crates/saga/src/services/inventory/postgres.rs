//! PostgreSQL inventory with conditional stock updates.

use async_trait::async_trait;
use common::{AggregateId, TenantId};
use market_domain::{CatalogItem, Money, ProductId, SellerId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use super::{InventoryError, InventoryStore};

const RESERVED: &str = "RESERVED";
const RELEASED: &str = "RELEASED";

/// PostgreSQL-backed inventory store.
///
/// A reservation is one transaction: a conditional
/// `UPDATE ... WHERE stock >= $q` plus a `stock_reservations` ledger row.
/// Release flips the ledger row to `RELEASED` and adds the units back in the
/// same transaction, so a second release finds nothing to flip.
#[derive(Clone)]
pub struct PostgresInventory {
    pool: PgPool,
}

impl PostgresInventory {
    /// Creates a new PostgreSQL inventory store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a catalog item.
    pub async fn add_item(&self, item: &CatalogItem) -> Result<(), InventoryError> {
        sqlx::query(
            r#"
            INSERT INTO catalog_items (id, tenant_id, seller_id, name, description, price_cents, stock, revision)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.tenant_id.as_str())
        .bind(item.seller_id.as_uuid())
        .bind(&item.name)
        .bind(&item.description)
        .bind(item.unit_price.cents())
        .bind(stock_to_db(item.stock)?)
        .bind(item.revision as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_item(row: PgRow) -> Result<CatalogItem, InventoryError> {
        Ok(CatalogItem {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id")?),
            seller_id: SellerId::from_uuid(row.try_get::<Uuid, _>("seller_id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            unit_price: Money::from_cents(row.try_get("price_cents")?),
            stock: u32::try_from(row.try_get::<i32, _>("stock")?).unwrap_or(0),
            revision: u64::try_from(row.try_get::<i64, _>("revision")?).unwrap_or(0),
        })
    }
}

/// Stock columns are `INTEGER`; larger counts are refused rather than
/// clamped.
fn stock_to_db(units: u32) -> Result<i32, InventoryError> {
    i32::try_from(units).map_err(|_| {
        InventoryError::Storage(format!(
            "{units} units exceed the largest stock count the database holds"
        ))
    })
}

#[async_trait]
impl InventoryStore for PostgresInventory {
    async fn find_by_ids_and_tenant(
        &self,
        ids: &[ProductId],
        tenant: &TenantId,
    ) -> Result<Vec<CatalogItem>, InventoryError> {
        let ids: Vec<Uuid> = ids.iter().map(ProductId::as_uuid).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, seller_id, name, description, price_cents, stock, revision
            FROM catalog_items
            WHERE id = ANY($1) AND tenant_id = $2
            "#,
        )
        .bind(&ids)
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_item).collect()
    }

    #[tracing::instrument(skip(self, tenant), fields(tenant = %tenant))]
    async fn reserve(
        &self,
        order_id: AggregateId,
        tenant: &TenantId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<(), InventoryError> {
        let units = stock_to_db(quantity)?;
        let mut tx = self.pool.begin().await?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT status FROM stock_reservations WHERE order_id = $1 AND product_id = $2",
        )
        .bind(order_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        match existing.as_deref() {
            Some(RESERVED) => return Ok(()),
            Some(_) => {
                return Err(InventoryError::ReservationReleased {
                    order_id,
                    product_id,
                });
            }
            None => {}
        }

        let updated = sqlx::query(
            r#"
            UPDATE catalog_items
            SET stock = stock - $3, revision = revision + 1
            WHERE id = $1 AND tenant_id = $2 AND stock >= $3
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(tenant.as_str())
        .bind(units)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let available: Option<i32> = sqlx::query_scalar(
                "SELECT stock FROM catalog_items WHERE id = $1 AND tenant_id = $2",
            )
            .bind(product_id.as_uuid())
            .bind(tenant.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            metrics::counter!("inventory_reservations_total", "outcome" => "insufficient")
                .increment(1);
            return Err(match available {
                None => InventoryError::ProductNotFound { product_id },
                Some(stock) => InventoryError::InsufficientStock {
                    product_id,
                    requested: quantity,
                    available: u32::try_from(stock).unwrap_or(0),
                },
            });
        }

        sqlx::query(
            r#"
            INSERT INTO stock_reservations (order_id, product_id, tenant_id, quantity, status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(tenant.as_str())
        .bind(units)
        .bind(RESERVED)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        metrics::counter!("inventory_reservations_total", "outcome" => "reserved").increment(1);
        Ok(())
    }

    #[tracing::instrument(skip(self, tenant), fields(tenant = %tenant))]
    async fn release(
        &self,
        order_id: AggregateId,
        tenant: &TenantId,
        product_id: ProductId,
    ) -> Result<(), InventoryError> {
        let mut tx = self.pool.begin().await?;

        let quantity: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE stock_reservations
            SET status = $4, updated_at = NOW()
            WHERE order_id = $1 AND product_id = $2 AND tenant_id = $3 AND status = $5
            RETURNING quantity
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(product_id.as_uuid())
        .bind(tenant.as_str())
        .bind(RELEASED)
        .bind(RESERVED)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(quantity) = quantity else {
            return Ok(());
        };

        sqlx::query(
            r#"
            UPDATE catalog_items
            SET stock = stock + $2, revision = revision + 1
            WHERE id = $1
            "#,
        )
        .bind(product_id.as_uuid())
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        metrics::counter!("inventory_reservations_total", "outcome" => "released").increment(1);
        Ok(())
    }

    /// Released rows carry nothing once the order is terminal; rows still
    /// `RESERVED` record what a confirmed order took and are kept.
    async fn settle(&self, order_id: AggregateId) -> Result<(), InventoryError> {
        sqlx::query("DELETE FROM stock_reservations WHERE order_id = $1 AND status = $2")
            .bind(order_id.as_uuid())
            .bind(RELEASED)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_beyond_integer_column_is_refused() {
        assert_eq!(stock_to_db(0).unwrap(), 0);
        assert_eq!(stock_to_db(i32::MAX as u32).unwrap(), i32::MAX);
        assert!(matches!(
            stock_to_db(i32::MAX as u32 + 1),
            Err(InventoryError::Storage(_))
        ));
        assert!(matches!(stock_to_db(u32::MAX), Err(InventoryError::Storage(_))));
    }
}
