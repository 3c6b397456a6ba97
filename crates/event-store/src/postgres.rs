use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::store::{EventStore, ExpectedVersion, inspect_batch};
use crate::{AggregateId, EventEnvelope, EventStoreError, Result, TenantId, Version};

const COLUMNS: &str =
    "id, aggregate_id, aggregate_type, tenant_id, version, event_type, payload, recorded_at";

/// Event store on the `events` table.
///
/// Appends take a transaction-scoped advisory lock on the stream, so writers
/// of one order queue behind each other while other orders proceed.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the workspace migrations (events, catalog and reservations).
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn lock_stream(tx: &mut Transaction<'_, Postgres>, aggregate_id: AggregateId) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(aggregate_id.to_string())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn current_version(
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: AggregateId,
    ) -> Result<Version> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&mut **tx)
                .await?;
        Ok(max.map_or(Version::initial(), Version::new))
    }

    fn decode_row(row: PgRow) -> Result<EventEnvelope> {
        Ok(EventEnvelope {
            event_id: row.try_get("id")?,
            aggregate_id: AggregateId::from_uuid(row.try_get("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            tenant_id: TenantId::new(row.try_get::<String, _>("tenant_id")?),
            version: Version::new(row.try_get("version")?),
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn append(
        &self,
        events: Vec<EventEnvelope>,
        expected: ExpectedVersion,
    ) -> Result<Version> {
        let batch = inspect_batch(&events)?;
        let aggregate_id = batch.aggregate_id;

        let mut tx = self.pool.begin().await?;
        Self::lock_stream(&mut tx, aggregate_id).await?;

        let current = Self::current_version(&mut tx, aggregate_id).await?;
        expected.check(aggregate_id, current)?;
        batch.continues(current)?;

        let ids: Vec<Uuid> = events.iter().map(|e| e.event_id).collect();
        let aggregate_ids: Vec<Uuid> = events.iter().map(|e| e.aggregate_id.as_uuid()).collect();
        let kinds: Vec<&str> = events.iter().map(|e| e.aggregate_type.as_str()).collect();
        let tenants: Vec<&str> = events.iter().map(|e| e.tenant_id.as_str()).collect();
        let versions: Vec<i64> = events.iter().map(|e| e.version.as_i64()).collect();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        let payloads: Vec<serde_json::Value> = events.iter().map(|e| e.payload.clone()).collect();
        let recorded: Vec<DateTime<Utc>> = events.iter().map(|e| e.recorded_at).collect();

        let insert = format!(
            "INSERT INTO events ({COLUMNS}) \
             SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::text[], $4::text[], \
             $5::bigint[], $6::text[], $7::jsonb[], $8::timestamptz[])"
        );
        sqlx::query(&insert)
            .bind(ids)
            .bind(aggregate_ids)
            .bind(kinds)
            .bind(tenants)
            .bind(versions)
            .bind(types)
            .bind(payloads)
            .bind(recorded)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db)
                    if db.constraint() == Some("unique_aggregate_version") =>
                {
                    EventStoreError::ConcurrencyConflict {
                        aggregate_id,
                        expected: current,
                        actual: batch.first,
                    }
                }
                other => EventStoreError::Database(other),
            })?;

        tx.commit().await?;
        metrics::counter!("event_store_appends_total").increment(1);
        Ok(batch.last)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let sql = format!("SELECT {COLUMNS} FROM events WHERE aggregate_id = $1 ORDER BY version");
        sqlx::query(&sql)
            .bind(aggregate_id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Self::decode_row)
            .collect()
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(max.map(Version::new))
    }

    async fn list_aggregate_ids(&self, aggregate_type: &str) -> Result<Vec<AggregateId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT aggregate_id FROM events \
             WHERE aggregate_type = $1 AND version = 1 \
             ORDER BY recorded_at, id",
        )
        .bind(aggregate_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(AggregateId::from_uuid).collect())
    }
}
