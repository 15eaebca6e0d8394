//! Postgres-backed target store.
//!
//! One row per sync target; attempt statistics are kept as a JSONB array in
//! the same row. The per-target mutual exclusion lock is a Postgres advisory
//! lock held on a dedicated pooled connection, so a crashed worker releases
//! it implicitly when its session ends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Row, postgres::PgRow};
use tracing::debug;

use crate::error::SyncResult;
use crate::stats::RollingStats;
use crate::store::{SyncTarget, TargetLock, TargetStore};

/// Application-chosen namespace for advisory lock keys, so target locks can
/// never collide with other advisory lock users on the same database.
const LOCK_NAMESPACE: i64 = 0x5359;

/// Small fixed pool; one connection services queries, the rest hold locks.
const STORE_POOL_CONNECTIONS: u32 = 4;

const SELECT_COLUMNS: &str = "id, integration_id, integration_service, destination_url, \
     schema_override, table_override, period_secs, last_synced_at, \
     last_applied_schema, disabled, page_size, parallelism, stats";

pub struct PostgresTargetStore {
    pool: PgPool,
}

impl PostgresTargetStore {
    /// Connects to the state database.
    pub async fn connect(url: &str) -> SyncResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(STORE_POOL_CONNECTIONS)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Creates the backing table if it does not exist.
    pub async fn setup(&self) -> SyncResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_targets (
                id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
                integration_id TEXT NOT NULL,
                integration_service TEXT NOT NULL,
                destination_url TEXT NOT NULL,
                schema_override TEXT,
                table_override TEXT,
                period_secs INTEGER NOT NULL,
                last_synced_at TIMESTAMPTZ,
                last_applied_schema TEXT,
                disabled BOOLEAN NOT NULL DEFAULT FALSE,
                page_size INTEGER NOT NULL,
                parallelism INTEGER NOT NULL DEFAULT 1,
                stats JSONB NOT NULL DEFAULT '[]'::jsonb
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn target_from_row(row: &PgRow) -> SyncResult<SyncTarget> {
        let stats_value: serde_json::Value = row.try_get("stats")?;
        let stats: RollingStats = serde_json::from_value(stats_value)?;

        Ok(SyncTarget {
            id: row.try_get("id")?,
            integration_id: row.try_get("integration_id")?,
            integration_service: row.try_get("integration_service")?,
            destination_url: row.try_get("destination_url")?,
            schema_override: row.try_get("schema_override")?,
            table_override: row.try_get("table_override")?,
            period_secs: row.try_get::<i32, _>("period_secs")? as u32,
            last_synced_at: row.try_get("last_synced_at")?,
            last_applied_schema: row.try_get("last_applied_schema")?,
            disabled: row.try_get("disabled")?,
            page_size: row.try_get::<i32, _>("page_size")? as u32,
            parallelism: row.try_get::<i32, _>("parallelism")? as u32,
            stats,
        })
    }
}

/// Combines the fixed namespace with the target id into one 64-bit advisory
/// lock key.
fn lock_key(id: i64) -> i64 {
    (LOCK_NAMESPACE << 32) | (id as u32 as i64)
}

#[async_trait]
impl TargetStore for PostgresTargetStore {
    async fn load(&self, id: i64) -> SyncResult<Option<SyncTarget>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM sync_targets WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::target_from_row).transpose()
    }

    async fn exists(&self, id: i64) -> SyncResult<bool> {
        let row = sqlx::query("SELECT 1 FROM sync_targets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    async fn due_targets(&self, now: DateTime<Utc>) -> SyncResult<Vec<SyncTarget>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM sync_targets \
             WHERE disabled = FALSE \
               AND (last_synced_at IS NULL \
                    OR last_synced_at + make_interval(secs => period_secs) <= $1) \
             ORDER BY id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::target_from_row).collect()
    }

    async fn update_run_state(&self, target: &SyncTarget) -> SyncResult<()> {
        let stats = serde_json::to_value(&target.stats)?;

        sqlx::query(
            "UPDATE sync_targets \
             SET last_synced_at = $2, last_applied_schema = $3, stats = $4 \
             WHERE id = $1",
        )
        .bind(target.id)
        .bind(target.last_synced_at)
        .bind(&target.last_applied_schema)
        .bind(stats)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create(&self, target: &SyncTarget) -> SyncResult<i64> {
        let stats = serde_json::to_value(&target.stats)?;

        let row = sqlx::query(
            "INSERT INTO sync_targets (integration_id, integration_service, \
                 destination_url, schema_override, table_override, period_secs, \
                 last_synced_at, last_applied_schema, disabled, page_size, \
                 parallelism, stats) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING id",
        )
        .bind(&target.integration_id)
        .bind(&target.integration_service)
        .bind(&target.destination_url)
        .bind(&target.schema_override)
        .bind(&target.table_override)
        .bind(target.period_secs as i32)
        .bind(target.last_synced_at)
        .bind(&target.last_applied_schema)
        .bind(target.disabled)
        .bind(target.page_size as i32)
        .bind(target.parallelism as i32)
        .bind(stats)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn delete(&self, id: i64) -> SyncResult<()> {
        sqlx::query("DELETE FROM sync_targets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn try_lock(&self, id: i64) -> SyncResult<Option<Box<dyn TargetLock>>> {
        // The lock must outlive individual statements, so it is taken on a
        // connection checked out for the lock's whole lifetime.
        let mut connection = self.pool.acquire().await?;
        let key = lock_key(id);

        let row = sqlx::query("SELECT pg_try_advisory_lock($1) AS locked")
            .bind(key)
            .fetch_one(&mut *connection)
            .await?;
        let locked: bool = row.try_get("locked")?;

        if !locked {
            debug!(target_id = id, "target advisory lock is contended");
            return Ok(None);
        }

        Ok(Some(Box::new(PgTargetLock {
            connection: Some(connection),
            key,
        })))
    }
}

struct PgTargetLock {
    connection: Option<sqlx::pool::PoolConnection<sqlx::Postgres>>,
    key: i64,
}

#[async_trait]
impl TargetLock for PgTargetLock {
    async fn release(mut self: Box<Self>) -> SyncResult<()> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };

        let unlocked = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut *connection)
            .await;
        if let Err(err) = unlocked {
            // The session still holds the lock; closing the session instead
            // of returning it to the pool releases the key server-side.
            drop(connection.detach());
            return Err(err.into());
        }

        Ok(())
    }
}

impl Drop for PgTargetLock {
    fn drop(&mut self) {
        // A guard dropped without `release` must not hand its session back
        // to the pool with the advisory lock still held. Detaching the
        // connection closes the session, which releases the lock.
        if let Some(connection) = self.connection.take() {
            drop(connection.detach());
        }
    }
}
