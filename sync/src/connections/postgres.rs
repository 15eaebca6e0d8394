//! sqlx-backed connection for Postgres-family destinations.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgPoolCopyExt, PgPoolOptions};
use tracing::debug;
use url::Url;

use crate::bail;
use crate::connections::{Connector, DestinationConnection};
use crate::error::{ErrorKind, SyncResult};

/// One cached connection per destination URL; the cache layer does the
/// multiplexing, so the pool never needs more.
const NUM_POOL_CONNECTIONS: u32 = 1;

/// A Postgres destination session.
///
/// Wraps a single-connection [`PgPool`] so the session survives borrow/return
/// cycles and statement-level helpers stay `&self`.
pub struct PgConnection {
    pool: PgPool,
}

impl PgConnection {
    /// Opens a session against the given destination URL.
    ///
    /// Connection failures (bad credentials, unreachable host) propagate
    /// as-is to the caller.
    pub async fn open(url: &Url) -> SyncResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(NUM_POOL_CONNECTIONS)
            .connect(url.as_str())
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl DestinationConnection for PgConnection {
    async fn execute(&self, sql: &str) -> SyncResult<u64> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn load_csv(&self, table: &str, columns: &[String], path: &Path) -> SyncResult<u64> {
        let statement = format!(
            "COPY {table} ({}) FROM STDIN WITH (FORMAT csv, HEADER true)",
            columns.join(", ")
        );

        let contents = tokio::fs::read(path).await?;

        let mut copy = self.pool.copy_in_raw(&statement).await?;
        copy.send(contents).await?;
        let rows = copy.finish().await?;

        debug!(table = %table, rows, "bulk-loaded csv");

        Ok(rows)
    }

    async fn stage_put(&self, _stage: &str, _path: &Path) -> SyncResult<()> {
        bail!(
            ErrorKind::InvalidState,
            "Postgres connections have no remote stage"
        );
    }

    async fn stage_remove(&self, _stage: &str) -> SyncResult<()> {
        bail!(
            ErrorKind::InvalidState,
            "Postgres connections have no remote stage"
        );
    }

    fn supports_statement_timeout(&self) -> bool {
        true
    }

    async fn set_statement_timeout(&self, timeout: Option<Duration>) -> SyncResult<()> {
        match timeout {
            Some(timeout) => {
                self.execute(&format!("SET statement_timeout = {}", timeout.as_millis()))
                    .await?;
            }
            None => {
                self.execute("RESET statement_timeout").await?;
            }
        }

        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Opens [`PgConnection`]s for Postgres-family URLs.
#[derive(Debug, Default)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, url: &Url) -> SyncResult<Arc<dyn DestinationConnection>> {
        let connection = PgConnection::open(url).await?;
        Ok(Arc::new(connection))
    }
}
