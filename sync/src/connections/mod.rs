//! Destination connection layer.
//!
//! Defines the seams the engine talks through ([`DestinationConnection`],
//! [`Connector`]) and the process-wide [`ConnectionCache`] that lends out
//! pooled, reference-counted connections keyed by destination URL.

mod cache;
mod postgres;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::SyncResult;

pub use cache::{BorrowOptions, ConnectionCache, redact_url};
pub use postgres::{PgConnection, PgConnector};

/// A live session with one destination.
///
/// Implementations are shared between concurrent borrowers of the same URL,
/// so they must be internally synchronized. Postgres destinations are covered
/// by [`PgConnection`]; warehouse drivers plug in through [`Connector`].
#[async_trait]
pub trait DestinationConnection: Send + Sync {
    /// Executes a single SQL statement, returning the affected row count.
    async fn execute(&self, sql: &str) -> SyncResult<u64>;

    /// Bulk-loads a headered CSV file into the named table.
    ///
    /// `columns` gives the CSV column order; the table name arrives already
    /// quoted by the adapter.
    async fn load_csv(&self, table: &str, columns: &[String], path: &Path) -> SyncResult<u64>;

    /// Uploads a local file to a remote stage (warehouse families only).
    async fn stage_put(&self, stage: &str, path: &Path) -> SyncResult<()>;

    /// Removes a previously staged file (warehouse families only).
    async fn stage_remove(&self, stage: &str) -> SyncResult<()>;

    /// Whether this connection type honors per-statement timeouts.
    fn supports_statement_timeout(&self) -> bool {
        false
    }

    /// Sets or resets (`None`) the session statement timeout.
    async fn set_statement_timeout(&self, timeout: Option<Duration>) -> SyncResult<()>;

    /// Closes the underlying session.
    async fn close(&self);
}

/// Opens connections for destination URLs.
///
/// Injected into the [`ConnectionCache`] so the engine never hard-codes a
/// driver; tests substitute a recording implementation.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> SyncResult<Arc<dyn DestinationConnection>>;
}
