//! Upstream collaborator contract.
//!
//! The replicator that turns raw webhook bodies into typed rows lives outside
//! this crate. The engine consumes it through [`SourceDataset`]: a read-only,
//! timestamp-ordered view plus the column catalog describing exactly what
//! gets replicated.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::adapters::ColumnSpec;
use crate::error::SyncResult;

/// Describes the replicated shape of one upstream dataset.
///
/// The catalog is rebuilt fresh by the upstream on every sync, so destination
/// tables follow the source additively as new denormalized columns appear.
#[derive(Debug, Clone)]
pub struct ColumnCatalog {
    /// Source table name, also the default destination table name.
    pub table: String,
    /// Numeric primary key column.
    pub primary_key: ColumnSpec,
    /// Stable identifier assigned by the remote service.
    pub remote_key: ColumnSpec,
    /// Scalar columns extracted from the raw payload.
    pub denormalized: Vec<ColumnSpec>,
    /// Catch-all structured payload column.
    pub data: ColumnSpec,
    /// Name of the column rows are windowed and ordered by.
    pub timestamp_column: String,
}

impl ColumnCatalog {
    /// All replicated columns in wire order: primary key, remote key,
    /// denormalized columns, then the structured payload.
    ///
    /// [`SourceRow::cells`] is aligned to this order.
    pub fn all_columns(&self) -> Vec<ColumnSpec> {
        let mut columns = Vec::with_capacity(3 + self.denormalized.len());
        columns.push(self.primary_key.clone());
        columns.push(self.remote_key.clone());
        columns.extend(self.denormalized.iter().cloned());
        columns.push(self.data.clone());
        columns
    }
}

/// One upstream row, positioned on the dataset's timestamp axis.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    /// Value of the catalog's timestamp column for this row.
    pub timestamp: DateTime<Utc>,
    /// Cell values aligned to [`ColumnCatalog::all_columns`].
    pub cells: Vec<serde_json::Value>,
}

/// Read-only, timestamp-ordered view over the upstream dataset.
#[async_trait]
pub trait SourceDataset: Send + Sync {
    /// The catalog describing what this dataset replicates.
    fn column_catalog(&self) -> &ColumnCatalog;

    /// Fetches one page of rows inside the window
    /// `(lower_exclusive, upper_inclusive]`, ordered by timestamp ascending.
    ///
    /// `lower_exclusive` of `None` means an unbounded start (first run).
    async fn fetch_window(
        &self,
        lower_exclusive: Option<DateTime<Utc>>,
        upper_inclusive: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> SyncResult<Vec<SourceRow>>;
}
