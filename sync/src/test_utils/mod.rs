//! Shared fakes and fixtures for unit and integration tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use url::Url;

use crate::adapters::{ColumnKind, ColumnSpec};
use crate::connections::{Connector, DestinationConnection};
use crate::error::{ErrorKind, SyncResult};
use crate::source::{ColumnCatalog, SourceDataset, SourceRow};
use crate::sync_error;

/// A recorded CSV bulk load.
#[derive(Debug, Clone)]
pub struct RecordedLoad {
    pub table: String,
    pub columns: Vec<String>,
    pub path: PathBuf,
    /// File contents captured at load time, since the spool is deleted
    /// after the run.
    pub contents: String,
}

/// Recording destination connection.
///
/// Executes nothing; remembers every statement, load, stage operation, and
/// timeout change. `load_csv` returns the number of data rows in the file so
/// merge row counts behave like a real destination.
pub struct FakeConnection {
    supports_timeout: bool,
    fail_execute_containing: Option<String>,
    executed: Mutex<Vec<String>>,
    timeouts: Mutex<Vec<Option<Duration>>>,
    loads: Mutex<Vec<RecordedLoad>>,
    staged: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl FakeConnection {
    fn new(supports_timeout: bool, fail_execute_containing: Option<String>) -> Self {
        Self {
            supports_timeout,
            fail_execute_containing,
            executed: Mutex::new(Vec::new()),
            timeouts: Mutex::new(Vec::new()),
            loads: Mutex::new(Vec::new()),
            staged: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().expect("executed mutex poisoned").clone()
    }

    pub fn timeouts(&self) -> Vec<Option<Duration>> {
        self.timeouts.lock().expect("timeouts mutex poisoned").clone()
    }

    pub fn loads(&self) -> Vec<RecordedLoad> {
        self.loads.lock().expect("loads mutex poisoned").clone()
    }

    pub fn staged(&self) -> Vec<String> {
        self.staged.lock().expect("staged mutex poisoned").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Statements containing any recorded DDL keyword, for schema assertions.
    pub fn executed_matching(&self, needle: &str) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter(|sql| sql.contains(needle))
            .collect()
    }
}

#[async_trait]
impl DestinationConnection for FakeConnection {
    async fn execute(&self, sql: &str) -> SyncResult<u64> {
        if let Some(needle) = &self.fail_execute_containing {
            if sql.contains(needle.as_str()) {
                return Err(sync_error!(
                    ErrorKind::DestinationQueryFailed,
                    "Statement failed",
                    sql.to_string()
                ));
            }
        }

        self.executed
            .lock()
            .expect("executed mutex poisoned")
            .push(sql.to_string());
        Ok(0)
    }

    async fn load_csv(&self, table: &str, columns: &[String], path: &Path) -> SyncResult<u64> {
        let contents = std::fs::read_to_string(path)?;
        let data_rows = contents.lines().count().saturating_sub(1) as u64;

        self.loads.lock().expect("loads mutex poisoned").push(RecordedLoad {
            table: table.to_string(),
            columns: columns.to_vec(),
            path: path.to_path_buf(),
            contents,
        });

        Ok(data_rows)
    }

    async fn stage_put(&self, stage: &str, _path: &Path) -> SyncResult<()> {
        self.staged
            .lock()
            .expect("staged mutex poisoned")
            .push(format!("PUT {stage}"));
        Ok(())
    }

    async fn stage_remove(&self, stage: &str) -> SyncResult<()> {
        self.staged
            .lock()
            .expect("staged mutex poisoned")
            .push(format!("REMOVE {stage}"));
        Ok(())
    }

    fn supports_statement_timeout(&self) -> bool {
        self.supports_timeout
    }

    async fn set_statement_timeout(&self, timeout: Option<Duration>) -> SyncResult<()> {
        self.timeouts
            .lock()
            .expect("timeouts mutex poisoned")
            .push(timeout);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out [`FakeConnection`]s, one fresh connection per
/// distinct URL per open.
pub struct FakeConnector {
    supports_timeout: bool,
    fail_connects: bool,
    fail_execute_containing: Option<String>,
    connections: Mutex<HashMap<String, Vec<Arc<FakeConnection>>>>,
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self {
            supports_timeout: true,
            fail_connects: false,
            fail_execute_containing: None,
            connections: Mutex::new(HashMap::new()),
        }
    }
}

impl FakeConnector {
    pub fn without_timeout_support() -> Self {
        Self {
            supports_timeout: false,
            ..Default::default()
        }
    }

    pub fn failing_connects() -> Self {
        Self {
            fail_connects: true,
            ..Default::default()
        }
    }

    /// Connections whose `execute` fails for statements containing `needle`.
    pub fn failing_statements(needle: impl Into<String>) -> Self {
        Self {
            fail_execute_containing: Some(needle.into()),
            ..Default::default()
        }
    }

    /// Number of times a connection was opened for `url`.
    pub fn connect_count(&self, url: &str) -> usize {
        self.connections
            .lock()
            .expect("connections mutex poisoned")
            .get(url)
            .map_or(0, Vec::len)
    }

    /// The most recently opened connection for `url`.
    pub fn connection(&self, url: &str) -> Option<Arc<FakeConnection>> {
        self.connections
            .lock()
            .expect("connections mutex poisoned")
            .get(url)
            .and_then(|opened| opened.last().cloned())
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &Url) -> SyncResult<Arc<dyn DestinationConnection>> {
        if self.fail_connects {
            return Err(sync_error!(
                ErrorKind::InvalidConnection,
                "Connection refused",
                url.host_str().unwrap_or("unknown host").to_string()
            ));
        }

        let connection = Arc::new(FakeConnection::new(
            self.supports_timeout,
            self.fail_execute_containing.clone(),
        ));
        self.connections
            .lock()
            .expect("connections mutex poisoned")
            .entry(url.to_string())
            .or_default()
            .push(connection.clone());

        Ok(connection)
    }
}

/// In-memory timestamp-ordered dataset.
pub struct MemorySource {
    catalog: ColumnCatalog,
    rows: Mutex<Vec<SourceRow>>,
}

impl MemorySource {
    pub fn new(catalog: ColumnCatalog) -> Self {
        Self {
            catalog,
            rows: Mutex::new(Vec::new()),
        }
    }

    pub fn with_catalog() -> Self {
        Self::new(catalog_fixture())
    }

    pub fn push_row(&self, row: SourceRow) {
        let mut rows = self.rows.lock().expect("rows mutex poisoned");
        rows.push(row);
        rows.sort_by_key(|row| row.timestamp);
    }
}

#[async_trait]
impl SourceDataset for MemorySource {
    fn column_catalog(&self) -> &ColumnCatalog {
        &self.catalog
    }

    async fn fetch_window(
        &self,
        lower_exclusive: Option<DateTime<Utc>>,
        upper_inclusive: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> SyncResult<Vec<SourceRow>> {
        let rows = self.rows.lock().expect("rows mutex poisoned");
        Ok(rows
            .iter()
            .filter(|row| {
                lower_exclusive.is_none_or(|lower| row.timestamp > lower)
                    && row.timestamp <= upper_inclusive
            })
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Catalog shaped like the upstream replicator's output: numeric primary
/// key, remote key, one denormalized scalar, and the structured payload.
pub fn catalog_fixture() -> ColumnCatalog {
    ColumnCatalog {
        table: "events".to_string(),
        primary_key: ColumnSpec::primary_key("pk", ColumnKind::BigInt),
        remote_key: ColumnSpec::plain("remote_key", ColumnKind::Text),
        denormalized: vec![ColumnSpec::plain("amount", ColumnKind::DoublePrecision)],
        data: ColumnSpec::plain("data", ColumnKind::Json),
        timestamp_column: "created_at".to_string(),
    }
}

/// A row matching [`catalog_fixture`]'s column order.
pub fn row_fixture(pk: i64, timestamp: DateTime<Utc>) -> SourceRow {
    SourceRow {
        timestamp,
        cells: vec![
            json!(pk),
            json!(format!("rk_{pk}")),
            json!(1.5),
            json!({"id": pk, "kind": "event"}),
        ],
    }
}
