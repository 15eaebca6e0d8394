//! Sync target entity and store contract.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use url::Url;

use config::shared::SyncSettings;

use crate::adapters::{POSTGRES_SCHEMES, SNOWFLAKE_SCHEMES};
use crate::bail;
use crate::connections::redact_url;
use crate::error::{ErrorKind, SyncResult};
use crate::stats::RollingStats;

/// How a destination URL is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    /// A database destination, reached through the connection cache and a
    /// database adapter.
    Database,
    /// An HTTPS endpoint receiving JSON envelopes.
    Http,
}

/// One recurring replication destination for one upstream data source.
///
/// Persisted; updated after every sync attempt. `last_synced_at` is the
/// inclusive upper bound of data already replicated and is monotonically
/// non-decreasing across successful runs.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncTarget {
    pub id: i64,
    /// Opaque external identity of the upstream integration.
    pub integration_id: String,
    pub integration_service: String,
    /// Destination URL, credentials embedded. Never logged raw.
    pub destination_url: String,
    /// Destination schema; falls back to the configured default.
    pub schema_override: Option<String>,
    /// Destination table; falls back to the source table's name.
    pub table_override: Option<String>,
    /// Desired sync period in seconds.
    pub period_secs: u32,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Text of the last DDL batch successfully applied, used to skip
    /// redundant schema operations.
    pub last_applied_schema: Option<String>,
    pub disabled: bool,
    /// Rows per HTTP chunk and per CSV page.
    pub page_size: u32,
    /// Concurrent chunk senders for HTTP destinations.
    pub parallelism: u32,
    pub stats: RollingStats,
}

impl SyncTarget {
    /// Whether this target should sync now: never synced, or the period has
    /// elapsed since the last successful position.
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        match self.last_synced_at {
            None => true,
            Some(last) => now >= last + Duration::seconds(i64::from(self.period_secs)),
        }
    }

    /// Destination schema name, defaulting to the configured schema.
    pub fn destination_schema(&self, settings: &SyncSettings) -> String {
        self.schema_override
            .clone()
            .unwrap_or_else(|| settings.default_schema.clone())
    }

    /// Destination table name, defaulting to the source table's name.
    pub fn destination_table(&self, source_table: &str) -> String {
        self.table_override
            .clone()
            .unwrap_or_else(|| source_table.to_string())
    }

    /// Credential-stripped URL, safe for logs and display.
    pub fn display_url(&self) -> String {
        redact_url(&self.destination_url)
    }

    /// Routes the destination by URL scheme.
    ///
    /// Plain `http` is only accepted when the settings explicitly allow it;
    /// it exists for local development.
    pub fn route(&self, settings: &SyncSettings) -> SyncResult<DestinationKind> {
        let url = Url::parse(&self.destination_url)?;
        let scheme = url.scheme();

        if POSTGRES_SCHEMES.contains(&scheme) || SNOWFLAKE_SCHEMES.contains(&scheme) {
            return Ok(DestinationKind::Database);
        }
        if scheme == "https" {
            return Ok(DestinationKind::Http);
        }
        if scheme == "http" {
            if settings.allow_insecure_http {
                return Ok(DestinationKind::Http);
            }
            bail!(
                ErrorKind::ConfigError,
                "Plain http destinations are not permitted",
                self.display_url()
            );
        }

        bail!(
            ErrorKind::UnsupportedScheme,
            "Destination URL scheme is not routable",
            format!(
                "'{scheme}' is not supported; expected one of: {}, {}, https",
                POSTGRES_SCHEMES.join(", "),
                SNOWFLAKE_SCHEMES.join(", ")
            )
        );
    }

    /// Validates the target against global settings before it is persisted.
    pub fn validate(&self, settings: &SyncSettings) -> SyncResult<()> {
        if self.page_size == 0 {
            bail!(
                ErrorKind::ConfigError,
                "Sync target page size must be at least 1"
            );
        }

        if self.period_secs == 0 || self.period_secs > settings.max_period_secs {
            bail!(
                ErrorKind::ConfigError,
                "Sync target period is out of range",
                format!(
                    "period {}s must be within 1..={}s",
                    self.period_secs, settings.max_period_secs
                )
            );
        }

        self.route(settings)?;

        Ok(())
    }
}

/// A held per-target advisory lock.
///
/// Released explicitly via [`TargetLock::release`], which surfaces release
/// errors. Dropping the guard releases the lock too, so a holder that
/// panics or errors out can never leave a target permanently stuck.
#[async_trait]
pub trait TargetLock: Send {
    async fn release(self: Box<Self>) -> SyncResult<()>;
}

/// Persistence contract for sync targets.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Loads a target by id; `None` when it does not exist.
    async fn load(&self, id: i64) -> SyncResult<Option<SyncTarget>>;

    /// Whether the target still exists. Used by the mid-run deletion check.
    async fn exists(&self, id: i64) -> SyncResult<bool>;

    /// Targets whose next-due time has passed, for the external scheduler.
    async fn due_targets(&self, now: DateTime<Utc>) -> SyncResult<Vec<SyncTarget>>;

    /// Persists the target's run state: position, applied schema, stats.
    async fn update_run_state(&self, target: &SyncTarget) -> SyncResult<()>;

    /// Inserts a new target, returning its assigned id.
    async fn create(&self, target: &SyncTarget) -> SyncResult<i64>;

    /// Removes a target.
    async fn delete(&self, id: i64) -> SyncResult<()>;

    /// Attempts the non-blocking per-target exclusive lock.
    ///
    /// `None` means the lock is already held and the target is syncing
    /// elsewhere; that is an expected outcome, not an error.
    async fn try_lock(&self, id: i64) -> SyncResult<Option<Box<dyn TargetLock>>>;
}
