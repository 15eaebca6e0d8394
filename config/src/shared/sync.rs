use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Settings consumed by the sync engine.
///
/// These are global knobs; per-destination settings (period, page size,
/// parallelism) live on the persisted sync target itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncSettings {
    /// Destination schema used when a sync target does not override it.
    #[serde(default = "default_schema")]
    pub default_schema: String,
    /// Absolute upper bound, in seconds, on a sync target's period.
    #[serde(default = "default_max_period_secs")]
    pub max_period_secs: u32,
    /// Whether plain `http` destinations are permitted.
    ///
    /// Off by default; exists only for local development against a
    /// non-TLS receiver.
    #[serde(default)]
    pub allow_insecure_http: bool,
    /// Maximum wall-clock duration, in milliseconds, a single run may use
    /// before it suspends itself and asks to be continued.
    ///
    /// `None` means runs are not time-boxed.
    #[serde(default)]
    pub max_run_duration_ms: Option<u64>,
    /// Minimum interval, in seconds, between idle-connection sweeps of the
    /// connection cache.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
    /// Maximum number of retained sync attempt statistics per target.
    #[serde(default = "default_stats_cap")]
    pub stats_cap: usize,
    /// Connect timeout for HTTP destinations, in milliseconds.
    #[serde(default = "default_http_connect_timeout_ms")]
    pub http_connect_timeout_ms: u64,
    /// Read timeout for HTTP destinations, in milliseconds.
    #[serde(default = "default_http_read_timeout_ms")]
    pub http_read_timeout_ms: u64,
}

impl SyncSettings {
    /// Validates the settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_schema.is_empty() {
            return Err(ValidationError::DefaultSchemaEmpty);
        }

        if self.max_period_secs == 0 {
            return Err(ValidationError::MaxPeriodZero);
        }

        if self.prune_interval_secs == 0 {
            return Err(ValidationError::PruneIntervalZero);
        }

        if self.stats_cap == 0 {
            return Err(ValidationError::StatsCapZero);
        }

        Ok(())
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_schema: default_schema(),
            max_period_secs: default_max_period_secs(),
            allow_insecure_http: false,
            max_run_duration_ms: None,
            prune_interval_secs: default_prune_interval_secs(),
            stats_cap: default_stats_cap(),
            http_connect_timeout_ms: default_http_connect_timeout_ms(),
            http_read_timeout_ms: default_http_read_timeout_ms(),
        }
    }
}

fn default_schema() -> String {
    "public".to_string()
}

const fn default_max_period_secs() -> u32 {
    86_400
}

const fn default_prune_interval_secs() -> u64 {
    120
}

const fn default_stats_cap() -> usize {
    200
}

const fn default_http_connect_timeout_ms() -> u64 {
    5_000
}

const fn default_http_read_timeout_ms() -> u64 {
    30_000
}
