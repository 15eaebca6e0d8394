//! Rolling per-attempt statistics.
//!
//! Each chunk or flush appends one [`SyncAttemptStat`]; the list is capped
//! and the oldest entries are evicted first. Stats feed the user-visible
//! rolling summary and are never consulted for correctness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncAttemptStat {
    /// When the attempt started.
    pub called_at: DateTime<Utc>,
    /// When the remote call actually went out; differs from `called_at`
    /// under queuing inside the sender pool.
    pub remote_called_at: Option<DateTime<Utc>>,
    /// Rows flushed or posted in this attempt.
    pub row_count: u64,
    /// HTTP response status, when the destination is an endpoint.
    pub response_status: Option<u16>,
    /// Captured failure summary, if the attempt failed.
    pub error: Option<String>,
}

/// Capped list of recent attempts, persisted with the sync target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RollingStats {
    entries: Vec<SyncAttemptStat>,
}

impl RollingStats {
    /// Appends a stat, evicting the oldest entries beyond `cap`.
    pub fn push(&mut self, stat: SyncAttemptStat, cap: usize) {
        self.entries.push(stat);
        if self.entries.len() > cap {
            let excess = self.entries.len() - cap;
            self.entries.drain(..excess);
        }
    }

    pub fn entries(&self) -> &[SyncAttemptStat] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Aggregates the rolling window for display.
    pub fn summary(&self) -> StatsSummary {
        let mut summary = StatsSummary {
            attempts: self.entries.len() as u64,
            ..Default::default()
        };

        let mut latency_total_ms: i64 = 0;
        let mut latency_samples: i64 = 0;

        for stat in &self.entries {
            summary.total_rows += stat.row_count;
            if stat.error.is_some() {
                summary.error_count += 1;
            }
            if let Some(remote) = stat.remote_called_at {
                latency_total_ms += (remote - stat.called_at).num_milliseconds();
                latency_samples += 1;
            }

            summary.earliest_called_at = Some(match summary.earliest_called_at {
                Some(earliest) => earliest.min(stat.called_at),
                None => stat.called_at,
            });
            summary.latest_called_at = Some(match summary.latest_called_at {
                Some(latest) => latest.max(stat.called_at),
                None => stat.called_at,
            });
        }

        if latency_samples > 0 {
            summary.average_queue_latency_ms = Some(latency_total_ms / latency_samples);
        }

        summary
    }
}

/// User-visible aggregate over the rolling window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSummary {
    pub attempts: u64,
    pub error_count: u64,
    pub total_rows: u64,
    /// Average delay between attempt start and the remote call going out.
    pub average_queue_latency_ms: Option<i64>,
    pub earliest_called_at: Option<DateTime<Utc>>,
    pub latest_called_at: Option<DateTime<Utc>>,
}
