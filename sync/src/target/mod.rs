//! Sync run orchestration.
//!
//! [`run_sync`] is the state machine driving one recurring replication job:
//! lock, window, route by destination scheme, deliver, checkpoint. Contention
//! and deletion are outcomes, not errors, so the external scheduler cannot
//! forget to handle them.

mod http;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use url::Url;

use config::shared::SyncSettings;

use crate::adapters::{SchemaSpec, TableSpec, adapter_for};
use crate::connections::{BorrowOptions, ConnectionCache};
use crate::error::SyncResult;
use crate::export::CsvSpool;
use crate::source::SourceDataset;
use crate::stats::SyncAttemptStat;
use crate::store::{DestinationKind, SyncTarget, TargetStore};

pub use http::build_http_client;

/// Result of one `run_sync` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The whole window was replicated and the position advanced to `now`.
    Completed { rows: u64 },
    /// Another run holds the target's lock.
    AlreadyRunning,
    /// The target is disabled; nothing was attempted.
    Disabled,
    /// The target no longer exists (before the run, or deleted mid-run).
    Deleted,
    /// The time budget expired mid-run; progress so far is persisted and the
    /// caller should re-enqueue a continuation.
    Suspended { rows: u64 },
    /// A transport failure stopped HTTP delivery; progress up to the last
    /// contiguous successful chunk is persisted and the next scheduled run
    /// resumes from there.
    DeliveryInterrupted { rows: u64 },
}

/// Collaborators for sync runs, injected rather than ambient.
pub struct SyncContext {
    pub store: Arc<dyn TargetStore>,
    pub cache: Arc<ConnectionCache>,
    pub source: Arc<dyn SourceDataset>,
    pub http: reqwest::Client,
    pub settings: SyncSettings,
}

/// Wall-clock budget for one run, checked at chunk boundaries.
///
/// Workers running inside a time-boxed context pass a deadline; outside one,
/// the budget is unbounded and the check is a no-op.
#[derive(Debug, Clone, Copy)]
pub struct RunBudget {
    deadline: Option<Instant>,
}

impl RunBudget {
    pub fn unbounded() -> Self {
        Self { deadline: None }
    }

    pub fn until(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// Budget starting now, bounded by the configured maximum run duration.
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            deadline: settings
                .max_run_duration_ms
                .map(|ms| Instant::now() + Duration::from_millis(ms)),
        }
    }

    pub fn expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Runs one sync of the given target.
///
/// The per-target lock is released on every exit path, including errors; the
/// error itself still propagates after release.
pub async fn run_sync(
    ctx: &SyncContext,
    target_id: i64,
    now: DateTime<Utc>,
    budget: &RunBudget,
) -> SyncResult<SyncOutcome> {
    let Some(mut target) = ctx.store.load(target_id).await? else {
        return Ok(SyncOutcome::Deleted);
    };

    if target.disabled {
        debug!(target_id, "sync target is disabled, skipping");
        return Ok(SyncOutcome::Disabled);
    }

    let Some(lock) = ctx.store.try_lock(target_id).await? else {
        debug!(target_id, "sync already in progress elsewhere");
        return Ok(SyncOutcome::AlreadyRunning);
    };

    let result = sync_locked(ctx, &mut target, now, budget).await;
    let released = lock.release().await;

    let outcome = result?;
    released?;

    Ok(outcome)
}

async fn sync_locked(
    ctx: &SyncContext,
    target: &mut SyncTarget,
    now: DateTime<Utc>,
    budget: &RunBudget,
) -> SyncResult<SyncOutcome> {
    let kind = target.route(&ctx.settings)?;
    let window_lower = target.last_synced_at;

    info!(
        target_id = target.id,
        url = %target.display_url(),
        window_lower = ?window_lower,
        window_upper = %now,
        "starting sync run"
    );

    match kind {
        DestinationKind::Database => sync_database(ctx, target, window_lower, now, budget).await,
        DestinationKind::Http => http::sync_http(ctx, target, window_lower, now, budget).await,
    }
}

async fn sync_database(
    ctx: &SyncContext,
    target: &mut SyncTarget,
    window_lower: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    budget: &RunBudget,
) -> SyncResult<SyncOutcome> {
    let catalog = ctx.source.column_catalog();
    let url = Url::parse(&target.destination_url)?;
    let adapter = adapter_for(&url)?;

    let table = TableSpec {
        schema: target.destination_schema(&ctx.settings),
        name: target.destination_table(&catalog.table),
    };
    let columns = catalog.all_columns();

    // One DDL batch per run: schema, table, and an additive column statement
    // per replicated column. Comparing the whole batch against the last
    // applied text skips idempotent-but-not-free DDL on unchanged schemas.
    let mut statements = vec![
        adapter.create_schema(
            &SchemaSpec {
                name: table.schema.clone(),
            },
            true,
        )?,
        adapter.create_table(&table, &columns, true, None)?,
    ];
    for column in &columns {
        statements.push(adapter.add_column(&table, column, true)?);
    }
    let ddl_batch = statements.join(";\n");

    if target.last_applied_schema.as_deref() != Some(ddl_batch.as_str()) {
        ctx.cache
            .borrow(
                &target.destination_url,
                BorrowOptions::default(),
                |connection| {
                    let statements = &statements;
                    async move {
                        for statement in statements {
                            connection.execute(statement).await?;
                        }
                        Ok(())
                    }
                },
            )
            .await?;

        target.last_applied_schema = Some(ddl_batch);
        if !ctx.store.exists(target.id).await? {
            return Ok(SyncOutcome::Deleted);
        }
        ctx.store.update_run_state(target).await?;

        info!(target_id = target.id, adapter = adapter.name(), "applied destination schema");
    } else {
        debug!(target_id = target.id, "destination schema unchanged, skipping DDL");
    }

    let column_names: Vec<String> = columns.iter().map(|column| column.name.clone()).collect();
    let mut spool = CsvSpool::new(&column_names)?;

    let page_size = target.page_size.max(1) as usize;
    let mut offset = 0;
    let mut last_spooled_at: Option<DateTime<Utc>> = None;
    let mut suspended = false;

    loop {
        let rows = ctx
            .source
            .fetch_window(window_lower, now, page_size, offset)
            .await?;
        if rows.is_empty() {
            break;
        }

        let fetched = rows.len();
        for row in &rows {
            spool.append(&row.cells)?;
            last_spooled_at = Some(row.timestamp);
        }
        offset += fetched;

        if fetched < page_size {
            break;
        }
        if budget.expired() {
            suspended = true;
            break;
        }
    }
    spool.finish()?;
    let staged_rows = spool.rows();

    // A suspended run truncates the window to the last spooled row, so the
    // merge and the persisted position describe the same data.
    let effective_upper = if suspended {
        last_spooled_at.unwrap_or(now)
    } else {
        now
    };

    let called_at = Utc::now();
    let merge_result = ctx
        .cache
        .borrow(
            &target.destination_url,
            BorrowOptions::default(),
            |connection| {
                let spool = &spool;
                let table = &table;
                let columns = &columns;
                let primary_key = catalog.primary_key.name.as_str();
                async move {
                    adapter
                        .merge_from_csv(
                            connection.as_ref(),
                            spool.path(),
                            table,
                            primary_key,
                            columns,
                        )
                        .await
                }
            },
        )
        .await;

    target.stats.push(
        SyncAttemptStat {
            called_at,
            remote_called_at: Some(called_at),
            row_count: staged_rows,
            response_status: None,
            error: merge_result.as_ref().err().map(|err| err.to_string()),
        },
        ctx.settings.stats_cap,
    );

    if !ctx.store.exists(target.id).await? {
        warn!(target_id = target.id, "sync target deleted mid-run");
        return Ok(SyncOutcome::Deleted);
    }

    match merge_result {
        Ok(merged) => {
            target.last_synced_at = Some(effective_upper);
            ctx.store.update_run_state(target).await?;

            if suspended {
                info!(target_id = target.id, rows = merged, "sync suspended at budget boundary");
                Ok(SyncOutcome::Suspended { rows: merged })
            } else {
                info!(target_id = target.id, rows = merged, "sync completed");
                Ok(SyncOutcome::Completed { rows: merged })
            }
        }
        Err(err) => {
            // The failed attempt is still recorded; the position does not
            // move, so the next run retries the same window.
            ctx.store.update_run_state(target).await?;
            Err(err)
        }
    }
}
