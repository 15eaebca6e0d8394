use std::time::Instant;

use chrono::{Duration, TimeZone, Utc};

use sync::error::ErrorKind;
use sync::store::TargetStore;
use sync::target::{RunBudget, SyncOutcome, run_sync};
use sync::test_utils::{FakeConnector, row_fixture};

use crate::support::{harness, harness_with, target_fixture};

const DEST_URL: &str = "postgres://u:p@dest-host/exports";

#[tokio::test]
async fn first_run_creates_schema_and_merges_all_rows() {
    let h = harness();
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    for (pk, secs_ago) in [(1, 50), (2, 40), (3, 30)] {
        h.source.push_row(row_fixture(pk, now - Duration::seconds(secs_ago)));
    }
    let id = h.store.create(&target_fixture(DEST_URL)).await.unwrap();

    let outcome = run_sync(&h.ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Completed { rows: 3 });

    let target = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(target.last_synced_at, Some(now));
    assert!(target.last_applied_schema.is_some());
    assert_eq!(target.stats.len(), 1);
    assert!(target.stats.entries()[0].error.is_none());

    let connection = h.connector.connection(DEST_URL).unwrap();
    assert_eq!(
        connection
            .executed_matching("CREATE SCHEMA IF NOT EXISTS public")
            .len(),
        1
    );
    assert_eq!(
        connection
            .executed_matching("CREATE TABLE IF NOT EXISTS public.events")
            .len(),
        1
    );

    let loads = connection.loads();
    assert_eq!(loads.len(), 1);
    assert!(loads[0].table.contains("_staging_"));
    // Header plus the three data rows, already in timestamp order.
    let lines: Vec<&str> = loads[0].contents.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "pk,remote_key,amount,data");
    assert!(lines[1].starts_with("1,rk_1,"));
    assert!(lines[3].starts_with("3,rk_3,"));
}

#[tokio::test]
async fn second_run_skips_ddl_and_resends_nothing() {
    let h = harness();
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    for pk in 1..=3 {
        h.source
            .push_row(row_fixture(pk, now - Duration::seconds(60 - pk)));
    }
    let id = h.store.create(&target_fixture(DEST_URL)).await.unwrap();

    run_sync(&h.ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap();

    let connection = h.connector.connection(DEST_URL).unwrap();
    let ddl_before = connection.executed_matching("CREATE SCHEMA").len();

    let later = now + Duration::seconds(120);
    let outcome = run_sync(&h.ctx, id, later, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Completed { rows: 0 });

    // Schema cache hit: the second run issues no DDL at all.
    assert_eq!(
        connection.executed_matching("CREATE SCHEMA").len(),
        ddl_before
    );

    // The merge still runs, but with an empty spool.
    let loads = connection.loads();
    assert_eq!(loads.len(), 2);
    assert_eq!(loads[1].contents.lines().count(), 1);

    let target = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(target.last_synced_at, Some(later));
}

#[tokio::test]
async fn contended_lock_reports_already_running() {
    let h = harness();
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let id = h.store.create(&target_fixture(DEST_URL)).await.unwrap();

    let lock = h.store.try_lock(id).await.unwrap().unwrap();
    let outcome = run_sync(&h.ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::AlreadyRunning);
    lock.release().await.unwrap();

    // Once released, the run proceeds.
    let outcome = run_sync(&h.ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Completed { rows: 0 });
}

#[tokio::test]
async fn disabled_target_is_a_no_op() {
    let h = harness();
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    let mut target = target_fixture(DEST_URL);
    target.disabled = true;
    let id = h.store.create(&target).await.unwrap();

    let outcome = run_sync(&h.ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Disabled);
    assert!(h.connector.connection(DEST_URL).is_none());
}

#[tokio::test]
async fn missing_target_reports_deleted() {
    let h = harness();
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    let outcome = run_sync(&h.ctx, 42, now, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Deleted);
}

#[tokio::test]
async fn expired_budget_suspends_and_a_later_run_finishes_the_window() {
    let h = harness();
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let timestamps: Vec<_> = (1..=3)
        .map(|pk| now - Duration::seconds(60 - pk))
        .collect();
    for (pk, ts) in (1..=3).zip(timestamps.iter()) {
        h.source.push_row(row_fixture(pk, *ts));
    }

    let mut target = target_fixture(DEST_URL);
    target.page_size = 2;
    let id = h.store.create(&target).await.unwrap();

    let expired = RunBudget::until(Instant::now());
    let outcome = run_sync(&h.ctx, id, now, &expired).await.unwrap();
    assert_eq!(outcome, SyncOutcome::Suspended { rows: 2 });

    // Position stops at the last spooled row, not the window's upper bound.
    let target = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(target.last_synced_at, Some(timestamps[1]));

    let outcome = run_sync(&h.ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Completed { rows: 1 });

    let target = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(target.last_synced_at, Some(now));
}

#[tokio::test]
async fn merge_failure_propagates_after_recording_the_attempt() {
    let h = harness_with(
        Default::default(),
        FakeConnector::failing_statements("INSERT INTO"),
    );
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    h.source.push_row(row_fixture(1, now - Duration::seconds(10)));
    let id = h.store.create(&target_fixture(DEST_URL)).await.unwrap();

    let err = run_sync(&h.ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);

    let target = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(target.last_synced_at, None);
    assert_eq!(target.stats.len(), 1);
    assert!(target.stats.entries()[0].error.is_some());

    // The lock was released on the error path.
    assert!(h.store.try_lock(id).await.unwrap().is_some());
}

/// Store whose existence check always reports the row gone, simulating a
/// deletion racing the run.
struct VanishingStore {
    inner: std::sync::Arc<sync::store::MemoryTargetStore>,
}

#[async_trait::async_trait]
impl TargetStore for VanishingStore {
    async fn load(&self, id: i64) -> sync::error::SyncResult<Option<sync::store::SyncTarget>> {
        self.inner.load(id).await
    }

    async fn exists(&self, _id: i64) -> sync::error::SyncResult<bool> {
        Ok(false)
    }

    async fn due_targets(
        &self,
        now: chrono::DateTime<Utc>,
    ) -> sync::error::SyncResult<Vec<sync::store::SyncTarget>> {
        self.inner.due_targets(now).await
    }

    async fn update_run_state(
        &self,
        target: &sync::store::SyncTarget,
    ) -> sync::error::SyncResult<()> {
        self.inner.update_run_state(target).await
    }

    async fn create(&self, target: &sync::store::SyncTarget) -> sync::error::SyncResult<i64> {
        self.inner.create(target).await
    }

    async fn delete(&self, id: i64) -> sync::error::SyncResult<()> {
        self.inner.delete(id).await
    }

    async fn try_lock(
        &self,
        id: i64,
    ) -> sync::error::SyncResult<Option<Box<dyn sync::store::TargetLock>>> {
        self.inner.try_lock(id).await
    }
}

#[tokio::test]
async fn deleted_mid_run_is_detected_before_the_final_write() {
    let h = harness();
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    h.source.push_row(row_fixture(1, now - Duration::seconds(10)));
    let id = h.store.create(&target_fixture(DEST_URL)).await.unwrap();

    let ctx = sync::target::SyncContext {
        store: std::sync::Arc::new(VanishingStore {
            inner: h.store.clone(),
        }),
        cache: h.ctx.cache.clone(),
        source: h.ctx.source.clone(),
        http: h.ctx.http.clone(),
        settings: h.ctx.settings.clone(),
    };

    let outcome = run_sync(&ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Deleted);

    // The run aborted without resurrecting state.
    let target = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(target.last_synced_at, None);
}
