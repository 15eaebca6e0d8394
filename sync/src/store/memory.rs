//! In-memory target store for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SyncResult;
use crate::store::{SyncTarget, TargetLock, TargetStore};

#[derive(Default)]
struct Inner {
    targets: HashMap<i64, SyncTarget>,
    locked: HashSet<i64>,
    next_id: i64,
}

/// Mutex-guarded map with the same contract as the Postgres store.
#[derive(Clone, Default)]
pub struct MemoryTargetStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn load(&self, id: i64) -> SyncResult<Option<SyncTarget>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.targets.get(&id).cloned())
    }

    async fn exists(&self, id: i64) -> SyncResult<bool> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.targets.contains_key(&id))
    }

    async fn due_targets(&self, now: DateTime<Utc>) -> SyncResult<Vec<SyncTarget>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut due: Vec<SyncTarget> = inner
            .targets
            .values()
            .filter(|target| !target.disabled && target.due(now))
            .cloned()
            .collect();
        due.sort_by_key(|target| target.id);
        Ok(due)
    }

    async fn update_run_state(&self, target: &SyncTarget) -> SyncResult<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if let Some(existing) = inner.targets.get_mut(&target.id) {
            existing.last_synced_at = target.last_synced_at;
            existing.last_applied_schema = target.last_applied_schema.clone();
            existing.stats = target.stats.clone();
        }
        Ok(())
    }

    async fn create(&self, target: &SyncTarget) -> SyncResult<i64> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.next_id += 1;
        let id = inner.next_id;

        let mut stored = target.clone();
        stored.id = id;
        inner.targets.insert(id, stored);

        Ok(id)
    }

    async fn delete(&self, id: i64) -> SyncResult<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.targets.remove(&id);
        Ok(())
    }

    async fn try_lock(&self, id: i64) -> SyncResult<Option<Box<dyn TargetLock>>> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if !inner.locked.insert(id) {
            return Ok(None);
        }

        Ok(Some(Box::new(MemoryTargetLock {
            inner: self.inner.clone(),
            id,
            released: false,
        })))
    }
}

struct MemoryTargetLock {
    inner: Arc<Mutex<Inner>>,
    id: i64,
    released: bool,
}

#[async_trait]
impl TargetLock for MemoryTargetLock {
    async fn release(mut self: Box<Self>) -> SyncResult<()> {
        self.released = true;
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.locked.remove(&self.id);
        Ok(())
    }
}

impl Drop for MemoryTargetLock {
    fn drop(&mut self) {
        // A dropped guard frees the target, matching the Postgres store where
        // the lock dies with its session.
        if !self.released {
            if let Ok(mut inner) = self.inner.lock() {
                inner.locked.remove(&self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::RollingStats;
    use chrono::TimeZone;

    fn target() -> SyncTarget {
        SyncTarget {
            id: 0,
            integration_id: "acct_1".into(),
            integration_service: "stripe".into(),
            destination_url: "postgres://u:p@host/db".into(),
            schema_override: None,
            table_override: None,
            period_secs: 60,
            last_synced_at: None,
            last_applied_schema: None,
            disabled: false,
            page_size: 100,
            parallelism: 1,
            stats: RollingStats::default(),
        }
    }

    #[tokio::test]
    async fn create_load_delete_round_trip() {
        let store = MemoryTargetStore::new();
        let id = store.create(&target()).await.unwrap();

        let loaded = store.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert!(store.exists(id).await.unwrap());

        store.delete(id).await.unwrap();
        assert!(store.load(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let store = MemoryTargetStore::new();
        let id = store.create(&target()).await.unwrap();

        let lock = store.try_lock(id).await.unwrap().unwrap();
        assert!(store.try_lock(id).await.unwrap().is_none());

        lock.release().await.unwrap();
        assert!(store.try_lock(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_lock_guard_frees_the_target() {
        let store = MemoryTargetStore::new();
        let id = store.create(&target()).await.unwrap();

        let lock = store.try_lock(id).await.unwrap().unwrap();
        drop(lock);

        assert!(store.try_lock(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn due_targets_skips_disabled_and_not_due() {
        let store = MemoryTargetStore::new();
        let now = Utc.timestamp_opt(10_000, 0).unwrap();

        let never_synced = store.create(&target()).await.unwrap();

        let mut recent = target();
        recent.last_synced_at = Some(now);
        store.create(&recent).await.unwrap();

        let mut disabled = target();
        disabled.disabled = true;
        store.create(&disabled).await.unwrap();

        let due = store.due_targets(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, never_synced);
    }
}
