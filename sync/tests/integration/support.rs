use std::sync::Arc;
use std::time::Duration;

use config::shared::SyncSettings;
use sync::connections::ConnectionCache;
use sync::stats::RollingStats;
use sync::store::{MemoryTargetStore, SyncTarget};
use sync::target::{SyncContext, build_http_client};
use sync::test_utils::{FakeConnector, MemorySource};

/// A target with sane defaults pointing at `url`.
pub fn target_fixture(url: &str) -> SyncTarget {
    SyncTarget {
        id: 0,
        integration_id: "acct_1".to_string(),
        integration_service: "stripe".to_string(),
        destination_url: url.to_string(),
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

/// Wired-together collaborators for one test scenario.
pub struct Harness {
    pub store: Arc<MemoryTargetStore>,
    pub connector: Arc<FakeConnector>,
    pub source: Arc<MemorySource>,
    pub ctx: SyncContext,
}

/// Installs a per-process test subscriber honoring `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn harness_with(settings: SyncSettings, connector: FakeConnector) -> Harness {
    init_tracing();

    let store = Arc::new(MemoryTargetStore::new());
    let connector = Arc::new(connector);
    let source = Arc::new(MemorySource::with_catalog());
    let cache = Arc::new(ConnectionCache::new(
        connector.clone(),
        Duration::from_secs(3600),
    ));
    let http = build_http_client(&settings).expect("http client should build");

    let ctx = SyncContext {
        store: store.clone(),
        cache,
        source: source.clone(),
        http,
        settings,
    };

    Harness {
        store,
        connector,
        source,
        ctx,
    }
}

pub fn harness() -> Harness {
    harness_with(SyncSettings::default(), FakeConnector::default())
}
