use chrono::{Duration, TimeZone, Utc};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use config::shared::SyncSettings;
use sync::error::ErrorKind;
use sync::store::TargetStore;
use sync::target::{RunBudget, SyncOutcome, run_sync};
use sync::test_utils::{FakeConnector, row_fixture};

use crate::support::{harness_with, target_fixture};

fn insecure_settings() -> SyncSettings {
    SyncSettings {
        allow_insecure_http: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn delivers_window_in_chunks_and_advances_position() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness_with(insecure_settings(), FakeConnector::default());
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    for pk in 1..=3 {
        h.source
            .push_row(row_fixture(pk, now - Duration::seconds(60 - pk)));
    }

    let mut target = target_fixture(&format!("{}/hook", server.uri()));
    target.page_size = 2;
    let id = h.store.create(&target).await.unwrap();

    let outcome = run_sync(&h.ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Completed { rows: 3 });

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["integration_id"], "acct_1");
    assert_eq!(body["integration_service"], "stripe");
    assert_eq!(body["table"], "events");
    assert_eq!(body["rows"].as_array().unwrap().len(), 2);
    assert_eq!(body["rows"][0]["pk"], serde_json::json!(1));
    assert_eq!(body["rows"][0]["remote_key"], serde_json::json!("rk_1"));

    let stored = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(stored.last_synced_at, Some(now));
    assert_eq!(stored.stats.len(), 2);
}

#[tokio::test]
async fn failed_chunk_checkpoints_at_the_last_good_chunk_and_resumes() {
    let server = MockServer::start().await;
    // The chunk carrying row 3 fails; everything else succeeds.
    Mock::given(method("POST"))
        .and(body_string_contains("rk_3"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .with_priority(5)
        .mount(&server)
        .await;

    let h = harness_with(insecure_settings(), FakeConnector::default());
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let timestamps: Vec<_> = (1..=3).map(|pk| now - Duration::seconds(60 - pk)).collect();
    for (pk, ts) in (1..=3).zip(timestamps.iter()) {
        h.source.push_row(row_fixture(pk, *ts));
    }

    let mut target = target_fixture(&server.uri());
    target.page_size = 1;
    let id = h.store.create(&target).await.unwrap();

    let outcome = run_sync(&h.ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::DeliveryInterrupted { rows: 2 });

    let stored = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(stored.last_synced_at, Some(timestamps[1]));
    assert_eq!(stored.stats.len(), 3);
    assert!(stored.stats.entries()[2].error.is_some());
    assert_eq!(stored.stats.entries()[2].response_status, Some(500));

    // Next run resends only the undelivered row.
    server.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let later = now + Duration::seconds(120);
    let outcome = run_sync(&h.ctx, id, later, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Completed { rows: 1 });

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["rows"].as_array().unwrap().len(), 1);
    assert_eq!(body["rows"][0]["pk"], serde_json::json!(3));

    let stored = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(stored.last_synced_at, Some(later));
}

#[tokio::test]
async fn unreachable_destination_interrupts_without_raising() {
    let settings = SyncSettings {
        allow_insecure_http: true,
        http_connect_timeout_ms: 250,
        ..Default::default()
    };
    let h = harness_with(settings, FakeConnector::default());
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    h.source.push_row(row_fixture(1, now - Duration::seconds(10)));

    // Reserved TEST-NET address; the connect attempt fails or times out,
    // either way a transport-class error.
    let id = h
        .store
        .create(&target_fixture("http://192.0.2.1:9/hook"))
        .await
        .unwrap();

    let outcome = run_sync(&h.ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::DeliveryInterrupted { rows: 0 });

    let stored = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(stored.last_synced_at, None);
    assert_eq!(stored.stats.len(), 1);
    assert!(stored.stats.entries()[0].error.is_some());
}

#[tokio::test]
async fn basic_auth_is_stripped_from_the_url_and_sent_as_a_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness_with(insecure_settings(), FakeConnector::default());
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    h.source.push_row(row_fixture(1, now - Duration::seconds(10)));

    let authed_url = server.uri().replace("http://", "http://alice:s3cret@");
    let id = h.store.create(&target_fixture(&authed_url)).await.unwrap();

    let outcome = run_sync(&h.ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Completed { rows: 1 });

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.username(), "");
    let authorization = requests[0]
        .headers
        .get("authorization")
        .expect("authorization header should be present")
        .to_str()
        .unwrap();
    assert!(authorization.starts_with("Basic "));

    // The display name never carries credentials either.
    let stored = h.store.load(id).await.unwrap().unwrap();
    assert!(!stored.display_url().contains("s3cret"));
}

#[tokio::test]
async fn plain_http_is_rejected_unless_opted_in() {
    let h = harness_with(SyncSettings::default(), FakeConnector::default());
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let id = h
        .store
        .create(&target_fixture("http://localhost:4000/hook"))
        .await
        .unwrap();

    let err = run_sync(&h.ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigError);

    // Routing failed before any delivery; the lock is free again.
    assert!(h.store.try_lock(id).await.unwrap().is_some());
}

#[tokio::test]
async fn parallel_senders_deliver_all_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let h = harness_with(insecure_settings(), FakeConnector::default());
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    for pk in 1..=8 {
        h.source
            .push_row(row_fixture(pk, now - Duration::seconds(60 - pk)));
    }

    let mut target = target_fixture(&server.uri());
    target.page_size = 2;
    target.parallelism = 3;
    let id = h.store.create(&target).await.unwrap();

    let outcome = run_sync(&h.ctx, id, now, &RunBudget::unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Completed { rows: 8 });

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);

    let stored = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(stored.last_synced_at, Some(now));
}
