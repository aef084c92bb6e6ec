mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use statsync_core::api::DataClass;
use statsync_core::models::{DatasetEnvelope, RegionStats, RegionSummary};
use statsync_core::region::ResolveOptions;
use statsync_core::storage::{FileStore, MemoryStore};
use statsync_core::sync::{FetchOptions, FetchSource};
use statsync_core::{ApiError, FailureLabel, RequestSpec, ResolveError};

use common::{dashboard, regions_payload, test_config, wait_until, ScriptedTransport};

#[tokio::test]
async fn cold_start_offline_serves_fallback_without_network() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path().to_path_buf()).unwrap());
    let transport = Arc::new(ScriptedTransport::new(vec![]));
    let dashboard = dashboard(test_config(true), store, transport.clone());

    let outcome = dashboard
        .fetch_data(&RequestSpec::all_data(), FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.source, FetchSource::Fallback);
    assert_eq!(outcome.failure, Some(FailureLabel::NetworkUnreachable));
    assert_eq!(outcome.payload_source(), Some("fallback"));
    let envelope: DatasetEnvelope<Vec<RegionStats>> = outcome.decode().unwrap();
    assert!(envelope.synthetic);
    assert_eq!(outcome.count(), Some(envelope.data.len() as u64));

    let resolved = dashboard.resolve_region(ResolveOptions::default()).await;
    assert_eq!(resolved.unwrap_err(), ResolveError::Unsupported);

    assert!(transport.calls().is_empty());
    let status = dashboard.cache_status();
    assert!(status.persistent);
    assert_eq!(status.entry_count, 0);
}

#[tokio::test]
async fn reconnect_replays_queue_in_background() {
    let transport = Arc::new(ScriptedTransport::always(Ok(json!({"data": {"accepted": true}}))));
    let dashboard = dashboard(
        test_config(true),
        Arc::new(MemoryStore::new()),
        transport.clone(),
    );
    dashboard.start_background();

    let feedback = RequestSpec::post("/feedback", json!({"rating": 5}), DataClass::Aggregate);
    let outcome = dashboard
        .fetch_data(&feedback, FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.failure, Some(FailureLabel::NetworkUnreachable));
    assert_eq!(dashboard.sync().queue().len(), 1);

    dashboard.set_online(true);
    let queue = dashboard.sync().queue();
    assert!(wait_until(Duration::from_secs(2), || queue.is_empty()).await);
    assert_eq!(transport.calls(), vec![feedback]);

    dashboard.shutdown().await;
}

#[tokio::test]
async fn queued_requests_replay_before_new_request_for_same_key() {
    let transport = Arc::new(
        ScriptedTransport::new(vec![
            Ok(json!({"v": "replay-a"})),
            Ok(json!({"v": "replay-b"})),
            Ok(json!({"v": "fresh"})),
        ])
        .with_delay(Duration::from_millis(50)),
    );
    let dashboard = dashboard(
        test_config(true),
        Arc::new(MemoryStore::new()),
        transport.clone(),
    );
    let first = RequestSpec::regions().replay_when_online();
    let second = RequestSpec::all_data().replay_when_online();
    for spec in [&first, &second] {
        dashboard
            .fetch_data(spec, FetchOptions::default())
            .await
            .unwrap();
    }
    assert_eq!(dashboard.sync().queue().len(), 2);

    dashboard.start_background();
    dashboard.set_online(true);
    let outcome = dashboard
        .fetch_data(&RequestSpec::regions(), FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.source, FetchSource::Network);
    assert_eq!(outcome.payload, json!({"v": "fresh"}));
    assert!(dashboard.sync().queue().is_empty());
    let calls: Vec<String> = transport.calls().iter().map(RequestSpec::cache_key).collect();
    assert_eq!(
        calls,
        vec![first.cache_key(), second.cache_key(), first.cache_key()]
    );
    assert_eq!(
        dashboard
            .cache()
            .get::<serde_json::Value>(&first.cache_key(), None),
        Some(json!({"v": "fresh"}))
    );

    dashboard.shutdown().await;
}

#[tokio::test]
async fn expired_health_data_is_served_stale() {
    let mut config = test_config(false);
    config.cache.ttl.health_secs = 1;
    let health = json!({"data": {"status": "ok", "timestamp": "2026-01-01T00:00:00Z"}});
    let transport = Arc::new(ScriptedTransport::new(vec![Ok(health.clone())]));
    let dashboard = dashboard(config, Arc::new(MemoryStore::new()), transport);

    let fresh = dashboard
        .fetch_data(&RequestSpec::health(), FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(fresh.source, FetchSource::Network);

    dashboard.set_online(false);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let stale = dashboard
        .fetch_data(&RequestSpec::health(), FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(stale.source, FetchSource::Cache);
    assert!(stale.stale);
    assert_eq!(stale.payload, health);
}

#[tokio::test]
async fn read_never_goes_back_past_what_was_cached_at_call_start() {
    let transport = Arc::new(
        ScriptedTransport::new(vec![
            Ok(regions_payload()),
            Err(ApiError::from_status(404, "gone")),
        ])
        .with_delay(Duration::from_millis(100)),
    );
    let dashboard = Arc::new(dashboard(
        test_config(false),
        Arc::new(MemoryStore::new()),
        transport,
    ));
    let spec = RequestSpec::regions();
    dashboard
        .fetch_data(&spec, FetchOptions::default())
        .await
        .unwrap();

    let call = {
        let dashboard = Arc::clone(&dashboard);
        let spec = spec.clone();
        tokio::spawn(async move { dashboard.fetch_data(&spec, FetchOptions::default()).await })
    };
    // The entry disappears while the second request is in flight
    tokio::time::sleep(Duration::from_millis(20)).await;
    dashboard.clear_cache(true);

    let outcome = call.await.unwrap().unwrap();
    assert_eq!(outcome.source, FetchSource::Cache);
    assert_eq!(outcome.failure, Some(FailureLabel::NotFound));
    let envelope: DatasetEnvelope<Vec<RegionSummary>> = outcome.decode().unwrap();
    assert_eq!(envelope.count, Some(2));
    assert!(!envelope.synthetic);
}

#[tokio::test]
async fn queued_requests_replay_in_order_and_give_up_after_three_failures() {
    let transport = Arc::new(ScriptedTransport::always(Err(ApiError::from_status(
        503, "",
    ))));
    let dashboard = dashboard(
        test_config(true),
        Arc::new(MemoryStore::new()),
        transport.clone(),
    );
    let specs: Vec<RequestSpec> = ["/a", "/b", "/c"]
        .iter()
        .map(|path| RequestSpec::post(*path, json!({}), DataClass::Aggregate))
        .collect();
    for spec in &specs {
        dashboard
            .fetch_data(spec, FetchOptions::default())
            .await
            .unwrap();
    }
    assert_eq!(dashboard.sync().queue().len(), 3);

    dashboard.set_online(true);
    for _ in 0..3 {
        dashboard.replay_queue().await;
    }
    assert!(dashboard.sync().queue().is_empty());

    let calls = transport.calls();
    assert_eq!(calls.len(), 9);
    for cycle in calls.chunks(3) {
        assert_eq!(cycle, specs.as_slice());
    }
}

#[tokio::test]
async fn cache_and_queue_survive_restart_on_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let regions = RequestSpec::regions();
    let feedback = RequestSpec::post("/feedback", json!({"rating": 3}), DataClass::Aggregate);

    {
        let store = Arc::new(FileStore::new(dir.path().to_path_buf()).unwrap());
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(regions_payload())]));
        let online = dashboard(test_config(false), store, transport);
        online
            .fetch_data(&regions, FetchOptions::default())
            .await
            .unwrap();
        online.set_online(false);
        online
            .fetch_data(&feedback, FetchOptions::default())
            .await
            .unwrap();
        online.select_region("KL-EKM").unwrap();
    }

    let store = Arc::new(FileStore::new(dir.path().to_path_buf()).unwrap());
    let transport = Arc::new(ScriptedTransport::new(vec![]));
    let restarted = dashboard(test_config(true), store, transport);

    let outcome = restarted
        .fetch_data(&regions, FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.source, FetchSource::Cache);
    assert_eq!(outcome.payload, regions_payload());
    assert!(restarted.sync().queue().contains_key(&feedback.cache_key()));
    assert_eq!(
        restarted.user_prefs().preferred_region.as_deref(),
        Some("KL-EKM")
    );
    assert!(restarted.cache_status().last_sync_at.is_some());
}
