//! Download Queue Integration Tests
//!
//! Ordering, failure isolation, connectivity gating, cancellation,
//! checksum and quota enforcement.

mod common;

use std::sync::Arc;
use std::time::Duration;

use mushaf::adapters::{Connectivity, ManualConnectivity};
use mushaf::store::{ContentStore, MemoryStore};
use mushaf::{DownloadEvent, Error, PauseReason, PreferencesPatch, ResourceStatus, StudyService};

use common::{payload, service_with, wait_for_event, wait_terminal, FakeFetcher};

async fn status(service: &StudyService, id: &str) -> ResourceStatus {
    service.get_resource(id).await.unwrap().status
}

async fn wait_until_drained(service: &StudyService) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !service.download_tasks().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue did not drain");
}

#[tokio::test]
async fn test_downloads_run_in_request_order() {
    let fetcher = FakeFetcher::new();
    let gate = fetcher.gate_resources();
    let service = service_with(
        fetcher.clone(),
        Arc::new(ManualConnectivity::default()),
        Arc::new(MemoryStore::new()),
    )
    .await;
    let mut events = service.subscribe_downloads();

    for id in ["en.a", "en.b", "ar.c"] {
        assert!(service.request_download(id).await.unwrap());
        assert_eq!(status(&service, id).await, ResourceStatus::Downloading);
    }

    // Duplicate requests are ignored
    assert!(!service.request_download("en.b").await.unwrap());

    let queued: Vec<String> = service
        .download_tasks()
        .iter()
        .map(|t| t.resource_id.to_string())
        .collect();
    assert_eq!(queued, ["en.a", "en.b", "ar.c"]);

    gate.add_permits(3);
    for id in ["en.a", "en.b", "ar.c"] {
        let seen = wait_terminal(&mut events, id).await;
        assert!(matches!(seen.last(), Some(DownloadEvent::Completed { .. })));
    }

    assert_eq!(fetcher.started(), ["en.a", "en.b", "ar.c"]);
    for id in ["en.a", "en.b", "ar.c"] {
        assert!(service.is_resource_available(id).await.unwrap());
        assert_eq!(service.get_download_progress(id).await.unwrap(), 100);
    }
    assert!(service.download_tasks().is_empty());

    service.close().await;
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_at_100() {
    let fetcher = FakeFetcher::new();
    let service = service_with(
        fetcher.clone(),
        Arc::new(ManualConnectivity::default()),
        Arc::new(MemoryStore::new()),
    )
    .await;
    let mut events = service.subscribe_downloads();

    service.request_download("en.a").await.unwrap();
    let seen = wait_terminal(&mut events, "en.a").await;

    let percents: Vec<u8> = seen
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last(), Some(&100));

    service.close().await;
}

#[tokio::test]
async fn test_failure_does_not_stop_the_queue() {
    let fetcher = FakeFetcher::new();
    fetcher.fail_resource("en.a");
    let service = service_with(
        fetcher.clone(),
        Arc::new(ManualConnectivity::default()),
        Arc::new(MemoryStore::new()),
    )
    .await;
    let mut events = service.subscribe_downloads();

    service.request_download("en.a").await.unwrap();
    service.request_download("en.b").await.unwrap();

    let seen = wait_terminal(&mut events, "en.a").await;
    assert!(matches!(seen.last(), Some(DownloadEvent::Failed { .. })));
    let seen = wait_terminal(&mut events, "en.b").await;
    assert!(matches!(seen.last(), Some(DownloadEvent::Completed { .. })));

    assert_eq!(status(&service, "en.a").await, ResourceStatus::Error);
    assert_eq!(status(&service, "en.b").await, ResourceStatus::Available);
    assert_eq!(service.get_download_progress("en.a").await.unwrap(), 0);

    // A failed resource can be retried
    assert!(service.request_download("en.a").await.unwrap());
    let seen = wait_terminal(&mut events, "en.a").await;
    assert!(matches!(seen.last(), Some(DownloadEvent::Failed { .. })));
    assert_eq!(fetcher.resources_fetched(), 3);

    service.close().await;
}

#[tokio::test]
async fn test_metered_connection_pauses_until_unmetered() {
    let fetcher = FakeFetcher::new();
    let connectivity = Arc::new(ManualConnectivity::new(Connectivity::Metered));
    let service = service_with(fetcher.clone(), connectivity.clone(), Arc::new(MemoryStore::new())).await;
    let mut events = service.subscribe_downloads();

    service.request_download("en.a").await.unwrap();

    let paused = wait_for_event(&mut events, |e| matches!(e, DownloadEvent::Paused { .. })).await;
    assert!(matches!(
        paused,
        DownloadEvent::Paused { reason: PauseReason::Metered, queued: 1 }
    ));
    assert_eq!(service.download_paused(), Some(PauseReason::Metered));
    assert_eq!(fetcher.resources_fetched(), 0);
    assert_eq!(status(&service, "en.a").await, ResourceStatus::Downloading);

    connectivity.set(Connectivity::Unmetered);
    let seen = wait_terminal(&mut events, "en.a").await;
    assert!(matches!(seen.last(), Some(DownloadEvent::Completed { .. })));
    assert_eq!(service.download_paused(), None);

    service.close().await;
}

#[tokio::test]
async fn test_allowing_metered_downloads_resumes_the_queue() {
    let fetcher = FakeFetcher::new();
    let connectivity = Arc::new(ManualConnectivity::new(Connectivity::Metered));
    let service = service_with(fetcher.clone(), connectivity, Arc::new(MemoryStore::new())).await;
    let mut events = service.subscribe_downloads();

    service.request_download("en.a").await.unwrap();
    wait_for_event(&mut events, |e| matches!(e, DownloadEvent::Paused { .. })).await;

    service
        .set_preferences(&PreferencesPatch {
            download_on_unmetered_only: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();

    let seen = wait_terminal(&mut events, "en.a").await;
    assert!(matches!(seen.last(), Some(DownloadEvent::Completed { .. })));

    service.close().await;
}

#[tokio::test]
async fn test_offline_pauses_regardless_of_preferences() {
    let fetcher = FakeFetcher::new();
    let connectivity = Arc::new(ManualConnectivity::new(Connectivity::Offline));
    let service = service_with(fetcher.clone(), connectivity.clone(), Arc::new(MemoryStore::new())).await;
    let mut events = service.subscribe_downloads();

    service
        .set_preferences(&PreferencesPatch {
            download_on_unmetered_only: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();
    service.request_download("en.a").await.unwrap();

    let paused = wait_for_event(&mut events, |e| matches!(e, DownloadEvent::Paused { .. })).await;
    assert!(matches!(paused, DownloadEvent::Paused { reason: PauseReason::Offline, .. }));

    connectivity.set(Connectivity::Metered);
    let seen = wait_terminal(&mut events, "en.a").await;
    assert!(matches!(seen.last(), Some(DownloadEvent::Completed { .. })));

    service.close().await;
}

#[tokio::test]
async fn test_cancel_pending_and_active_downloads() {
    let fetcher = FakeFetcher::new();
    let _gate = fetcher.gate_resources();
    let store = Arc::new(MemoryStore::new());
    let service = service_with(fetcher.clone(), Arc::new(ManualConnectivity::default()), store.clone()).await;
    let mut events = service.subscribe_downloads();

    service.request_download("en.a").await.unwrap();
    service.request_download("en.b").await.unwrap();
    wait_for_event(&mut events, |e| matches!(e, DownloadEvent::Started { .. })).await;

    // Pending
    assert!(service.cancel_download("en.b").await.unwrap());
    assert_eq!(status(&service, "en.b").await, ResourceStatus::NotAvailable);

    // Active, blocked inside the transfer
    assert!(service.cancel_download("en.a").await.unwrap());
    assert_eq!(status(&service, "en.a").await, ResourceStatus::NotAvailable);
    assert_eq!(service.get_download_progress("en.a").await.unwrap(), 0);

    // Nothing left to cancel
    assert!(!service.cancel_download("en.a").await.unwrap());

    assert!(!fetcher.started().iter().any(|id| id == "en.b"));
    assert!(service.download_tasks().is_empty());
    assert_eq!(service.get_storage_used().await.unwrap(), 0);

    service.close().await;
}

#[tokio::test]
async fn test_checksum_mismatch_marks_error_and_keeps_nothing() {
    let fetcher = FakeFetcher::new();
    fetcher.corrupt_resource("en.b");
    let service = service_with(
        fetcher.clone(),
        Arc::new(ManualConnectivity::default()),
        Arc::new(MemoryStore::new()),
    )
    .await;
    let mut events = service.subscribe_downloads();

    service.request_download("en.b").await.unwrap();
    let seen = wait_terminal(&mut events, "en.b").await;

    match seen.last() {
        Some(DownloadEvent::Failed { error, .. }) => assert!(error.contains("checksum")),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(status(&service, "en.b").await, ResourceStatus::Error);
    assert!(!service.is_resource_available("en.b").await.unwrap());
    assert_eq!(service.get_storage_used().await.unwrap(), 0);

    service.close().await;
}

#[tokio::test]
async fn test_quota_blocks_oversized_download() {
    let fetcher = FakeFetcher::new();
    let service = service_with(
        fetcher.clone(),
        Arc::new(ManualConnectivity::default()),
        Arc::new(MemoryStore::new()),
    )
    .await;
    let mut events = service.subscribe_downloads();

    service
        .set_preferences(&PreferencesPatch {
            storage_quota_mb: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();

    service.request_download("en.big").await.unwrap();
    let seen = wait_terminal(&mut events, "en.big").await;

    match seen.last() {
        Some(DownloadEvent::Failed { error, .. }) => assert!(error.contains("quota")),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(status(&service, "en.big").await, ResourceStatus::Error);
    assert_eq!(fetcher.resources_fetched(), 0);

    // Small resources still fit
    service.request_download("en.a").await.unwrap();
    let seen = wait_terminal(&mut events, "en.a").await;
    assert!(matches!(seen.last(), Some(DownloadEvent::Completed { .. })));

    service.close().await;
}

#[tokio::test]
async fn test_delete_then_redownload_restores_identical_bytes() {
    let fetcher = FakeFetcher::new();
    let store = Arc::new(MemoryStore::new());
    let service = service_with(fetcher.clone(), Arc::new(ManualConnectivity::default()), store.clone()).await;
    let content = ContentStore::new(store.clone());
    let mut events = service.subscribe_downloads();

    service.request_download("en.a").await.unwrap();
    wait_terminal(&mut events, "en.a").await;

    let descriptor = service.get_resource("en.a").await.unwrap();
    let first = content.read_resource(&descriptor).await.unwrap().unwrap();
    assert_eq!(first, payload("en.a"));
    let used = service.get_storage_used().await.unwrap();
    assert_eq!(used, first.len() as u64);

    // Already available
    assert!(!service.request_download("en.a").await.unwrap());

    assert!(service.delete_resource("en.a").await.unwrap());
    assert_eq!(status(&service, "en.a").await, ResourceStatus::NotAvailable);
    assert_eq!(service.get_storage_used().await.unwrap(), 0);
    // Deleting again is a no-op that still succeeds
    assert!(service.delete_resource("en.a").await.unwrap());

    service.request_download("en.a").await.unwrap();
    wait_terminal(&mut events, "en.a").await;

    let second = content.read_resource(&descriptor).await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(fetcher.resources_fetched(), 2);

    service.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_hung_transfer_times_out_as_error() {
    let fetcher = FakeFetcher::new();
    // No permits: the transfer never finishes on its own
    let _gate = fetcher.gate_resources();
    let service = service_with(
        fetcher.clone(),
        Arc::new(ManualConnectivity::default()),
        Arc::new(MemoryStore::new()),
    )
    .await;
    let mut events = service.subscribe_downloads();

    let started = tokio::time::Instant::now();
    service.request_download("en.a").await.unwrap();
    let seen = wait_terminal(&mut events, "en.a").await;

    match seen.last() {
        Some(DownloadEvent::Failed { error, .. }) => assert!(error.contains("timed out")),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert_eq!(status(&service, "en.a").await, ResourceStatus::Error);
    assert!(service.download_tasks().is_empty());
    assert_eq!(service.get_storage_used().await.unwrap(), 0);

    service.close().await;
}

#[tokio::test]
async fn test_delete_cancels_queued_and_active_downloads() {
    let fetcher = FakeFetcher::new();
    let gate = fetcher.gate_resources();
    let store = Arc::new(MemoryStore::new());
    let service = service_with(fetcher.clone(), Arc::new(ManualConnectivity::default()), store.clone()).await;
    let content = ContentStore::new(store);
    let mut events = service.subscribe_downloads();

    service.request_download("en.a").await.unwrap();
    service.request_download("en.b").await.unwrap();
    wait_for_event(&mut events, |e| matches!(e, DownloadEvent::Started { .. })).await;

    assert!(service.delete_resource("en.b").await.unwrap());
    assert_eq!(status(&service, "en.b").await, ResourceStatus::NotAvailable);
    let queued: Vec<String> = service
        .download_tasks()
        .iter()
        .map(|t| t.resource_id.to_string())
        .collect();
    assert_eq!(queued, ["en.a"]);

    // Returns only after the worker has settled the aborted transfer
    assert!(service.delete_resource("en.a").await.unwrap());
    let descriptor = service.get_resource("en.a").await.unwrap();
    assert_eq!(descriptor.status, ResourceStatus::NotAvailable);
    assert!(!content.has_resource(&descriptor).await.unwrap());
    assert!(service.download_tasks().is_empty());

    gate.add_permits(1);
    assert!(service.request_download("en.a").await.unwrap());
    let seen = wait_terminal(&mut events, "en.a").await;
    assert!(matches!(seen.last(), Some(DownloadEvent::Completed { .. })));
    assert_eq!(status(&service, "en.a").await, ResourceStatus::Available);

    service.close().await;
}

#[tokio::test]
async fn test_delete_racing_a_request_keeps_status_and_bytes_in_step() {
    let fetcher = FakeFetcher::new();
    let store = Arc::new(MemoryStore::new());
    let service = service_with(fetcher.clone(), Arc::new(ManualConnectivity::default()), store.clone()).await;
    let content = ContentStore::new(store);

    for _ in 0..10 {
        let (deleted, requested) = tokio::join!(
            service.delete_resource("en.a"),
            service.request_download("en.a"),
        );
        assert!(deleted.unwrap());
        requested.unwrap();

        wait_until_drained(&service).await;

        let descriptor = service.get_resource("en.a").await.unwrap();
        let has_bytes = content.has_resource(&descriptor).await.unwrap();
        match descriptor.status {
            ResourceStatus::Available => assert!(has_bytes),
            ResourceStatus::NotAvailable => assert!(!has_bytes),
            other => panic!("unexpected status with an empty queue: {}", other),
        }
    }

    service.close().await;
}

#[tokio::test]
async fn test_unknown_resource_ids_are_not_found() {
    let service = service_with(
        FakeFetcher::new(),
        Arc::new(ManualConnectivity::default()),
        Arc::new(MemoryStore::new()),
    )
    .await;

    for id in ["en.missing", "not a valid id!"] {
        assert!(matches!(service.request_download(id).await, Err(Error::NotFound(_))));
        assert!(matches!(service.cancel_download(id).await, Err(Error::NotFound(_))));
        assert!(matches!(service.delete_resource(id).await, Err(Error::NotFound(_))));
        assert!(matches!(service.is_resource_available(id).await, Err(Error::NotFound(_))));
    }

    service.close().await;
}
