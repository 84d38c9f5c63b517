//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, Semaphore};

use mushaf::adapters::{ContentFetcher, ManualConnectivity, ProgressFn};
use mushaf::bundled::BundledDataset;
use mushaf::resolver::RetryPolicy;
use mushaf::store::MemoryStore;
use mushaf::{
    Document, DocumentId, DocumentMeta, DownloadEvent, Error, Provenance, ResourceDescriptor,
    Result, ServiceSettings, StudyService,
};

pub const INDEX_JSON: &str = include_str!("../../assets/surahs.json");
pub const DOCUMENTS_JSON: &str = include_str!("../../assets/documents.json");

/// Three small resources (the second with a known checksum) and one 5 MB resource
pub fn test_manifest() -> String {
    let payload_b = payload("en.b");
    serde_json::json!({
        "version": 1,
        "resources": [
            { "id": "en.a", "type": "translation", "language": "en", "name": "A", "size_bytes": 4096 },
            { "id": "en.b", "type": "translation", "language": "en", "name": "B", "size_bytes": 4096,
              "sha256": hex::encode(Sha256::digest(&payload_b)) },
            { "id": "ar.c", "type": "recitation", "language": "ar", "name": "C", "size_bytes": 4096 },
            { "id": "en.big", "type": "commentary", "language": "en", "name": "Big", "size_bytes": 5_242_880u64 }
        ]
    })
    .to_string()
}

pub fn test_dataset() -> Arc<BundledDataset> {
    Arc::new(BundledDataset::from_json(INDEX_JSON, DOCUMENTS_JSON, &test_manifest()).unwrap())
}

/// Deterministic payload for a resource id
pub fn payload(id: &str) -> Vec<u8> {
    id.bytes().cycle().take(4096).collect()
}

/// Settings with no refresh backoff
pub fn fast_settings() -> ServiceSettings {
    let mut settings = ServiceSettings::default();
    settings.resolver.refresh_retry = RetryPolicy::none();
    settings.resolver.network_timeout = Duration::from_secs(2);
    settings.downloads.timeout = Duration::from_secs(5);
    settings
}

/// Scriptable network fetcher with call counters
#[derive(Default)]
pub struct FakeFetcher {
    documents: Mutex<HashMap<DocumentId, Document>>,
    failing_resources: Mutex<HashSet<String>>,
    corrupt_resources: Mutex<HashSet<String>>,
    document_delay: Mutex<Option<Duration>>,
    /// Number of upcoming document fetches that fail
    document_failures: AtomicUsize,
    /// When set, each resource transfer waits for one permit
    resource_gate: Mutex<Option<Arc<Semaphore>>>,
    pub document_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub resource_calls: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve every surah the bundled dataset has a body for
    pub fn with_documents(dataset: &BundledDataset) -> Arc<Self> {
        let fetcher = Self::default();
        {
            let mut documents = fetcher.documents.lock().unwrap();
            for id in dataset.document_ids() {
                let mut doc = dataset.document(id).unwrap().with_provenance(Provenance::Network);
                doc.cached_at = None;
                documents.insert(id, doc);
            }
        }
        Arc::new(fetcher)
    }

    pub fn set_document_delay(&self, delay: Duration) {
        *self.document_delay.lock().unwrap() = Some(delay);
    }

    /// Fail the next `count` document fetches with a connectivity error
    pub fn fail_next_documents(&self, count: usize) {
        self.document_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_resource(&self, id: &str) {
        self.failing_resources.lock().unwrap().insert(id.to_string());
    }

    pub fn corrupt_resource(&self, id: &str) {
        self.corrupt_resources.lock().unwrap().insert(id.to_string());
    }

    /// Hold every transfer until a permit is added to the returned gate
    pub fn gate_resources(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.resource_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn documents_fetched(&self) -> usize {
        self.document_calls.load(Ordering::SeqCst)
    }

    pub fn resources_fetched(&self) -> usize {
        self.resource_calls.load(Ordering::SeqCst)
    }

    /// Resource ids in the order their transfers started
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    fn name(&self) -> &str {
        "fake"
    }

    async fn fetch_document(&self, id: DocumentId) -> Result<Document> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.document_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .document_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::Connectivity(format!("document {} unreachable", id)));
        }

        self.documents
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))
    }

    async fn fetch_document_list(&self) -> Result<Vec<DocumentMeta>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.documents.lock().unwrap().values().map(|d| d.meta()).collect())
    }

    async fn fetch_resource(
        &self,
        descriptor: &ResourceDescriptor,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<u8>> {
        let id = descriptor.id.as_str().to_string();
        self.resource_calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(id.clone());

        let gate = self.resource_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        if self.failing_resources.lock().unwrap().contains(&id) {
            return Err(Error::Connectivity(format!("{} unreachable", id)));
        }

        let mut bytes = payload(&id);
        if self.corrupt_resources.lock().unwrap().contains(&id) {
            bytes[0] ^= 0xff;
        }

        let total = bytes.len() as u64;
        for chunk in 1..=4u64 {
            progress(total * chunk / 4, Some(total));
        }
        Ok(bytes)
    }
}

/// In-memory service wired to the fake fetcher
pub async fn service_with(
    fetcher: Arc<FakeFetcher>,
    connectivity: Arc<ManualConnectivity>,
    store: Arc<MemoryStore>,
) -> StudyService {
    StudyService::builder()
        .store(store)
        .fetcher(fetcher)
        .connectivity(connectivity)
        .dataset(test_dataset())
        .settings(fast_settings())
        .build()
        .await
        .unwrap()
}

/// Wait for the next terminal event of `id`, collecting everything seen
pub async fn wait_terminal(
    events: &mut broadcast::Receiver<DownloadEvent>,
    id: &str,
) -> Vec<DownloadEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.unwrap();
            let done = event.is_terminal() && event.resource_id().map(|r| r.as_str()) == Some(id);
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("download did not settle");
    seen
}

/// Wait for the next event matching `pred`
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<DownloadEvent>,
    pred: impl Fn(&DownloadEvent) -> bool,
) -> DownloadEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event did not arrive")
}
