//! End-to-end pipeline scenarios against the in-memory collaborators.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::sync::Notify;

use object_indexer_pipeline::stages::{EnrichmentConfig, EnrichmentFailurePolicy};
use object_indexer_pipeline::{
    Coordinator, CoordinatorConfig, EventIntake, IntakeConfig, Orchestrator, RawNotification,
    RetryPolicy, RunOutcome, StageConfig, StagePolicies, StageSet, StreamMessage,
};
use object_indexer_repository::memory::{
    InMemoryDeadLetterSink, InMemoryObjectStore, InMemoryRecordStore, InMemorySearchIndex,
    StaticEnrichmentProvider,
};
use object_indexer_repository::{
    ByteStream, ContentSample, EnrichmentError, EnrichmentProvider, ObjectBody, ObjectStore,
    ObjectStoreError, ProviderOutput, PutObjectRequest, SearchIndex, SearchIndexError,
};
use object_indexer_shared::{
    ContentFingerprint, ErrorKind, IndexDocument, ObjectSnapshot, PipelineState, RecordKey,
    Stage, WorkItem,
};

/// Object store that counts copies, can have a competing metadata writer and
/// can stall the next source read after it has opened the body.
struct CountingStore {
    inner: InMemoryObjectStore,
    copies: AtomicUsize,
    interfere_with_metadata: AtomicBool,
    stall_next_source_read: AtomicBool,
    source_read_stalled: Notify,
    resume_source_read: Notify,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: InMemoryObjectStore::new(),
            copies: AtomicUsize::new(0),
            interfere_with_metadata: AtomicBool::new(false),
            stall_next_source_read: AtomicBool::new(false),
            source_read_stalled: Notify::new(),
            resume_source_read: Notify::new(),
        }
    }
}

#[async_trait]
impl ObjectStore for CountingStore {
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectSnapshot, ObjectStoreError> {
        self.inner.head(bucket, key).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectBody, ObjectStoreError> {
        let body = self.inner.get(bucket, key).await?;
        if bucket == "raw" && self.stall_next_source_read.swap(false, Ordering::SeqCst) {
            self.source_read_stalled.notify_one();
            self.resume_source_read.notified().await;
        }
        Ok(body)
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        if_source_etag: Option<&str>,
    ) -> Result<ObjectSnapshot, ObjectStoreError> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        self.inner
            .copy(src_bucket, src_key, dst_bucket, dst_key, if_source_etag)
            .await
    }

    async fn put(
        &self,
        request: PutObjectRequest,
        body: ByteStream,
    ) -> Result<ObjectSnapshot, ObjectStoreError> {
        self.inner.put(request, body).await
    }

    async fn put_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &BTreeMap<String, String>,
        if_match_etag: &str,
    ) -> Result<String, ObjectStoreError> {
        if self.interfere_with_metadata.load(Ordering::SeqCst) {
            let current = self.inner.head(bucket, key).await?;
            let mut theirs = current.metadata.clone();
            theirs.insert("editor".to_string(), "external".to_string());
            self.inner
                .put_metadata(bucket, key, &theirs, &current.etag)
                .await?;
        }
        self.inner
            .put_metadata(bucket, key, metadata, if_match_etag)
            .await
    }
}

/// Provider that counts calls and can hold selected content until released.
struct ScriptedProvider {
    output: ProviderOutput,
    calls: AtomicUsize,
    hold: Option<Bytes>,
    entered: Notify,
    release: Notify,
}

impl ScriptedProvider {
    fn returning(output: ProviderOutput) -> Self {
        Self {
            output,
            calls: AtomicUsize::new(0),
            hold: None,
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    fn holding(mut self, content: &'static [u8]) -> Self {
        self.hold = Some(Bytes::from_static(content));
        self
    }
}

#[async_trait]
impl EnrichmentProvider for ScriptedProvider {
    async fn enrich(&self, sample: &ContentSample) -> Result<ProviderOutput, EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hold.as_ref() == Some(&sample.bytes) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(self.output.clone())
    }
}

/// Provider that never answers in time.
struct HangingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl EnrichmentProvider for HangingProvider {
    async fn enrich(&self, _sample: &ContentSample) -> Result<ProviderOutput, EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(ProviderOutput::new())
    }
}

/// Search index that can be switched off.
struct FlakyIndex {
    inner: InMemorySearchIndex,
    available: AtomicBool,
}

#[async_trait]
impl SearchIndex for FlakyIndex {
    async fn upsert(&self, key: &str, document: &IndexDocument) -> Result<(), SearchIndexError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SearchIndexError::unavailable("503 Service Unavailable"));
        }
        self.inner.upsert(key, document).await
    }

    async fn health_check(&self) -> Result<bool, SearchIndexError> {
        Ok(true)
    }
}

struct Pipeline {
    coordinator: Arc<Coordinator>,
    dead_letters: Arc<InMemoryDeadLetterSink>,
}

fn photo_output() -> ProviderOutput {
    let mut output = ProviderOutput::new();
    output.insert("category".to_string(), json!("photo"));
    output
}

fn quick_policies(max_attempts: u32) -> StagePolicies {
    StagePolicies::uniform(
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(40)),
    )
}

fn pipeline(
    store: Arc<dyn ObjectStore>,
    provider: Arc<dyn EnrichmentProvider>,
    index: Arc<dyn SearchIndex>,
    stage_config: StageConfig,
    max_attempts: u32,
) -> Pipeline {
    let dead_letters = Arc::new(InMemoryDeadLetterSink::new());
    let stages = StageSet::with_config(store, provider, index, stage_config);
    let coordinator = Coordinator::with_config(
        stages,
        Arc::new(InMemoryRecordStore::new()),
        dead_letters.clone(),
        CoordinatorConfig::default().with_policies(quick_policies(max_attempts)),
    );
    Pipeline {
        coordinator: Arc::new(coordinator),
        dead_letters,
    }
}

fn item(event_id: &str, key: &str) -> WorkItem {
    WorkItem::new(event_id, "raw", "processed", key)
}

fn put_source(store: &InMemoryObjectStore, key: &str, content: &'static [u8]) {
    let mut metadata = BTreeMap::new();
    metadata.insert("owner".to_string(), "alice".to_string());
    store.insert_object("raw", key, content, Some("image/png"), metadata);
}

#[tokio::test]
async fn scenario_a_replicates_enriches_and_indexes() {
    let store = Arc::new(CountingStore::new());
    let index = Arc::new(InMemorySearchIndex::new());
    put_source(&store.inner, "img/1.png", b"\x89PNG\r\n\x1a\nimage-bytes");
    let p = pipeline(
        store.clone(),
        Arc::new(StaticEnrichmentProvider::new(photo_output())),
        index.clone(),
        StageConfig::default(),
        3,
    );

    let outcome = p.coordinator.handle(item("evt-1", "img/1.png")).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    assert_eq!(
        store.inner.object_bytes("processed", "img/1.png").unwrap().as_ref(),
        b"\x89PNG\r\n\x1a\nimage-bytes"
    );
    let metadata = store.inner.object_metadata("processed", "img/1.png").unwrap();
    assert_eq!(
        metadata.get("x-enriched-category").map(String::as_str),
        Some("photo")
    );
    assert_eq!(metadata.get("owner").map(String::as_str), Some("alice"));

    let document = index.document("img/1.png").unwrap().to_json();
    assert_eq!(document["key"], json!("img/1.png"));
    assert_eq!(document["category"], json!("photo"));
}

#[tokio::test(start_paused = true)]
async fn scenario_b_enrichment_timeout_dead_letters_after_three_attempts() {
    let store = Arc::new(CountingStore::new());
    put_source(&store.inner, "doc.txt", b"some text");
    let provider = Arc::new(HangingProvider {
        calls: AtomicUsize::new(0),
    });
    let stage_config = StageConfig {
        enrichment: EnrichmentConfig {
            timeout: Duration::from_secs(2),
            ..EnrichmentConfig::default()
        },
        ..StageConfig::default()
    };
    let p = pipeline(
        store.clone(),
        provider.clone(),
        Arc::new(InMemorySearchIndex::new()),
        stage_config,
        3,
    );

    let outcome = p.coordinator.handle(item("evt-1", "doc.txt")).await.unwrap();
    let key = RecordKey::new("doc.txt", ContentFingerprint::of(b"some text"));
    assert_eq!(
        outcome,
        RunOutcome::Failed {
            key: Some(key.clone()),
            stage: Stage::Enrichment,
            kind: ErrorKind::EnrichmentTimeout,
        }
    );
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

    let record = p.coordinator.record(&key).await.unwrap().unwrap();
    assert_eq!(record.state, PipelineState::Failed(Stage::Enrichment));

    let dead = p.dead_letters.records().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 3);
    assert_eq!(dead[0].failed_stage, Stage::Enrichment);
    assert_eq!(dead[0].error_kind, ErrorKind::EnrichmentTimeout);

    // The replica is there, untouched by any metadata commit.
    assert_eq!(
        store.inner.object_bytes("processed", "doc.txt").unwrap().as_ref(),
        b"some text"
    );
    let metadata = store.inner.object_metadata("processed", "doc.txt").unwrap();
    assert!(metadata.keys().all(|k| !k.starts_with("x-enriched-")));
}

#[tokio::test]
async fn replayed_notification_runs_one_pipeline() {
    let store = Arc::new(CountingStore::new());
    let index = Arc::new(InMemorySearchIndex::new());
    put_source(&store.inner, "img/1.png", b"png");
    let p = pipeline(
        store.clone(),
        Arc::new(StaticEnrichmentProvider::new(photo_output())),
        index.clone(),
        StageConfig::default(),
        3,
    );
    let coordinator = Arc::try_unwrap(p.coordinator).ok().unwrap();
    let orchestrator = Orchestrator::new(
        EventIntake::new(IntakeConfig::default().with_route("raw", "processed")),
        coordinator,
    );
    let (tx, rx) = orchestrator.channel();

    let notification = RawNotification::object_created("evt-1", "raw", "img/1.png");
    tx.send(StreamMessage::Notifications(vec![notification.clone()]))
        .await
        .unwrap();
    tx.send(StreamMessage::Notifications(vec![notification]))
        .await
        .unwrap();
    drop(tx);

    orchestrator.run(rx).await.unwrap();

    let stats = orchestrator.stats();
    assert_eq!(stats.admitted, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(store.copies.load(Ordering::SeqCst), 1);
    assert_eq!(index.upsert_count(), 1);
}

#[tokio::test]
async fn identical_content_short_circuits_after_completion() {
    let store = Arc::new(CountingStore::new());
    let index = Arc::new(InMemorySearchIndex::new());
    let provider = Arc::new(ScriptedProvider::returning(photo_output()));
    put_source(&store.inner, "img/1.png", b"png");
    let p = pipeline(
        store.clone(),
        provider.clone(),
        index.clone(),
        StageConfig::default(),
        3,
    );

    let first = p.coordinator.handle(item("evt-1", "img/1.png")).await.unwrap();
    let second = p.coordinator.handle(item("evt-2", "img/1.png")).await.unwrap();

    assert_eq!(first, RunOutcome::Completed);
    assert_eq!(second, RunOutcome::AlreadyCompleted);
    assert_eq!(store.copies.load(Ordering::SeqCst), 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(index.upsert_count(), 1);
}

#[tokio::test]
async fn same_content_in_flight_is_absorbed() {
    let store = Arc::new(CountingStore::new());
    let provider = Arc::new(ScriptedProvider::returning(photo_output()).holding(b"png"));
    put_source(&store.inner, "img/1.png", b"png");
    let p = pipeline(
        store.clone(),
        provider.clone(),
        Arc::new(InMemorySearchIndex::new()),
        StageConfig::default(),
        3,
    );

    let coordinator = p.coordinator.clone();
    let first = tokio::spawn(async move { coordinator.handle(item("evt-1", "img/1.png")).await });
    provider.entered.notified().await;

    let second = p.coordinator.handle(item("evt-2", "img/1.png")).await.unwrap();
    assert_eq!(second, RunOutcome::Absorbed);

    provider.release.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), RunOutcome::Completed);
    assert_eq!(store.copies.load(Ordering::SeqCst), 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn newer_content_supersedes_in_flight_run() {
    let store = Arc::new(CountingStore::new());
    let index = Arc::new(InMemorySearchIndex::new());
    let provider = Arc::new(ScriptedProvider::returning(photo_output()).holding(b"version one"));
    put_source(&store.inner, "doc.txt", b"version one");
    let p = pipeline(
        store.clone(),
        provider.clone(),
        index.clone(),
        StageConfig::default(),
        3,
    );

    let coordinator = p.coordinator.clone();
    let first = tokio::spawn(async move { coordinator.handle(item("evt-1", "doc.txt")).await });
    provider.entered.notified().await;

    put_source(&store.inner, "doc.txt", b"version two");
    let second = p.coordinator.handle(item("evt-2", "doc.txt")).await.unwrap();

    assert_eq!(second, RunOutcome::Completed);
    assert_eq!(first.await.unwrap().unwrap(), RunOutcome::Superseded);

    let records = p.coordinator.records_for_key("doc.txt").await.unwrap();
    let state_of = |content: &[u8]| {
        records
            .iter()
            .find(|r| r.key.fingerprint == ContentFingerprint::of(content))
            .map(|r| r.state)
    };
    assert_eq!(state_of(b"version one"), Some(PipelineState::Superseded));
    assert_eq!(state_of(b"version two"), Some(PipelineState::Completed));

    let document = index.document("doc.txt").unwrap();
    assert_eq!(document.fingerprint, ContentFingerprint::of(b"version two"));
    assert_eq!(
        store.inner.object_bytes("processed", "doc.txt").unwrap().as_ref(),
        b"version two"
    );
}

#[tokio::test]
async fn late_event_for_overwritten_content_leaves_newer_run_alone() {
    let store = Arc::new(CountingStore::new());
    let index = Arc::new(InMemorySearchIndex::new());
    let provider = Arc::new(ScriptedProvider::returning(photo_output()).holding(b"version two"));
    put_source(&store.inner, "doc.txt", b"version one");
    let p = pipeline(
        store.clone(),
        provider.clone(),
        index.clone(),
        StageConfig::default(),
        3,
    );

    // The first event reads version one, then stalls before claiming the key.
    store.stall_next_source_read.store(true, Ordering::SeqCst);
    let coordinator = p.coordinator.clone();
    let late = tokio::spawn(async move { coordinator.handle(item("evt-1", "doc.txt")).await });
    store.source_read_stalled.notified().await;

    put_source(&store.inner, "doc.txt", b"version two");
    let coordinator = p.coordinator.clone();
    let current = tokio::spawn(async move { coordinator.handle(item("evt-2", "doc.txt")).await });
    provider.entered.notified().await;

    store.resume_source_read.notify_one();
    assert_eq!(late.await.unwrap().unwrap(), RunOutcome::Stale);
    assert_eq!(p.coordinator.active_runs(), 1);

    provider.release.notify_one();
    assert_eq!(current.await.unwrap().unwrap(), RunOutcome::Completed);

    let records = p.coordinator.records_for_key("doc.txt").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].key.fingerprint, ContentFingerprint::of(b"version two"));
    assert_eq!(records[0].state, PipelineState::Completed);
    assert_eq!(
        index.document("doc.txt").unwrap().fingerprint,
        ContentFingerprint::of(b"version two")
    );
    assert!(p.dead_letters.records().await.is_empty());
}

#[tokio::test]
async fn concurrent_metadata_writer_yields_concurrent_modification() {
    let store = Arc::new(CountingStore::new());
    store.interfere_with_metadata.store(true, Ordering::SeqCst);
    put_source(&store.inner, "img/1.png", b"png");
    let p = pipeline(
        store.clone(),
        Arc::new(StaticEnrichmentProvider::new(photo_output())),
        Arc::new(InMemorySearchIndex::new()),
        StageConfig::default(),
        3,
    );

    let outcome = p.coordinator.handle(item("evt-1", "img/1.png")).await.unwrap();
    assert!(matches!(
        outcome,
        RunOutcome::Failed {
            stage: Stage::MetadataCommit,
            kind: ErrorKind::ConcurrentModification,
            ..
        }
    ));

    let metadata = store.inner.object_metadata("processed", "img/1.png").unwrap();
    assert_eq!(metadata.get("editor").map(String::as_str), Some("external"));
    assert_eq!(metadata.get("owner").map(String::as_str), Some("alice"));
    assert!(!metadata.contains_key("x-enriched-category"));

    let dead = p.dead_letters.records().await;
    assert_eq!(dead[0].failed_stage, Stage::MetadataCommit);
    assert_eq!(dead[0].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn indexing_failure_keeps_earlier_stages_and_can_be_repaired() {
    let store = Arc::new(CountingStore::new());
    let index = Arc::new(FlakyIndex {
        inner: InMemorySearchIndex::new(),
        available: AtomicBool::new(false),
    });
    put_source(&store.inner, "img/1.png", b"png");
    let p = pipeline(
        store.clone(),
        Arc::new(StaticEnrichmentProvider::new(photo_output())),
        index.clone(),
        StageConfig::default(),
        2,
    );

    let outcome = p.coordinator.handle(item("evt-1", "img/1.png")).await.unwrap();
    let key = RecordKey::new("img/1.png", ContentFingerprint::of(b"png"));
    assert_eq!(
        outcome,
        RunOutcome::Failed {
            key: Some(key.clone()),
            stage: Stage::Indexing,
            kind: ErrorKind::IndexUnavailable,
        }
    );

    let record = p.coordinator.record(&key).await.unwrap().unwrap();
    assert_eq!(record.state, PipelineState::Failed(Stage::Indexing));
    assert!(record.committed_etag.is_some());
    let metadata = store.inner.object_metadata("processed", "img/1.png").unwrap();
    assert_eq!(
        metadata.get("x-enriched-category").map(String::as_str),
        Some("photo")
    );
    assert_eq!(p.dead_letters.records().await[0].attempts, 2);

    index.available.store(true, Ordering::SeqCst);
    let repaired = p.coordinator.repair_failed_indexing().await.unwrap();
    assert_eq!(repaired, vec![(key.clone(), RunOutcome::Completed)]);

    let record = p.coordinator.record(&key).await.unwrap().unwrap();
    assert_eq!(record.state, PipelineState::Completed);
    assert_eq!(record.runs, 2);
    assert_eq!(store.copies.load(Ordering::SeqCst), 1);
    assert!(index.inner.document("img/1.png").is_some());
}

#[tokio::test(start_paused = true)]
async fn degrade_policy_continues_with_flagged_metadata() {
    let store = Arc::new(CountingStore::new());
    let index = Arc::new(InMemorySearchIndex::new());
    put_source(&store.inner, "doc.txt", b"some text");
    let stage_config = StageConfig {
        enrichment: EnrichmentConfig {
            timeout: Duration::from_secs(1),
            on_failure: EnrichmentFailurePolicy::Degrade,
            ..EnrichmentConfig::default()
        },
        ..StageConfig::default()
    };
    let p = pipeline(
        store.clone(),
        Arc::new(HangingProvider {
            calls: AtomicUsize::new(0),
        }),
        index.clone(),
        stage_config,
        2,
    );

    let outcome = p.coordinator.handle(item("evt-1", "doc.txt")).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let metadata = store.inner.object_metadata("processed", "doc.txt").unwrap();
    assert_eq!(
        metadata.get("x-enriched-degraded").map(String::as_str),
        Some("true")
    );
    assert!(index.document("doc.txt").unwrap().degraded);
    assert!(p.dead_letters.records().await.is_empty());
}

#[tokio::test]
async fn permission_denied_is_not_retried() {
    struct DeniedStore;

    #[async_trait]
    impl ObjectStore for DeniedStore {
        async fn head(&self, _: &str, _: &str) -> Result<ObjectSnapshot, ObjectStoreError> {
            Err(ObjectStoreError::permission_denied("AccessDenied"))
        }

        async fn get(&self, _: &str, _: &str) -> Result<ObjectBody, ObjectStoreError> {
            Err(ObjectStoreError::permission_denied("AccessDenied"))
        }

        async fn copy(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> Result<ObjectSnapshot, ObjectStoreError> {
            Err(ObjectStoreError::permission_denied("AccessDenied"))
        }

        async fn put(
            &self,
            _: PutObjectRequest,
            _: ByteStream,
        ) -> Result<ObjectSnapshot, ObjectStoreError> {
            Err(ObjectStoreError::permission_denied("AccessDenied"))
        }

        async fn put_metadata(
            &self,
            _: &str,
            _: &str,
            _: &BTreeMap<String, String>,
            _: &str,
        ) -> Result<String, ObjectStoreError> {
            Err(ObjectStoreError::permission_denied("AccessDenied"))
        }
    }

    let p = pipeline(
        Arc::new(DeniedStore),
        Arc::new(StaticEnrichmentProvider::default()),
        Arc::new(InMemorySearchIndex::new()),
        StageConfig::default(),
        5,
    );

    let outcome = p.coordinator.handle(item("evt-1", "secret.bin")).await.unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Failed {
            key: None,
            stage: Stage::Replication,
            kind: ErrorKind::PermissionDenied,
        }
    );
    assert_eq!(p.dead_letters.records().await[0].attempts, 1);
}
