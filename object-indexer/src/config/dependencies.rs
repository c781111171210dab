//! Dependency initialization and wiring for the object indexer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Settings;
use crate::IndexerError;
use object_indexer_pipeline::{Coordinator, EventIntake, Orchestrator, StageSet};
use object_indexer_repository::memory::{
    InMemoryDeadLetterSink, InMemoryObjectStore, InMemoryRecordStore, InMemorySearchIndex,
    SniffingEnrichmentProvider,
};
use object_indexer_repository::{DeadLetterSink, JsonLinesDeadLetterSink};

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The configured orchestrator ready to run.
    pub orchestrator: Orchestrator,
    /// Local object store holding the source and target buckets.
    pub object_store: Arc<InMemoryObjectStore>,
    /// Local search index the pipeline writes into.
    pub search_index: Arc<InMemorySearchIndex>,
}

impl Dependencies {
    /// Initialize all dependencies from `settings`.
    ///
    /// The object store is seeded from `settings.local_seed_dir` when set,
    /// and dead letters go to `settings.dead_letter_path` when set.
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(IndexerError)` - If seeding or opening the dead-letter file fails
    pub async fn new(settings: &Settings) -> Result<Self, IndexerError> {
        info!(
            routes = ?settings.routes,
            default_target = ?settings.default_target,
            worker_concurrency = settings.worker_concurrency,
            "Initializing dependencies"
        );

        let object_store = Arc::new(InMemoryObjectStore::new());
        if let Some(dir) = &settings.local_seed_dir {
            let seeded = seed_object_store(&object_store, dir).await?;
            info!(dir = %dir.display(), objects = seeded, "Seeded object store");
        }

        let dead_letters: Arc<dyn DeadLetterSink> = match &settings.dead_letter_path {
            Some(path) => Arc::new(JsonLinesDeadLetterSink::open(path).await?),
            None => Arc::new(InMemoryDeadLetterSink::new()),
        };

        let search_index = Arc::new(InMemorySearchIndex::new());
        let stages = StageSet::with_config(
            object_store.clone(),
            Arc::new(SniffingEnrichmentProvider::new()),
            search_index.clone(),
            settings.stage_config(),
        );

        let coordinator = Coordinator::with_config(
            stages,
            Arc::new(InMemoryRecordStore::new()),
            dead_letters,
            settings.coordinator_config(),
        );

        let orchestrator = Orchestrator::with_config(
            EventIntake::new(settings.intake_config()),
            coordinator,
            settings.orchestrator_config(),
        );

        Ok(Self {
            orchestrator,
            object_store,
            search_index,
        })
    }
}

/// Load every file under `dir` as an object.
///
/// The first path component below `dir` is the bucket, the rest is the key.
async fn seed_object_store(store: &InMemoryObjectStore, dir: &Path) -> Result<usize, IndexerError> {
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];
    let mut seeded = 0;

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }

            let Some((bucket, key)) = split_object_path(dir, &path) else {
                debug!(path = %path.display(), "Skipping file outside a bucket directory");
                continue;
            };
            let data = tokio::fs::read(&path).await?;
            store.insert_object(&bucket, &key, data, None, Default::default());
            seeded += 1;
        }
    }

    Ok(seeded)
}

fn split_object_path(root: &Path, path: &Path) -> Option<(String, String)> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned());
    let bucket = parts.next()?;
    let key = parts.collect::<Vec<_>>().join("/");
    (!key.is_empty()).then_some((bucket, key))
}
