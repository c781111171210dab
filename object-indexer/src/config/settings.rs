//! Runtime settings read from the environment.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::IndexerError;
use object_indexer_pipeline::stages::{
    EnrichmentConfig, EnrichmentFailurePolicy, IndexingConfig, MetadataCommitConfig,
    ReplicationConfig, DEFAULT_INDEX_CLASS,
};
use object_indexer_pipeline::{
    CoordinatorConfig, IntakeConfig, OrchestratorConfig, RetryPolicy, StageConfig, StagePolicies,
};
use object_indexer_shared::DEFAULT_METADATA_PREFIX;

/// Everything the binary can be configured with.
///
/// Values are read once at startup and handed to the pipeline components as
/// plain config structs.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Source bucket to target bucket pairs.
    pub routes: Vec<(String, String)>,
    pub default_target: Option<String>,
    pub worker_concurrency: usize,
    pub intake_buffer_size: usize,
    pub enrichment_sample_bytes: usize,
    pub enrichment_timeout: Duration,
    pub enrichment_on_failure: EnrichmentFailurePolicy,
    pub metadata_prefix: String,
    pub metadata_conflict_retries: u32,
    pub stage_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub record_retention: Duration,
    pub dedup_retention: Duration,
    pub index_class_name: String,
    /// Append dead-letter records to this file instead of keeping them in memory.
    pub dead_letter_path: Option<PathBuf>,
    /// Directory laid out as `<bucket>/<key>` used to seed the local object store.
    pub local_seed_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let orchestrator = OrchestratorConfig::default();
        let intake = IntakeConfig::default();
        let enrichment = EnrichmentConfig::default();
        let metadata = MetadataCommitConfig::default();
        let retry = RetryPolicy::default();

        Self {
            routes: Vec::new(),
            default_target: None,
            worker_concurrency: orchestrator.worker_concurrency,
            intake_buffer_size: orchestrator.channel_buffer_size,
            enrichment_sample_bytes: enrichment.sample_bytes,
            enrichment_timeout: enrichment.timeout,
            enrichment_on_failure: enrichment.on_failure,
            metadata_prefix: DEFAULT_METADATA_PREFIX.to_string(),
            metadata_conflict_retries: metadata.max_conflict_retries,
            stage_max_attempts: retry.max_attempts,
            retry_base_delay: retry.base_delay,
            retry_max_delay: retry.max_delay,
            record_retention: orchestrator.record_retention,
            dedup_retention: intake.dedup_retention,
            index_class_name: DEFAULT_INDEX_CLASS.to_string(),
            dead_letter_path: None,
            local_seed_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BUCKET_ROUTES`: `source=target` pairs separated by commas
    /// - `DEFAULT_TARGET_BUCKET`: target for source buckets without a route
    /// - `WORKER_CONCURRENCY`: work items processed at once (default: 16)
    /// - `INTAKE_BUFFER_SIZE`: notification channel capacity (default: 1000)
    /// - `ENRICHMENT_SAMPLE_BYTES`: prefix handed to the provider (default: 1 MiB)
    /// - `ENRICHMENT_TIMEOUT_MS`: deadline per provider call (default: 30000)
    /// - `ENRICHMENT_ON_FAILURE`: `fail` or `degrade` (default: fail)
    /// - `METADATA_PREFIX`: reserved metadata namespace (default: x-enriched-)
    /// - `METADATA_CONFLICT_RETRIES`: merge rounds after a lost write (default: 3)
    /// - `STAGE_MAX_ATTEMPTS`: attempts per stage, including the first (default: 3)
    /// - `RETRY_BASE_DELAY_MS` / `RETRY_MAX_DELAY_MS`: backoff bounds
    /// - `RECORD_RETENTION_SECS`: how long terminal records are kept
    /// - `DEDUP_RETENTION_SECS`: how long event IDs are remembered
    /// - `INDEX_CLASS_NAME`: index class for documents (default: ObjectDocument)
    /// - `DEAD_LETTER_PATH`: JSON-lines dead-letter file
    /// - `LOCAL_SEED_DIR`: directory used to seed the local object store
    pub fn from_env() -> Result<Self, IndexerError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load settings through `lookup`, treating blank values as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, IndexerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut settings = Self::default();

        if let Some(routes) = get("BUCKET_ROUTES") {
            settings.routes = parse_routes(&routes)?;
        }
        settings.default_target = get("DEFAULT_TARGET_BUCKET");

        if let Some(n) = parse::<usize>(get("WORKER_CONCURRENCY"), "WORKER_CONCURRENCY")? {
            settings.worker_concurrency = positive(n, "WORKER_CONCURRENCY")?;
        }
        if let Some(n) = parse::<usize>(get("INTAKE_BUFFER_SIZE"), "INTAKE_BUFFER_SIZE")? {
            settings.intake_buffer_size = positive(n, "INTAKE_BUFFER_SIZE")?;
        }
        if let Some(n) = parse::<usize>(get("ENRICHMENT_SAMPLE_BYTES"), "ENRICHMENT_SAMPLE_BYTES")? {
            settings.enrichment_sample_bytes = positive(n, "ENRICHMENT_SAMPLE_BYTES")?;
        }
        if let Some(ms) = parse::<u64>(get("ENRICHMENT_TIMEOUT_MS"), "ENRICHMENT_TIMEOUT_MS")? {
            settings.enrichment_timeout = Duration::from_millis(positive(ms, "ENRICHMENT_TIMEOUT_MS")?);
        }
        if let Some(policy) = get("ENRICHMENT_ON_FAILURE") {
            settings.enrichment_on_failure = parse_failure_policy(&policy)?;
        }
        if let Some(prefix) = get("METADATA_PREFIX") {
            settings.metadata_prefix = prefix.to_ascii_lowercase();
        }
        if let Some(n) = parse(get("METADATA_CONFLICT_RETRIES"), "METADATA_CONFLICT_RETRIES")? {
            settings.metadata_conflict_retries = n;
        }
        if let Some(n) = parse::<u32>(get("STAGE_MAX_ATTEMPTS"), "STAGE_MAX_ATTEMPTS")? {
            settings.stage_max_attempts = positive(n, "STAGE_MAX_ATTEMPTS")?;
        }
        if let Some(ms) = parse(get("RETRY_BASE_DELAY_MS"), "RETRY_BASE_DELAY_MS")? {
            settings.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse(get("RETRY_MAX_DELAY_MS"), "RETRY_MAX_DELAY_MS")? {
            settings.retry_max_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parse(get("RECORD_RETENTION_SECS"), "RECORD_RETENTION_SECS")? {
            settings.record_retention = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(get("DEDUP_RETENTION_SECS"), "DEDUP_RETENTION_SECS")? {
            settings.dedup_retention = Duration::from_secs(secs);
        }
        if let Some(class_name) = get("INDEX_CLASS_NAME") {
            settings.index_class_name = class_name;
        }
        settings.dead_letter_path = get("DEAD_LETTER_PATH").map(PathBuf::from);
        settings.local_seed_dir = get("LOCAL_SEED_DIR").map(PathBuf::from);

        if settings.retry_max_delay < settings.retry_base_delay {
            return Err(IndexerError::config(
                "RETRY_MAX_DELAY_MS must not be smaller than RETRY_BASE_DELAY_MS",
            ));
        }
        Ok(settings)
    }

    pub fn intake_config(&self) -> IntakeConfig {
        let mut config = self
            .routes
            .iter()
            .fold(IntakeConfig::default(), |config, (source, target)| {
                config.with_route(source, target)
            })
            .with_dedup_retention(self.dedup_retention);
        if let Some(target) = &self.default_target {
            config = config.with_default_target(target);
        }
        config
    }

    pub fn stage_config(&self) -> StageConfig {
        StageConfig {
            replication: ReplicationConfig::default(),
            enrichment: EnrichmentConfig {
                sample_bytes: self.enrichment_sample_bytes,
                timeout: self.enrichment_timeout,
                on_failure: self.enrichment_on_failure,
                metadata_prefix: self.metadata_prefix.clone(),
            },
            metadata_commit: MetadataCommitConfig {
                metadata_prefix: self.metadata_prefix.clone(),
                max_conflict_retries: self.metadata_conflict_retries,
            },
            indexing: IndexingConfig {
                class_name: self.index_class_name.clone(),
            },
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let policy = RetryPolicy::default()
            .with_max_attempts(self.stage_max_attempts)
            .with_base_delay(self.retry_base_delay)
            .with_max_delay(self.retry_max_delay);
        CoordinatorConfig::default().with_policies(StagePolicies::uniform(policy))
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            channel_buffer_size: self.intake_buffer_size,
            worker_concurrency: self.worker_concurrency,
            record_retention: self.record_retention,
            ..OrchestratorConfig::default()
        }
    }
}

fn parse<T>(value: Option<String>, name: &str) -> Result<Option<T>, IndexerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| IndexerError::config(format!("Invalid {name} '{v}': {e}")))
        })
        .transpose()
}

fn positive<T>(value: T, name: &str) -> Result<T, IndexerError>
where
    T: PartialOrd + Default,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(IndexerError::config(format!("{name} must be greater than zero")))
    }
}

fn parse_routes(raw: &str) -> Result<Vec<(String, String)>, IndexerError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((source, target)) if !source.trim().is_empty() && !target.trim().is_empty() => {
                Ok((source.trim().to_string(), target.trim().to_string()))
            }
            _ => Err(IndexerError::config(format!(
                "Invalid BUCKET_ROUTES entry '{pair}', expected source=target"
            ))),
        })
        .collect()
}

fn parse_failure_policy(raw: &str) -> Result<EnrichmentFailurePolicy, IndexerError> {
    match raw.to_ascii_lowercase().as_str() {
        "fail" => Ok(EnrichmentFailurePolicy::FailPipeline),
        "degrade" => Ok(EnrichmentFailurePolicy::Degrade),
        other => Err(IndexerError::config(format!(
            "Invalid ENRICHMENT_ON_FAILURE '{other}', expected fail or degrade"
        ))),
    }
}
