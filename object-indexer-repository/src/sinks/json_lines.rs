//! Append-only JSON lines dead-letter sink.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::errors::DeadLetterError;
use crate::interfaces::DeadLetterSink;
use object_indexer_shared::DeadLetterRecord;

/// Writes one JSON document per line to a local file.
///
/// Each record is flushed before `publish` returns, so a record that was
/// acknowledged survives a restart.
pub struct JsonLinesDeadLetterSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesDeadLetterSink {
    /// Open `path` for appending, creating it and its parent directory.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DeadLetterError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(path = %path.display(), "Opened dead-letter file");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DeadLetterSink for JsonLinesDeadLetterSink {
    #[instrument(skip(self, record), fields(object_key = record.work_item.object_key(), stage = %record.failed_stage))]
    async fn publish(&self, record: &DeadLetterRecord) -> Result<(), DeadLetterError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;

        warn!(
            error_kind = %record.error_kind,
            attempts = record.attempts,
            "Dead-lettered work item"
        );
        Ok(())
    }
}
