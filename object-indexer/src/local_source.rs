//! Newline-delimited notification source for local runs.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, instrument, warn};

use crate::IndexerError;
use object_indexer_pipeline::intake::parse_bucket_notification;
use object_indexer_pipeline::StreamMessage;

/// Default number of lines grouped into one batch.
const DEFAULT_BATCH_SIZE: usize = 100;

/// Default time a partial batch waits for more lines.
const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(50);

/// Reads one bucket notification document per line and forwards the parsed
/// notifications to the orchestrator.
pub struct LineNotificationSource<R> {
    reader: R,
    batch_size: usize,
    batch_timeout: Duration,
}

impl<R> LineNotificationSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }

    pub fn with_batching(mut self, batch_size: usize, batch_timeout: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.batch_timeout = batch_timeout;
        self
    }

    /// Read until EOF, then send `StreamMessage::End`.
    ///
    /// Lines that fail to parse, and single records within a line that fail
    /// to decode, are reported as `StreamMessage::Error` and skipped. A read
    /// error ends the stream and is returned. Stops early without error once
    /// the receiving side is gone.
    #[instrument(skip(self, sender))]
    pub async fn run(self, sender: mpsc::Sender<StreamMessage>) -> Result<(), IndexerError> {
        let lines = LinesStream::new(BufReader::new(self.reader).lines())
            .chunks_timeout(self.batch_size, self.batch_timeout);
        tokio::pin!(lines);

        let mut read_error = None;
        while let Some(batch) = lines.next().await {
            let mut notifications = Vec::new();
            for line in batch {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        error!(error = %e, "Failed to read notification input");
                        read_error = Some(e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let records = match parse_bucket_notification(line.as_bytes()) {
                    Ok(records) => records,
                    Err(e) => vec![Err(e)],
                };
                for record in records {
                    match record {
                        Ok(notification) => notifications.push(notification),
                        Err(e) => {
                            warn!(error = %e, "Skipping unparseable notification");
                            if sender.send(StreamMessage::Error(e.to_string())).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
            }

            if !notifications.is_empty() {
                debug!(count = notifications.len(), "Forwarding notifications");
                if sender
                    .send(StreamMessage::Notifications(notifications))
                    .await
                    .is_err()
                {
                    debug!("Receiver closed, stopping notification source");
                    return Ok(());
                }
            }
            if read_error.is_some() {
                break;
            }
        }

        info!("Notification input exhausted");
        let _ = sender.send(StreamMessage::End).await;
        match read_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
