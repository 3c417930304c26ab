use super::{Client, ClientError};
use crate::batch::LabelSet;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// In-memory queue in front of another client.
///
/// `handle` returns as soon as the line is queued; a background task feeds
/// queued lines to the inner client in order. On stop the queue is drained
/// into the inner client before the inner client itself is stopped.
pub struct BufferedClient {
    entries: mpsc::UnboundedSender<BufferedEntry>,
    quit: CancellationToken,
    done: CancellationToken,
}

struct BufferedEntry {
    labels: LabelSet,
    timestamp: DateTime<Utc>,
    line: String,
}

impl BufferedClient {
    /// Must be called from within a tokio runtime.
    pub fn new(inner: Arc<dyn Client>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let quit = CancellationToken::new();
        let done = CancellationToken::new();

        tokio::spawn(run_forwarder(inner, rx, quit.clone(), done.clone()));

        Self {
            entries: tx,
            quit,
            done,
        }
    }
}

#[async_trait]
impl Client for BufferedClient {
    async fn handle(
        &self,
        labels: LabelSet,
        timestamp: DateTime<Utc>,
        line: String,
    ) -> Result<(), ClientError> {
        if self.quit.is_cancelled() {
            return Err(ClientError::Stopped);
        }
        self.entries
            .send(BufferedEntry {
                labels,
                timestamp,
                line,
            })
            .map_err(|_| ClientError::Stopped)
    }

    async fn stop(&self) {
        self.quit.cancel();
        self.done.cancelled().await;
    }
}

async fn run_forwarder(
    inner: Arc<dyn Client>,
    mut entries: mpsc::UnboundedReceiver<BufferedEntry>,
    quit: CancellationToken,
    done: CancellationToken,
) {
    let _done = done.drop_guard();
    let mut forwarded: u64 = 0;

    debug!("Memory buffer started");

    loop {
        tokio::select! {
            biased;

            _ = quit.cancelled() => break,

            entry = entries.recv() => match entry {
                Some(entry) => {
                    forward(inner.as_ref(), entry).await;
                    forwarded += 1;
                }
                None => break,
            },
        }
    }

    entries.close();
    let mut drained: u64 = 0;
    while let Some(entry) = entries.recv().await {
        forward(inner.as_ref(), entry).await;
        drained += 1;
    }

    inner.stop().await;

    info!(forwarded, drained, "Memory buffer stopped");
}

async fn forward(inner: &dyn Client, entry: BufferedEntry) {
    if let Err(e) = inner
        .handle(entry.labels, entry.timestamp, entry.line)
        .await
    {
        warn!(error = %e, "Buffered log entry was not accepted");
    }
}
