//! Batching client that orders entries by timestamp before delivery.
//!
//! A single worker task owns the current batch. Producers hand entries to it
//! through a channel with room for one entry, so `handle` waits while the
//! worker is busy flushing. The worker flushes when the next entry would push
//! the batch over `batch_size`, when the batch is older than `batch_wait`, and
//! once more on stop. Flushing sorts every stream by timestamp and passes the
//! entries one by one to the inner client.

use super::{Client, ClientError, ForwardedLogsClient};
use crate::batch::{Batch, LabelSet};
use crate::config::ClientConfig;
use crate::metrics::Metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MIN_WAIT_CHECK_FREQUENCY: Duration = Duration::from_millis(10);
const WAIT_CHECK_FREQUENCY_DELIMITER: u32 = 10;

/// Batch wait handed to the inner push client. The sorted layer applies the
/// configured wait itself.
pub const INNER_BATCH_WAIT: Duration = Duration::from_secs(5);

/// How often a batch's age is compared against `batch_wait`.
pub fn wait_check_frequency(batch_wait: Duration) -> Duration {
    std::cmp::max(
        batch_wait / WAIT_CHECK_FREQUENCY_DELIMITER,
        MIN_WAIT_CHECK_FREQUENCY,
    )
}

#[derive(Debug, Clone)]
pub struct SortedClientConfig {
    pub batch_wait: Duration,
    pub batch_size: usize,
    /// Batch ids rotate through `0..number_of_batch_ids`
    pub number_of_batch_ids: u64,
    /// Destination host, labels the dropped-logs counter
    pub host: String,
}

/// Snapshot of the batch currently held by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStatus {
    pub batch_id: u64,
    pub streams: usize,
    pub entries: usize,
    pub size_bytes: usize,
    pub age: Duration,
    pub wait_exceeded: bool,
}

pub struct SortedClient {
    entries: mpsc::Sender<PendingEntry>,
    control: mpsc::UnboundedSender<ControlRequest>,
    quit: CancellationToken,
    done: CancellationToken,
}

struct PendingEntry {
    labels: LabelSet,
    timestamp: DateTime<Utc>,
    line: String,
}

enum ControlRequest {
    Status(oneshot::Sender<Option<BatchStatus>>),
}

impl SortedClient {
    /// Sorted client delivering through a counted push client for
    /// `config.url`. Must be called from within a tokio runtime.
    pub fn new(config: &ClientConfig, metrics: Arc<Metrics>) -> Result<Self, ClientError> {
        check_batch_ids(config.number_of_batch_ids)?;

        let mut push_config = config.clone();
        push_config.batch_wait = INNER_BATCH_WAIT;

        let inner = ForwardedLogsClient::new(&push_config, Arc::clone(&metrics))?;
        let sorted_config = SortedClientConfig {
            batch_wait: config.batch_wait,
            batch_size: config.batch_size,
            number_of_batch_ids: config.number_of_batch_ids,
            host: inner.host().to_string(),
        };

        Self::with_inner(Arc::new(inner), sorted_config, metrics)
    }

    /// Sorted client delivering through `inner`. Starts the worker task.
    pub fn with_inner(
        inner: Arc<dyn Client>,
        config: SortedClientConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ClientError> {
        check_batch_ids(config.number_of_batch_ids)?;

        // Room for a single entry: producers wait while the worker is busy
        let (entries_tx, entries_rx) = mpsc::channel(1);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let quit = CancellationToken::new();
        let done = CancellationToken::new();

        let worker = Worker {
            inner,
            config,
            metrics,
            batch: None,
            batch_id: 0,
            entries: entries_rx,
            control: control_rx,
            quit: quit.clone(),
            done: done.clone(),
        };
        tokio::spawn(worker.run());

        Ok(Self {
            entries: entries_tx,
            control: control_tx,
            quit,
            done,
        })
    }

    /// Current batch as seen by the worker, `None` when no batch is open.
    pub async fn status(&self) -> Result<Option<BatchStatus>, ClientError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.control
            .send(ControlRequest::Status(response_tx))
            .map_err(|_| ClientError::Stopped)?;
        response_rx.await.map_err(|_| ClientError::Stopped)
    }
}

fn check_batch_ids(number_of_batch_ids: u64) -> Result<(), ClientError> {
    if number_of_batch_ids == 0 {
        return Err(ClientError::Config(
            "number_of_batch_ids must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl Client for SortedClient {
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
            .send(PendingEntry {
                labels,
                timestamp,
                line,
            })
            .await
            .map_err(|_| ClientError::Stopped)
    }

    async fn stop(&self) {
        self.quit.cancel();
        self.done.cancelled().await;
    }
}

struct Worker {
    inner: Arc<dyn Client>,
    config: SortedClientConfig,
    metrics: Arc<Metrics>,
    batch: Option<Batch>,
    batch_id: u64,
    entries: mpsc::Receiver<PendingEntry>,
    control: mpsc::UnboundedReceiver<ControlRequest>,
    quit: CancellationToken,
    done: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        // Releases every `stop` caller once the final flush is over, even if
        // the worker panics
        let _done = self.done.clone().drop_guard();

        let check_frequency = wait_check_frequency(self.config.batch_wait);
        let mut max_wait_check = tokio::time::interval(check_frequency);
        max_wait_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            host = %self.config.host,
            batch_wait_ms = self.config.batch_wait.as_millis(),
            batch_size = self.config.batch_size,
            check_frequency_ms = check_frequency.as_millis(),
            "Sorted client started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.quit.cancelled() => break,

                entry = self.entries.recv() => match entry {
                    Some(entry) => self.on_entry(entry).await,
                    None => break,
                },

                Some(request) = self.control.recv() => self.on_control(request),

                _ = max_wait_check.tick() => {
                    if self.is_batch_wait_exceeded() {
                        self.send_batch().await;
                    }
                }
            }
        }

        self.control.close();

        // Entries already handed off are part of the final flush
        self.entries.close();
        while let Some(entry) = self.entries.recv().await {
            self.on_entry(entry).await;
        }
        self.send_batch().await;

        self.inner.stop().await;

        info!(host = %self.config.host, "Sorted client stopped");
    }

    async fn on_entry(&mut self, entry: PendingEntry) {
        let full = self
            .batch
            .as_ref()
            .is_some_and(|batch| batch.size_bytes_after(&entry.line) > self.config.batch_size);
        if full {
            self.send_batch().await;
        }

        self.add_to_batch(entry);
    }

    fn on_control(&self, request: ControlRequest) {
        match request {
            ControlRequest::Status(response_tx) => {
                let status = self.batch.as_ref().map(|batch| {
                    let age = batch.age();
                    BatchStatus {
                        batch_id: batch.id(),
                        streams: batch.stream_count(),
                        entries: batch.entry_count(),
                        size_bytes: batch.size_bytes(),
                        age,
                        wait_exceeded: age > self.config.batch_wait,
                    }
                });
                if response_tx.send(status).is_err() {
                    debug!("Status requester went away");
                }
            }
        }
    }

    fn is_batch_wait_exceeded(&self) -> bool {
        self.batch
            .as_ref()
            .is_some_and(|batch| batch.age() > self.config.batch_wait)
    }

    fn add_to_batch(&mut self, entry: PendingEntry) {
        if self.batch.is_none() {
            self.batch_id += 1;
            self.batch = Some(Batch::new(self.batch_id % self.config.number_of_batch_ids));
        }

        if let Some(batch) = self.batch.as_mut() {
            batch.add(entry.labels, entry.timestamp, entry.line);
        }
    }

    /// Sort the current batch and deliver it entry by entry. Failed entries
    /// are counted and dropped.
    async fn send_batch(&mut self) {
        let Some(mut batch) = self.batch.take() else {
            return;
        };

        batch.sort();

        let batch_id = batch.id();
        let entries = batch.entry_count();
        let size_bytes = batch.size_bytes();
        let mut dropped = 0;

        for stream in batch.into_streams() {
            for entry in stream.entries {
                let result = self
                    .inner
                    .handle(stream.labels.clone(), entry.timestamp, entry.line)
                    .await;
                if let Err(e) = result {
                    dropped += 1;
                    self.metrics.dropped_logs().inc(&self.config.host);
                    warn!(
                        host = %self.config.host,
                        batch_id,
                        labels = %stream.labels,
                        error = %e,
                        "Dropped log entry"
                    );
                }
            }
        }

        debug!(
            host = %self.config.host,
            batch_id,
            entries,
            size_bytes,
            dropped,
            "Flushed batch"
        );
    }
}
