use super::{Client, ClientError};
use crate::batch::{Batch, LabelSet};
use crate::client::sorted::wait_check_frequency;
use crate::config::{BackoffConfig, ClientConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const TENANT_HEADER: &str = "X-Scope-OrgID";

/// Delivery client for the Loki push API.
///
/// `handle` only queues the line. A background task groups queued lines into
/// batches by size and age and POSTs them, retrying with exponential backoff
/// on server errors, throttling and connection failures.
pub struct PushClient {
    host: String,
    entries: mpsc::UnboundedSender<PushEntry>,
    quit: CancellationToken,
    done: CancellationToken,
}

struct PushEntry {
    labels: LabelSet,
    timestamp: DateTime<Utc>,
    line: String,
}

impl PushClient {
    /// Validates the destination and starts the send task. Must be called
    /// from within a tokio runtime.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let url = Url::parse(&config.url)
            .map_err(|e| ClientError::Config(format!("invalid url '{}': {}", config.url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ClientError::Config(format!(
                "unsupported url scheme '{}'",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ClientError::Config(format!("url '{}' has no host", config.url)))?
            .to_string();

        let http = reqwest::Client::builder().timeout(config.timeout).build()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let quit = CancellationToken::new();
        let done = CancellationToken::new();

        let worker = PushWorker {
            http,
            url,
            host: host.clone(),
            tenant_id: config.tenant_id.clone(),
            batch_wait: config.batch_wait,
            batch_size: config.batch_size,
            backoff: config.backoff.clone(),
            external_labels: config.external_labels.clone(),
            batch: None,
            entries: rx,
            quit: quit.clone(),
            done: done.clone(),
        };
        tokio::spawn(worker.run());

        Ok(Self {
            host,
            entries: tx,
            quit,
            done,
        })
    }

    /// Destination host name, used to label metrics.
    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl Client for PushClient {
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
            .send(PushEntry {
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

struct PushWorker {
    http: reqwest::Client,
    url: Url,
    host: String,
    tenant_id: Option<String>,
    batch_wait: Duration,
    batch_size: usize,
    backoff: BackoffConfig,
    external_labels: LabelSet,
    batch: Option<Batch>,
    entries: mpsc::UnboundedReceiver<PushEntry>,
    quit: CancellationToken,
    done: CancellationToken,
}

impl PushWorker {
    async fn run(mut self) {
        let _done = self.done.clone().drop_guard();

        let mut max_wait_check = tokio::time::interval(wait_check_frequency(self.batch_wait));
        max_wait_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(host = %self.host, "Push client started");

        loop {
            tokio::select! {
                biased;

                _ = self.quit.cancelled() => break,

                entry = self.entries.recv() => match entry {
                    Some(entry) => self.add(entry).await,
                    None => break,
                },

                _ = max_wait_check.tick() => {
                    let exceeded = self
                        .batch
                        .as_ref()
                        .is_some_and(|batch| batch.age() > self.batch_wait);
                    if exceeded {
                        self.send_batch().await;
                    }
                }
            }
        }

        // Lines queued before stop still go out
        self.entries.close();
        while let Some(entry) = self.entries.recv().await {
            self.add(entry).await;
        }
        self.send_batch().await;

        info!(host = %self.host, "Push client stopped");
    }

    async fn add(&mut self, entry: PushEntry) {
        let full = self
            .batch
            .as_ref()
            .is_some_and(|batch| batch.size_bytes_after(&entry.line) > self.batch_size);
        if full {
            self.send_batch().await;
        }

        self.batch
            .get_or_insert_with(|| Batch::new(0))
            .add(entry.labels, entry.timestamp, entry.line);
    }

    async fn send_batch(&mut self) {
        let Some(batch) = self.batch.take() else {
            return;
        };

        let entries = batch.entry_count();
        let request = encode_batch(&batch, &self.external_labels);
        if request.streams.is_empty() {
            return;
        }
        let body = match serde_json::to_vec(&request) {
            Ok(body) => body,
            Err(e) => {
                error!(host = %self.host, entries, error = %e, "Failed to encode batch, dropping it");
                return;
            }
        };

        let mut backoff = self.backoff.min_period;
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.push(&body).await {
                Ok(()) => {
                    debug!(host = %self.host, entries, bytes = body.len(), "Pushed batch");
                    return;
                }
                Err(e) if !e.is_retryable() => {
                    error!(host = %self.host, entries, error = %e, "Batch rejected, dropping it");
                    return;
                }
                Err(e) => {
                    if attempts >= self.backoff.max_retries {
                        error!(
                            host = %self.host,
                            entries,
                            attempts,
                            error = %e,
                            "Max retries exceeded, dropping batch"
                        );
                        return;
                    }

                    warn!(
                        host = %self.host,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis(),
                        error = %e,
                        "Push failed, retrying"
                    );

                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.backoff.max_period);
                }
            }
        }
    }

    async fn push(&self, body: &[u8]) -> Result<(), ClientError> {
        let mut request = self
            .http
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec());
        if let Some(tenant_id) = &self.tenant_id {
            request = request.header(TENANT_HEADER, tenant_id);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        Err(ClientError::Rejected {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}

/// Body of a Loki JSON push request.
#[derive(Debug, Serialize)]
pub struct PushRequest {
    pub streams: Vec<PushStream>,
}

#[derive(Debug, Serialize)]
pub struct PushStream {
    pub stream: LabelSet,
    /// `[unix nanoseconds as string, line]` pairs
    pub values: Vec<[String; 2]>,
}

/// Entries whose timestamp has no nanosecond representation (outside
/// 1677..2262) are skipped with a warning.
pub fn encode_batch(batch: &Batch, external_labels: &LabelSet) -> PushRequest {
    let streams = batch
        .streams()
        .filter_map(|stream| {
            let values: Vec<[String; 2]> = stream
                .entries
                .iter()
                .filter_map(|entry| match entry.timestamp.timestamp_nanos_opt() {
                    Some(nanos) => Some([nanos.to_string(), entry.line.clone()]),
                    None => {
                        warn!(
                            labels = %stream.labels,
                            timestamp = %entry.timestamp,
                            "Skipping entry with timestamp out of range"
                        );
                        None
                    }
                })
                .collect();

            if values.is_empty() {
                return None;
            }
            Some(PushStream {
                stream: stream.labels.merged_with(external_labels),
                values,
            })
        })
        .collect();

    PushRequest { streams }
}
