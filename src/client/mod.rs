pub mod buffer;
pub mod forwarded;
pub mod push;
pub mod sorted;

pub use buffer::BufferedClient;
pub use forwarded::ForwardedLogsClient;
pub use push::PushClient;
pub use sorted::{BatchStatus, SortedClient, SortedClientConfig};

use crate::batch::LabelSet;
use crate::config::ClientConfig;
use crate::metrics::Metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid client config: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("push rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("client is stopped")]
    Stopped,
}

impl ClientError {
    /// Whether sending the same request again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(_) => true,
            ClientError::Rejected { status, .. } => *status >= 500 || *status == 429,
            ClientError::Config(_) | ClientError::Stopped => false,
        }
    }
}

/// A sink for log lines.
///
/// `handle` hands one entry to the client. `stop` flushes whatever the client
/// still holds and releases its workers; it is safe to call more than once
/// and returns only after the flush is complete.
#[async_trait]
pub trait Client: Send + Sync {
    async fn handle(
        &self,
        labels: LabelSet,
        timestamp: DateTime<Utc>,
        line: String,
    ) -> Result<(), ClientError>;

    async fn stop(&self);
}

/// Build the client chain selected by `config`:
///
/// - plain: forwarded-logs counter around the push client
/// - `sort_by_timestamp`: the sorted batching client in front of that
/// - `buffer.enabled`: a memory buffer in front of either
///
/// Must be called from within a tokio runtime.
pub fn new_client(config: &ClientConfig, metrics: Arc<Metrics>) -> Result<Arc<dyn Client>, ClientError> {
    let client: Arc<dyn Client> = if config.sort_by_timestamp {
        Arc::new(SortedClient::new(config, metrics)?)
    } else {
        Arc::new(ForwardedLogsClient::new(config, metrics)?)
    };

    info!(
        url = %config.url,
        sort_by_timestamp = config.sort_by_timestamp,
        buffered = config.buffer.enabled,
        "Created log client"
    );

    if config.buffer.enabled {
        return Ok(Arc::new(BufferedClient::new(client)));
    }

    Ok(client)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConfig;

    #[test]
    fn test_retryable_errors() {
        let server = ClientError::Rejected {
            status: 503,
            message: String::new(),
        };
        let throttled = ClientError::Rejected {
            status: 429,
            message: String::new(),
        };
        let bad_request = ClientError::Rejected {
            status: 400,
            message: String::new(),
        };

        assert!(server.is_retryable());
        assert!(throttled.is_retryable());
        assert!(!bad_request.is_retryable());
        assert!(!ClientError::Stopped.is_retryable());
    }

    #[tokio::test]
    async fn test_new_client_rejects_bad_url() {
        let config = ClientConfig::with_url("not a url");
        let result = new_client(&config, Arc::new(Metrics::new()));
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn test_new_client_rejects_zero_batch_ids() {
        let mut config = ClientConfig::with_url("http://127.0.0.1:9/loki/api/v1/push");
        config.sort_by_timestamp = true;
        config.number_of_batch_ids = 0;
        let result = new_client(&config, Arc::new(Metrics::new()));
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[tokio::test]
    async fn test_new_client_every_combination_starts_and_stops() {
        for sort_by_timestamp in [false, true] {
            for enabled in [false, true] {
                let mut config = ClientConfig::with_url("http://127.0.0.1:9/loki/api/v1/push");
                config.sort_by_timestamp = sort_by_timestamp;
                config.buffer = BufferConfig {
                    enabled,
                    ..BufferConfig::default()
                };

                let client = new_client(&config, Arc::new(Metrics::new())).unwrap();
                client.stop().await;
                client.stop().await;

                let result = client
                    .handle(LabelSet::from([("job", "x")]), Utc::now(), "late".to_string())
                    .await;
                assert!(matches!(result, Err(ClientError::Stopped)));
            }
        }
    }
}
