use super::{Client, ClientError, PushClient};
use crate::batch::LabelSet;
use crate::config::ClientConfig;
use crate::metrics::Metrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Counts every line the inner client accepts in `forwarded_logs{host}`.
pub struct ForwardedLogsClient {
    inner: Arc<dyn Client>,
    host: String,
    metrics: Arc<Metrics>,
}

impl ForwardedLogsClient {
    /// Counted push client for `config.url`.
    pub fn new(config: &ClientConfig, metrics: Arc<Metrics>) -> Result<Self, ClientError> {
        let push = PushClient::new(config)?;
        let host = push.host().to_string();
        Ok(Self::wrap(Arc::new(push), host, metrics))
    }

    pub fn wrap(inner: Arc<dyn Client>, host: impl Into<String>, metrics: Arc<Metrics>) -> Self {
        Self {
            inner,
            host: host.into(),
            metrics,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl Client for ForwardedLogsClient {
    async fn handle(
        &self,
        labels: LabelSet,
        timestamp: DateTime<Utc>,
        line: String,
    ) -> Result<(), ClientError> {
        self.inner.handle(labels, timestamp, line).await?;
        self.metrics.forwarded_logs().inc(&self.host);
        Ok(())
    }

    async fn stop(&self) {
        self.inner.stop().await;
    }
}
