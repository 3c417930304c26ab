use crate::batch::LabelSet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub client: ClientConfig,
    #[serde(default)]
    pub input: InputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Loki push endpoint, e.g. `http://localhost:3100/loki/api/v1/push`
    pub url: String,
    /// Sent as `X-Scope-OrgID` when set
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default = "default_batch_wait", with = "humantime_serde")]
    pub batch_wait: Duration,
    /// Maximum batch size in bytes of log line text
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Added to every stream unless the entry already carries the label
    #[serde(default)]
    pub external_labels: LabelSet,
    #[serde(default)]
    pub sort_by_timestamp: bool,
    #[serde(default = "default_number_of_batch_ids")]
    pub number_of_batch_ids: u64,
    #[serde(default)]
    pub buffer: BufferConfig,
}

impl ClientConfig {
    /// Config for `url` with every other setting at its default.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tenant_id: None,
            batch_wait: default_batch_wait(),
            batch_size: default_batch_size(),
            timeout: default_timeout(),
            backoff: BackoffConfig::default(),
            external_labels: LabelSet::new(),
            sort_by_timestamp: false,
            number_of_batch_ids: default_number_of_batch_ids(),
            buffer: BufferConfig::default(),
        }
    }
}

fn default_batch_wait() -> Duration {
    Duration::from_secs(1)
}

fn default_batch_size() -> usize {
    1024 * 1024
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_number_of_batch_ids() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_min_period", with = "humantime_serde")]
    pub min_period: Duration,
    #[serde(default = "default_max_period", with = "humantime_serde")]
    pub max_period: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_period: default_min_period(),
            max_period: default_max_period(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_min_period() -> Duration {
    Duration::from_millis(500)
}

fn default_max_period() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_retries() -> usize {
    10
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BufferConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type", default)]
    pub buffer_type: BufferType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferType {
    #[default]
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Labels attached to every line read from stdin
    #[serde(default = "default_input_labels")]
    pub labels: LabelSet,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            labels: default_input_labels(),
        }
    }
}

fn default_input_labels() -> LabelSet {
    LabelSet::from([("job", "logship")])
}
