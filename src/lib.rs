pub mod batch;
pub mod cli;
pub mod client;
pub mod config;
pub mod metrics;

pub use batch::LabelSet;
pub use client::{new_client, Client, ClientError};
pub use metrics::Metrics;
