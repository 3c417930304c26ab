use crate::batch::LabelSet;
use crate::client::{new_client, Client, ClientError};
use crate::config::{load_config, ConfigError};
use crate::metrics::Metrics;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/logship/config.yml");
            eprintln!("  /etc/logship/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'logship config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_stdin(&config_path).await.map_err(|e| e.into())
}

async fn run_stdin(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let metrics = Arc::new(Metrics::new());
    let client = new_client(&config.client, Arc::clone(&metrics))?;

    info!("Forwarding stdin, press Ctrl+C to stop");

    let stdin = BufReader::new(tokio::io::stdin());
    let result = tokio::select! {
        result = forward_lines(stdin, client.as_ref(), &config.input.labels) => result,
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(0)
        }
    };

    // Flush whatever is still batched, even when reading failed
    client.stop().await;

    let lines = result?;
    info!(
        lines,
        forwarded = ?metrics.forwarded_logs().snapshot(),
        dropped = ?metrics.dropped_logs().snapshot(),
        "Shutdown complete"
    );

    Ok(())
}

/// Hand every line of `reader` to `client`, stamped with the current time.
/// Returns the number of lines accepted.
pub async fn forward_lines<R>(reader: R, client: &dyn Client, labels: &LabelSet) -> Result<u64, RunError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0;

    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        match client.handle(labels.clone(), Utc::now(), line).await {
            Ok(()) => count += 1,
            Err(ClientError::Stopped) => {
                warn!("Client stopped, no longer reading input");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(count)
}
