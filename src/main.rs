use anyhow::{Context, Result};
use core_runtime::{init_logging, LoggingConfig, MirrorConfig};
use mintmirror::MirrorService;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "config.json";

#[tokio::main]
async fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = MirrorConfig::from_json_file(&path)
        .with_context(|| format!("loading configuration from {}", path))?;

    init_logging(
        LoggingConfig::default()
            .with_level(config.log_level)
            .with_format(config.log_format),
    )?;
    info!(config = %path, sources = config.sources.len(), "Starting mintmirror");

    let service = MirrorService::build(&config).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, finishing in-flight work"),
            Err(e) => warn!(error = %e, "Cannot listen for interrupt, stopping"),
        }
        signal.cancel();
    });

    service.run(shutdown).await;
    Ok(())
}
