//! deaddropd: anonymous dead-drop server daemon
//!
//! Usage:
//!   deaddropd [--config /etc/deaddrop/config.toml]
//!
//! The daemon owns the storage core: encrypted drop storage, receipt keys,
//! quota accounting, honeypot decoys and the expiry sweep. The HTTP request
//! surface is mounted by the embedding layer against the storage manager.

mod daemon;
mod metrics;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "deaddropd", version, about = "Anonymous dead-drop server daemon")]
struct Cli {
    /// Path to deaddrop.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "DEADDROP_CONFIG",
        default_value = "/etc/deaddrop/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "DEADDROP_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "DEADDROP_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log, &cli.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "deaddropd starting"
    );

    let config = load_config(&cli.config).await?;
    daemon::run(config).await
}

async fn load_config(path: &PathBuf) -> Result<deaddrop_core::config::DropConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    } else {
        tracing::warn!("config file not found: {}  (using defaults)", path.display());
        Ok(deaddrop_core::config::DropConfig::default())
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
