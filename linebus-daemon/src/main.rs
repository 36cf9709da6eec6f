//! linebus - newline-delimited fan-out over stdio and Unix sockets
//!
//! Every line read from stdin (`-i`) or from any client of the listed sockets
//! is written to every other attached writer: stdout (`-o`) and all socket
//! clients.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use linebus_daemon::app;
use linebus_daemon::cli::Cli;
use linebus_daemon::config::DaemonConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout may be carrying bus traffic
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    let config = DaemonConfig::load(&cli).context("Failed to load configuration")?;
    if let Some(path) = &config.config_path {
        tracing::debug!("Configuration loaded from {}", path.display());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let result = runtime.block_on(app::run(config));

    // A pending stdin read would otherwise hold up exit
    runtime.shutdown_timeout(Duration::from_millis(100));

    result
}
