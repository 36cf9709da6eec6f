//! Process lifecycle: wire up stdio and listeners, then wait for an exit condition

use anyhow::{Context, Result};
use linebus_broadcaster::LineBus;
use tokio::task::JoinSet;
use tracing::info;

use crate::config::DaemonConfig;

/// Run the bus until stdin closes (unless running forever), a listener fails,
/// or the process is interrupted.
pub async fn run(config: DaemonConfig) -> Result<()> {
    let bus = LineBus::new(config.bus.clone()).context("Invalid bus configuration")?;

    let stdio = bus.admit_stdio(config.stdin, config.stdout);

    // Bind everything up front so a bad path fails before any traffic flows
    let mut listeners = JoinSet::new();
    for path in &config.listen {
        let server = bus
            .bind(path)
            .with_context(|| format!("Failed to listen on {}", path.display()))?;
        listeners.spawn(server.run());
    }

    info!(
        "linebus ready (stdin: {}, stdout: {}, sockets: {}, echo: {}, json: {})",
        config.stdin,
        config.stdout,
        config.listen.len(),
        config.bus.echo,
        config.bus.require_well_formed
    );

    let wait_for_stdin = config.stdin && !config.run_forever;
    let stdin_done = async move {
        match stdio {
            Some(handle) if wait_for_stdin => handle.wait().await,
            _ => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = stdin_done => {
            info!("stdin closed, shutting down");
            Ok(())
        }
        Some(result) = listeners.join_next() => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e).context("Listener stopped"),
            Err(e) => Err(e).context("Listener task failed"),
        },
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Received shutdown signal");
            Ok(())
        }
    }
}
