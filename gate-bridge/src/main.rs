//! HBCE Bridge Binary
//!
//! Boots the gate in its safe state, then serves HTTP and (optionally) polls.

use anyhow::Context;
use gate_bridge::{router, telemetry, Poller};
use gate_core::{actuator, Config, GateService};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration: file from argv or BRIDGE_CONFIG, then env overrides
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BRIDGE_CONFIG").ok());
    let config = match &config_path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path))?
            .apply_env()?,
        None => Config::from_env()?,
    };

    telemetry::init(config.log_format)?;
    config.validate()?;

    info!(
        service = %config.service_name,
        version = %config.service_version,
        config = ?config_path,
        "Starting HBCE bridge"
    );

    let sink = actuator::from_config(&config.actuator)
        .await
        .context("starting actuator")?;
    let gate = GateService::open(config.clone(), sink).context("opening gate")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = if config.poll.enabled {
        let poller = Poller::new(&config.poll, gate.clone())?;
        Some(tokio::spawn(poller.run(shutdown_rx)))
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "HTTP surface listening");

    axum::serve(listener, router(gate.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Some(handle) = poller {
        if let Err(e) = handle.await {
            warn!(error = %e, "Poller task ended abnormally");
        }
    }
    gate.shutdown().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
