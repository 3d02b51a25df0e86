use std::path::PathBuf;

use mgmt::config::Configuration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    mgmt::telemetry::setup_logging();

    let metrics = match mgmt::telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "prometheus recorder not installed");
            None
        },
    };

    // read configuration file. let it in memory.
    let path = std::env::var("MGMT_CONFIG").map(PathBuf::from).unwrap_or_default();
    let config = Configuration::default().path(path).read()?;

    let mut state = mgmt::initialize_state(config).await?;
    state.metrics = metrics;

    let listener = TcpListener::bind(&state.config.address).await?;
    tracing::info!(address = %state.config.address, "server started");

    axum::serve(listener, mgmt::app(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.provisioner.shutdown().await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
