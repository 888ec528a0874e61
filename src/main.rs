//! Binary entry point: configure from the environment, run until Ctrl-C.

use tracing_subscriber::EnvFilter;

use greenroom_signal_server::{ServerConfig, SignalServer};

#[tokio::main]
async fn main() -> greenroom_signal_server::error::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    let handle = SignalServer::start(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl-C, shutting down");
    handle.shutdown().await;
    Ok(())
}
