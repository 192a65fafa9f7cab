mod announcer;
mod config;
mod responder;

use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::announcer::Announcer;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dynip_client=info"))
        )
        .init();

    tracing::info!("Starting dynip-client");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/dynip/client.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let cancel = CancellationToken::new();

    // Bind the responder first so the registry never probes a closed port
    let listener = tokio::net::TcpListener::bind(&config.responder.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.responder.listen))?;

    tracing::info!("Probe responder listening on {}", config.responder.listen);

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, responder::router())
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Responder error: {}", e);
        }
    });

    let announcer = Announcer::new(&config)?;
    let interval = config.client.announce_interval();
    let announcer_cancel = cancel.clone();
    let announcer_handle = tokio::spawn(async move {
        announcer::run(announcer, interval, announcer_cancel).await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    let _ = tokio::join!(announcer_handle, server_handle);

    tracing::info!("Shutdown complete");
    Ok(())
}
