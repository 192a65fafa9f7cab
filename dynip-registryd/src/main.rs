mod api;
mod config;
mod error;
mod freshness;
mod prober;
mod registrar;
mod resolver;
mod store;
mod store_manager;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::prober::{HttpProbeClient, Prober};
use crate::registrar::Registrar;
use crate::resolver::StatusResolver;
use crate::store::db::EndpointDb;
use crate::store::EndpointStore;
use crate::store_manager::StoreHandle;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dynip_registryd=info"))
        )
        .init();

    tracing::info!("Starting dynip-registryd");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/dynip/registryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let db = EndpointDb::open(&config.store.db_path)?;
    tracing::info!("Opened database at {:?}", config.store.db_path);

    let store_handle = StoreHandle::spawn(db);
    let store: Arc<dyn EndpointStore> = Arc::new(store_handle.clone());

    let registrar = Arc::new(Registrar::new(store.clone(), config.registry.secret.clone()));
    let resolver = Arc::new(StatusResolver::new(store.clone(), config.registry.max_age()));
    let probe_client = Arc::new(HttpProbeClient::new()?);
    let prober = Prober::new(store.clone(), probe_client, &config.prober);

    let cancel = CancellationToken::new();

    // Spawn prober task
    let prober_cancel = cancel.clone();
    let prober_interval = config.prober.interval();
    let prober_handle = tokio::spawn(async move {
        prober::run(prober, prober_interval, prober_cancel).await;
    });

    let app_state = api::routes::AppState {
        registrar,
        resolver,
        store,
        default_service: Arc::from(config.registry.default_service.as_str()),
    };
    let app = api::routes::router(app_state)
        .into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    let _ = tokio::join!(prober_handle, server_handle);

    if let Err(e) = store_handle.shutdown().await {
        tracing::error!("Failed to shutdown store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use crate::config::ProberConfig;
    use crate::error::{ProbeError, ResolveError};
    use crate::prober::ProbeClient;
    use crate::registrar::{Announcement, Forwarding};

    const SECRET: &str = "CN_1268";

    struct Unreachable;

    #[async_trait]
    impl ProbeClient for Unreachable {
        async fn probe(&self, _address: &str, _port: u16, _timeout: std::time::Duration) -> Result<String, ProbeError> {
            Err(ProbeError::Timeout)
        }
    }

    fn announce_loc1() -> Announcement {
        Announcement {
            service_id: "loc1".to_string(),
            secret: Some(SECRET.to_string()),
            source_address: "203.0.113.5".to_string(),
            source_port: 5000,
            forwarding: Forwarding::default(),
            requested_port: None,
        }
    }

    fn components() -> (Registrar, StatusResolver, Prober) {
        let store: Arc<dyn EndpointStore> =
            Arc::new(StoreHandle::spawn(EndpointDb::open(":memory:").unwrap()));
        (
            Registrar::new(store.clone(), SECRET),
            StatusResolver::new(store.clone(), Duration::seconds(60)),
            Prober::new(store, Arc::new(Unreachable), &ProberConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_registration_goes_stale() {
        let (registrar, resolver, _) = components();
        let registered = Utc::now();
        registrar.register(announce_loc1(), registered).await.unwrap();

        let resolved = resolver
            .resolve("loc1", registered + Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!((resolved.address.as_str(), resolved.port), ("203.0.113.5", 5000));

        let later = resolver.resolve("loc1", registered + Duration::seconds(61)).await;
        assert!(matches!(later, Err(ResolveError::NotAvailable)));
    }

    #[tokio::test]
    async fn test_failed_probe_revokes_before_max_age() {
        let (registrar, resolver, prober) = components();
        let registered = Utc::now();
        registrar.register(announce_loc1(), registered).await.unwrap();

        let report = prober.sweep().await;
        assert_eq!(report.demoted, 1);

        let result = resolver.resolve("loc1", registered + Duration::seconds(1)).await;
        assert!(matches!(result, Err(ResolveError::NotAvailable)));

        // Re-registering brings it back.
        let again = registered + Duration::seconds(2);
        registrar.register(announce_loc1(), again).await.unwrap();
        assert!(resolver.resolve("loc1", again).await.is_ok());
    }
}
