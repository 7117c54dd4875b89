//! Daemon lifecycle: crypto self-test, storage wiring, metrics, HTTP server

use anyhow::{Context, Result};
use mvault_core::config::VaultConfig;
use mvault_crypto::{provider, CipherEngine, KeyEnvelope};
use mvault_storage::{build_operator, BlobStore, S3Credentials};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::metrics::{HealthState, VaultMetrics};
use crate::service::{MediaService, ServiceSettings};

pub async fn run(config: VaultConfig) -> Result<()> {
    info!("daemon starting");

    // Cipher backend must pass its known-answer test before any key is touched
    provider::ensure_initialized().context("crypto self-test")?;
    let engine = CipherEngine::new(&config.crypto)?;
    let envelope = match &config.crypto.master_secret {
        Some(secret) => Some(KeyEnvelope::new(engine.clone(), secret)?),
        None => {
            warn!(
                env = mvault_core::config::MASTER_SECRET_ENV,
                "no master secret configured: encrypted uploads and reads are disabled"
            );
            None
        }
    };
    info!(
        transformation = engine.transformation().name(),
        key_bits = engine.key_len() * 8,
        chunk_size = config.crypto.chunk_size,
        "cipher engine ready"
    );

    // Build storage operator and verify connectivity
    let credentials = S3Credentials::from_env();
    let op = build_operator(&config.storage, credentials.as_ref())?;
    let store = BlobStore::new(op, config.storage.prefix.clone());
    match store.check_health().await {
        Ok(()) => info!(backend = ?config.storage.backend, "storage: connected"),
        // /readyz keeps reporting 503 until the backend comes back
        Err(e) => warn!(backend = ?config.storage.backend, "storage: {e}"),
    }

    let catalog = Catalog::open(&config.streaming.catalog_path)?;
    info!(
        path = %config.streaming.catalog_path.display(),
        objects = catalog.len(),
        "catalog loaded"
    );

    let mut registry = Registry::default();
    let metrics = VaultMetrics::new(&mut registry);
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = HealthState {
            registry: Arc::new(registry),
            store: store.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    let service = Arc::new(MediaService::new(
        store,
        catalog,
        engine,
        envelope,
        ServiceSettings {
            chunk_size: config.crypto.chunk_size,
            copy_buffer_size: config.streaming.copy_buffer_size,
            max_upload_bytes: config.streaming.max_upload_bytes,
        },
        metrics,
    ));

    let listen = config.daemon.listen.clone();
    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(addr = %listen, "http: listening");

    // Send systemd ready notification
    notify_ready();

    axum::serve(listener, crate::http::router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => error!("listening for shutdown signal: {e}"),
    }
}

fn notify_ready() {
    // Send sd_notify(READY=1) to systemd if running as a service
    // Uses $NOTIFY_SOCKET env var; no-op if not set
    #[cfg(unix)]
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
