use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::api::create_router;
use crate::config::KeyxConfig;
use crate::engine::ProtocolEngine;
use crate::key_store::KeyStore;
use crate::registry::IdentityRegistry;
use crate::storage::create_storage;

/// Application state
pub struct AppState {
    /// Protocol engine
    pub engine: ProtocolEngine,
    /// Key store over the configured storage backend
    pub key_store: KeyStore,
    /// Configuration
    pub config: KeyxConfig,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}

/// Build the application state from configuration
///
/// Opens storage, loads or creates the server key pair and rehydrates the
/// identity registry. Completes before any request is served.
///
/// # Arguments
///
/// * `config` - The configuration
///
/// # Returns
///
/// * `Result<Arc<AppState>, eyre::Error>` - The ready state
pub async fn build_state(config: KeyxConfig) -> eyre::Result<Arc<AppState>> {
    if config.keys.passphrase.is_none() {
        warn!("No server key passphrase configured, using the built-in placeholder; set KEYX__KEYS__PASSPHRASE");
    }

    let storage = create_storage(&config.storage)?;
    let key_store = KeyStore::new(storage);

    let server_key = key_store
        .load_or_create_server_key_pair(&config.keys)
        .await?;

    let policy = config.keys.client_key_policy();
    let registry = IdentityRegistry::load(key_store.clone(), &policy).await?;
    info!(identities = registry.len(), "Loaded registered identities");

    let engine = ProtocolEngine::new(Arc::new(registry), Arc::new(server_key), policy);

    Ok(Arc::new(AppState {
        engine,
        key_store,
        config,
        started_at: Instant::now(),
    }))
}

/// Serve the key exchange API on an already bound listener
///
/// # Arguments
///
/// * `listener` - The bound listener
/// * `state` - The application state
///
/// # Returns
///
/// * `Result<(), eyre::Error>` - Success or error
pub async fn start_server(listener: TcpListener, state: Arc<AppState>) -> eyre::Result<()> {
    let app = create_router(Arc::clone(&state), &state.config);

    info!("Key exchange service listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Wait for a shutdown signal
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
