//! # rencontre-server
//!
//! Relay server pairing anonymous users into one-to-one ephemeral chat
//! sessions ("random chat").
//!
//! This binary provides:
//! - **Connection gateway** (axum WebSocket) with connect-time identity
//!   token verification; anonymous connections are permitted by default
//! - **Matchmaker** pairing waiting connections in arrival order, gated by
//!   the external block-relationship store
//! - **Typing and message relay** between session partners, with messages
//!   persisted to a TTL-bounded SQLite store
//! - **Expiry sweeper** reclaiming stored messages past their retention
//!   window on a fixed cadence
//! - **REST surface** for health checks and instance stats

mod api;
mod blocklist;
mod config;
mod error;
mod gateway;
mod identity;
mod matchmaker;
mod registry;
mod relay;
mod sweeper;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rencontre_store::Database;

use crate::api::AppState;
use crate::blocklist::{BlockGuard, BlockStore, MemoryBlockStore};
use crate::config::ServerConfig;
use crate::identity::IdentityVerifier;
use crate::matchmaker::Matchmaker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rencontre_server=debug")),
        )
        .init();

    info!("Starting Rencontre server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        allow_anonymous = config.allow_anonymous,
        retention_hours = config.retention_hours,
        sweep_interval_secs = config.sweep_interval_secs,
        "Instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Ephemeral message store (creates the database if missing)
    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let db = Arc::new(Mutex::new(db));

    // Identity verifier with the auth server public key
    let verifier = Arc::new(IdentityVerifier::new(config.auth_server_pubkey));

    // Block guard over the block-relationship store
    let guard = BlockGuard::new(Arc::new(MemoryBlockStore::new()) as Arc<dyn BlockStore>);

    // Matchmaker: waiting pool + session registry behind one lock
    let matchmaker = Arc::new(Matchmaker::new(
        guard.clone(),
        config.requeue_on_partner_loss,
    ));

    let app_state = AppState {
        matchmaker,
        verifier,
        guard,
        db: db.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Expiry sweeper (swallows its own errors; retries next tick)
    tokio::spawn(sweeper::run(db, config.sweep_interval()));

    // Periodic identity cache cleanup (every 10 minutes)
    let verifier = app_state.verifier.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;
            verifier.purge_expired().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
