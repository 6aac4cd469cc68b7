//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use rencontre_shared::constants::{DEFAULT_RETENTION_HOURS, DEFAULT_SWEEP_INTERVAL_SECS};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the ephemeral message database.
    /// Env: `DB_PATH`
    /// Default: platform data directory (see `rencontre_store::Database::new`).
    pub db_path: Option<PathBuf>,

    /// Ed25519 public key of the auth server (hex-encoded, 64 chars).
    /// Env: `AUTH_SERVER_PUBKEY`
    /// Default: all-zeros (development only; rejects every token).
    pub auth_server_pubkey: [u8; 32],

    /// Whether connections without an identity token are accepted.
    /// Env: `ALLOW_ANONYMOUS` (true/false)
    /// Default: `true`
    pub allow_anonymous: bool,

    /// Retention window for stored messages, in hours.
    /// Env: `RETENTION_HOURS`
    /// Default: `24`
    pub retention_hours: u64,

    /// Cadence of the expiry sweeper, in seconds.
    /// Env: `SWEEP_INTERVAL_SECS`
    /// Default: `86400` (daily)
    pub sweep_interval_secs: u64,

    /// Whether a user whose partner left or disconnected is automatically
    /// put back into the waiting pool.
    /// Env: `REQUEUE_ON_PARTNER_LOSS` (true/false)
    /// Default: `true`
    pub requeue_on_partner_loss: bool,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Rencontre"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            db_path: None,
            auth_server_pubkey: [0u8; 32],
            allow_anonymous: true,
            retention_hours: DEFAULT_RETENTION_HOURS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            requeue_on_partner_loss: true,
            instance_name: "Rencontre".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(hex_key) = std::env::var("AUTH_SERVER_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.auth_server_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid AUTH_SERVER_PUBKEY, using default (dev-only)"
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("ALLOW_ANONYMOUS") {
            config.allow_anonymous = val != "false" && val != "0";
        }

        if let Ok(val) = std::env::var("RETENTION_HOURS") {
            if let Ok(n) = val.parse::<u64>() {
                config.retention_hours = n;
            }
        }

        if let Ok(val) = std::env::var("SWEEP_INTERVAL_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.sweep_interval_secs = n;
            }
        }

        if let Ok(val) = std::env::var("REQUEUE_ON_PARTNER_LOSS") {
            config.requeue_on_partner_loss = val != "false" && val != "0";
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Message retention window as a chrono duration.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours as i64)
    }

    /// Sweep cadence as a std duration.
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(hex_str: &str) -> Result<[u8; 32], String> {
    let hex_str = hex_str.trim();
    if hex_str.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex_str.len()));
    }

    let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
