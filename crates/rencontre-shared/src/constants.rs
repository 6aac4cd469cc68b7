/// Application name
pub const APP_NAME: &str = "Rencontre";

/// How long an ephemeral message survives before the sweeper may delete it
pub const DEFAULT_RETENTION_HOURS: u64 = 24;

/// Cadence of the expiry sweeper
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Maximum chat message size in bytes (8 KiB)
pub const MAX_MESSAGE_SIZE: usize = 8_192;

/// Default HTTP / WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;
