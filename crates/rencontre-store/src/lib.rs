//! # rencontre-store
//!
//! Ephemeral message storage for the Rencontre relay, backed by SQLite.
//!
//! Every stored message carries an `expires_at` timestamp; nothing in this
//! crate deletes rows except [`Database::delete_expired`], which the
//! server's expiry sweeper calls on a fixed cadence. The crate exposes a
//! synchronous `Database` handle wrapping a `rusqlite::Connection`.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::EphemeralMessage;
