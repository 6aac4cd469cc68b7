//! Expiry sweeper: recurring deletion of messages past their retention
//! window.
//!
//! Runs on its own schedule, fully decoupled from the connection event
//! path, and never touches live session state. A failed sweep is logged
//! and retried on the next tick; it must never take the process down with
//! it. The underlying delete is a pure range delete, so repeated or
//! overlapping runs are harmless.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use rencontre_store::{Database, StoreError};

/// Delete every message whose `expires_at` has passed. Returns the number
/// of rows removed.
pub async fn sweep_once(db: &Mutex<Database>) -> Result<usize, StoreError> {
    let db = db.lock().await;
    db.delete_expired(Utc::now())
}

/// Run the sweeper forever at the given cadence.
///
/// Spawned as a background task from `main`; the loop itself serializes
/// runs, and every error is swallowed after logging.
pub async fn run(db: Arc<Mutex<Database>>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(interval_secs = interval.as_secs(), "expiry sweeper started");

    loop {
        ticker.tick().await;

        match sweep_once(&db).await {
            Ok(0) => debug!("sweep found nothing to delete"),
            Ok(removed) => info!(removed, "swept expired messages"),
            Err(e) => warn!(error = %e, "sweep failed, will retry next tick"),
        }
    }
}
