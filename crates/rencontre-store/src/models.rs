//! Domain model structs persisted in the ephemeral store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rencontre_shared::{ConnId, SessionId, UserId};

/// A chat message with a finite time-to-live.
///
/// Mutated only by insertion; destroyed solely by the expiry sweep once
/// `expires_at` has passed, independent of session state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EphemeralMessage {
    /// Unique message identifier.
    pub id: Uuid,
    /// The session this message was relayed in. `None` once recorded after
    /// a teardown race; the row outlives the session either way.
    pub session_id: Option<SessionId>,
    /// Transient connection handle of the sender.
    pub sender_conn: ConnId,
    /// Persistent identity of the sender, when not anonymous.
    pub sender_identity: Option<UserId>,
    /// Message text.
    pub content: String,
    /// When the message was relayed.
    pub created_at: DateTime<Utc>,
    /// When the sweeper may delete this row (`created_at` + retention).
    pub expires_at: DateTime<Utc>,
}

impl EphemeralMessage {
    /// Build a message stamped `now`, expiring after `retention`.
    pub fn new(
        session_id: SessionId,
        sender_conn: ConnId,
        sender_identity: Option<UserId>,
        content: String,
        retention: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id: Some(session_id),
            sender_conn,
            sender_identity,
            content,
            created_at: now,
            expires_at: now + retention,
        }
    }
}
