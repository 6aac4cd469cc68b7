//! Typing and message relay between session partners.
//!
//! Both relays read the session registry through a consistent snapshot
//! ([`Matchmaker::session_view`]) and deliver through the partner's
//! unbounded sender. Delivery to a live socket is best-effort; for chat
//! messages the ephemeral store is the durability guarantee.

use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use rencontre_shared::constants::MAX_MESSAGE_SIZE;
use rencontre_shared::{ConnId, ServerEvent};
use rencontre_store::{Database, EphemeralMessage};

use crate::blocklist::BlockGuard;
use crate::matchmaker::Matchmaker;

/// Generic failure reported for policy rejections and store faults alike,
/// so a sender can never distinguish "blocked" from other delivery faults.
const DELIVERY_FAILED: &str = "message could not be delivered";

/// Forward a typing indicator to the partner.
///
/// A handle with no partner is an expected race (just unpaired or just
/// disconnected), so the signal is silently dropped. No buffering, no ack.
pub async fn set_typing(matchmaker: &Matchmaker, conn: ConnId, typing: bool) {
    let Some(view) = matchmaker.session_view(conn).await else {
        debug!(conn = %conn.short(), "typing signal from unpaired handle dropped");
        return;
    };

    matchmaker
        .send_to(view.partner, ServerEvent::PartnerTyping { typing })
        .await;
}

/// Relay a chat message to the partner and persist it with a TTL.
pub async fn send_message(
    matchmaker: &Matchmaker,
    guard: &BlockGuard,
    db: &Mutex<Database>,
    retention: Duration,
    conn: ConnId,
    content: String,
) {
    let Some(view) = matchmaker.session_view(conn).await else {
        // Session already ended; tell the client to stop sending.
        matchmaker
            .send_to(
                conn,
                ServerEvent::Error {
                    message: "no active session".to_string(),
                },
            )
            .await;
        return;
    };

    if content.is_empty() || content.len() > MAX_MESSAGE_SIZE {
        matchmaker
            .send_to(
                conn,
                ServerEvent::Error {
                    message: format!("message must be 1..={MAX_MESSAGE_SIZE} bytes"),
                },
            )
            .await;
        return;
    }

    // Blocks may appear mid-session; check on every relay.
    if guard.either_blocked(view.sender_identity.as_ref(), view.partner_identity.as_ref()) {
        debug!(session = %view.session_id, "relay suppressed by block policy");
        matchmaker
            .send_to(
                conn,
                ServerEvent::Error {
                    message: DELIVERY_FAILED.to_string(),
                },
            )
            .await;
        return;
    }

    let message = EphemeralMessage::new(
        view.session_id,
        conn,
        view.sender_identity.clone(),
        content.clone(),
        retention,
    );

    let persisted = db.lock().await.insert_message(&message);
    if let Err(e) = persisted {
        warn!(session = %view.session_id, error = %e, "failed to persist message");
        matchmaker
            .send_to(
                conn,
                ServerEvent::Error {
                    message: DELIVERY_FAILED.to_string(),
                },
            )
            .await;
        return;
    }

    // Best-effort: the partner's socket may already be gone.
    matchmaker
        .send_to(
            view.partner,
            ServerEvent::Message {
                sender: conn,
                content,
                timestamp: message.created_at,
            },
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use rencontre_shared::UserId;

    use crate::blocklist::{BlockStore, MemoryBlockStore};

    struct Fixture {
        matchmaker: Matchmaker,
        guard: BlockGuard,
        store: Arc<MemoryBlockStore>,
        db: Mutex<Database>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let store = Arc::new(MemoryBlockStore::new());
        let guard = BlockGuard::new(store.clone() as Arc<dyn BlockStore>);
        Fixture {
            matchmaker: Matchmaker::new(guard.clone(), true),
            guard,
            store,
            db: Mutex::new(db),
            _dir: dir,
        }
    }

    async fn paired(
        f: &Fixture,
        a: Option<&str>,
        b: Option<&str>,
    ) -> (
        ConnId,
        mpsc::UnboundedReceiver<ServerEvent>,
        ConnId,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let u1 = f.matchmaker.register(a.map(UserId::from), tx1).await;
        let u2 = f.matchmaker.register(b.map(UserId::from), tx2).await;
        f.matchmaker.join_waiting(u1).await;
        f.matchmaker.join_waiting(u2).await;
        while rx1.try_recv().is_ok() {}
        while rx2.try_recv().is_ok() {}
        (u1, rx1, u2, rx2)
    }

    #[tokio::test]
    async fn message_is_relayed_and_persisted() {
        let f = fixture();
        let (u1, _rx1, _u2, mut rx2) = paired(&f, Some("alice"), Some("bob")).await;

        send_message(
            &f.matchmaker,
            &f.guard,
            &f.db,
            Duration::hours(24),
            u1,
            "hi".to_string(),
        )
        .await;

        let event = rx2.try_recv().unwrap();
        let ServerEvent::Message { sender, content, .. } = event else {
            panic!("expected message, got {event:?}");
        };
        assert_eq!(sender, u1);
        assert_eq!(content, "hi");

        let db = f.db.lock().await;
        assert_eq!(db.count_messages().unwrap(), 1);

        let session = f.matchmaker.session_view(u1).await.unwrap().session_id;
        let stored = db.get_messages_for_session(session, 10, 0).unwrap();
        assert_eq!(stored[0].sender_identity, Some(UserId::from("alice")));
        assert_eq!(stored[0].expires_at - stored[0].created_at, Duration::hours(24));
    }

    #[tokio::test]
    async fn blocked_message_neither_delivers_nor_persists() {
        let f = fixture();
        let (u1, mut rx1, _u2, mut rx2) = paired(&f, Some("alice"), Some("bob")).await;

        // Block appears after the pair formed.
        f.store.insert(UserId::from("bob"), UserId::from("alice"));

        send_message(
            &f.matchmaker,
            &f.guard,
            &f.db,
            Duration::hours(24),
            u1,
            "hi".to_string(),
        )
        .await;

        // Sender gets a generic failure, nothing block-specific.
        let event = rx1.try_recv().unwrap();
        assert_eq!(
            event,
            ServerEvent::Error {
                message: "message could not be delivered".to_string()
            }
        );
        assert!(rx2.try_recv().is_err());
        assert_eq!(f.db.lock().await.count_messages().unwrap(), 0);
    }

    #[tokio::test]
    async fn send_without_session_reports_no_active_session() {
        let f = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = f.matchmaker.register(None, tx).await;

        send_message(
            &f.matchmaker,
            &f.guard,
            &f.db,
            Duration::hours(24),
            conn,
            "hi".to_string(),
        )
        .await;

        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::Error {
                message: "no active session".to_string()
            }
        );
        assert_eq!(f.db.lock().await.count_messages().unwrap(), 0);
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let f = fixture();
        let (u1, mut rx1, _u2, mut rx2) = paired(&f, None, None).await;

        let oversized = "x".repeat(MAX_MESSAGE_SIZE + 1);
        send_message(&f.matchmaker, &f.guard, &f.db, Duration::hours(24), u1, oversized).await;

        assert!(matches!(rx1.try_recv().unwrap(), ServerEvent::Error { .. }));
        assert!(rx2.try_recv().is_err());
        assert_eq!(f.db.lock().await.count_messages().unwrap(), 0);
    }

    #[tokio::test]
    async fn typing_is_forwarded_to_partner() {
        let f = fixture();
        let (u1, _rx1, _u2, mut rx2) = paired(&f, None, None).await;

        set_typing(&f.matchmaker, u1, true).await;
        set_typing(&f.matchmaker, u1, false).await;

        assert_eq!(
            rx2.try_recv().unwrap(),
            ServerEvent::PartnerTyping { typing: true }
        );
        assert_eq!(
            rx2.try_recv().unwrap(),
            ServerEvent::PartnerTyping { typing: false }
        );
    }

    #[tokio::test]
    async fn typing_from_unpaired_handle_is_dropped() {
        let f = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = f.matchmaker.register(None, tx).await;

        set_typing(&f.matchmaker, conn, true).await;

        // No error, no echo: the signal just disappears.
        assert!(rx.try_recv().is_err());
    }
}
