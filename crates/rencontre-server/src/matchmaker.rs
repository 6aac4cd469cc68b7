//! Waiting pool, match coordination, and session teardown.
//!
//! One `tokio::sync::Mutex` guards the connection table, the waiting pool,
//! and the session registry together. Every mutating operation locks once,
//! mutates, notifies through the per-connection unbounded senders (which
//! never block), and releases. Matching is therefore linearizable: no two
//! concurrent joins can select the same candidate, and no half-symmetric
//! registry entry is ever observable.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use rencontre_shared::{ConnId, EndReason, ServerEvent, SessionId, UserId};

use crate::blocklist::BlockGuard;
use crate::registry::SessionRegistry;

/// One live connection, owned by the matchmaker from registration until
/// disconnect.
struct ConnHandle {
    identity: Option<UserId>,
    sender: mpsc::UnboundedSender<ServerEvent>,
    #[allow(dead_code)]
    connected_at: DateTime<Utc>,
}

/// Connections currently seeking a partner, in arrival order.
#[derive(Default)]
struct WaitingPool {
    queue: VecDeque<ConnId>,
}

impl WaitingPool {
    /// Add `conn` unless already queued. Returns whether it was added.
    fn enqueue(&mut self, conn: ConnId) -> bool {
        if self.queue.contains(&conn) {
            return false;
        }
        self.queue.push_back(conn);
        true
    }

    /// Remove `conn` if present, no error if absent.
    fn remove(&mut self, conn: ConnId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|c| *c != conn);
        self.queue.len() != before
    }

    fn iter(&self) -> impl Iterator<Item = &ConnId> {
        self.queue.iter()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

struct MatchState {
    conns: HashMap<ConnId, ConnHandle>,
    pool: WaitingPool,
    registry: SessionRegistry,
}

/// Consistent snapshot of one side of a session, for the relays.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub session_id: SessionId,
    pub sender_identity: Option<UserId>,
    pub partner: ConnId,
    pub partner_identity: Option<UserId>,
}

/// Counters for the `/info` endpoint.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MatchStats {
    pub connections: usize,
    pub waiting: usize,
    pub active_sessions: usize,
}

pub struct Matchmaker {
    state: Mutex<MatchState>,
    guard: BlockGuard,
    requeue_on_partner_loss: bool,
}

impl Matchmaker {
    pub fn new(guard: BlockGuard, requeue_on_partner_loss: bool) -> Self {
        Self {
            state: Mutex::new(MatchState {
                conns: HashMap::new(),
                pool: WaitingPool::default(),
                registry: SessionRegistry::new(),
            }),
            guard,
            requeue_on_partner_loss,
        }
    }

    /// Register a freshly authenticated connection and mint its handle.
    pub async fn register(
        &self,
        identity: Option<UserId>,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> ConnId {
        let conn = ConnId::new();
        let mut state = self.state.lock().await;
        state.conns.insert(
            conn,
            ConnHandle {
                identity,
                sender,
                connected_at: Utc::now(),
            },
        );
        conn
    }

    /// Enter the waiting pool and attempt an immediate match.
    ///
    /// Idempotent: a handle that is already waiting gets a fresh `waiting`
    /// ack, a handle that is already paired is left alone.
    pub async fn join_waiting(&self, conn: ConnId) {
        let mut state = self.state.lock().await;
        self.enqueue_and_match(&mut state, conn);
    }

    /// Explicit session exit. The connection stays registered; the partner
    /// (if any) is notified and, per policy, re-enqueued.
    pub async fn leave(&self, conn: ConnId) {
        let mut state = self.state.lock().await;
        state.pool.remove(conn);
        self.end_session(&mut state, conn, EndReason::PartnerLeft);
    }

    /// Connection loss. Same teardown as `leave`, then the handle itself is
    /// destroyed. Safe to invoke more than once for the same handle: the
    /// second call finds nothing and notifies nobody.
    pub async fn disconnect(&self, conn: ConnId) {
        let mut state = self.state.lock().await;
        state.pool.remove(conn);
        self.end_session(&mut state, conn, EndReason::Disconnected);
        if state.conns.remove(&conn).is_some() {
            debug!(conn = %conn.short(), "connection handle destroyed");
        }
    }

    /// Consistent snapshot of `conn`'s current session, or `None` when it
    /// is not paired.
    pub async fn session_view(&self, conn: ConnId) -> Option<SessionView> {
        let state = self.state.lock().await;
        let (session_id, partner) = state.registry.partner_of(conn)?;
        Some(SessionView {
            session_id,
            sender_identity: identity_of(&state, conn),
            partner,
            partner_identity: identity_of(&state, partner),
        })
    }

    /// Best-effort delivery to one connection. Returns whether a live
    /// sender existed.
    pub async fn send_to(&self, conn: ConnId, event: ServerEvent) -> bool {
        let state = self.state.lock().await;
        notify(&state, conn, event)
    }

    pub async fn stats(&self) -> MatchStats {
        let state = self.state.lock().await;
        MatchStats {
            connections: state.conns.len(),
            waiting: state.pool.len(),
            active_sessions: state.registry.len(),
        }
    }

    // -- internals, all called with the state lock held --

    fn enqueue_and_match(&self, state: &mut MatchState, conn: ConnId) {
        if !state.conns.contains_key(&conn) {
            // Disconnect raced with the enqueue; expected, not a fault.
            return;
        }
        if state.registry.contains(conn) {
            // Already paired; joining again is a no-op.
            return;
        }

        state.pool.enqueue(conn);

        match self.find_eligible(state, conn) {
            Some(candidate) => self.pair(state, candidate, conn),
            None => {
                debug!(conn = %conn.short(), waiting = state.pool.len(), "no eligible partner");
                notify(state, conn, ServerEvent::Waiting);
            }
        }
    }

    /// Earliest-arrived waiting handle not blocked in either direction.
    fn find_eligible(&self, state: &MatchState, conn: ConnId) -> Option<ConnId> {
        let me = identity_of(state, conn);
        state
            .pool
            .iter()
            .filter(|c| **c != conn)
            .find(|c| !self.guard.either_blocked(me.as_ref(), identity_of_ref(state, **c)))
            .copied()
    }

    fn pair(&self, state: &mut MatchState, first: ConnId, second: ConnId) {
        state.pool.remove(first);
        state.pool.remove(second);
        let session_id = state.registry.insert_pair(first, second);

        info!(
            session = %session_id,
            a = %first.short(),
            b = %second.short(),
            "matched"
        );

        // Each side learns only the partner's transient handle.
        notify(
            state,
            first,
            ServerEvent::Matched {
                session_id,
                partner: second,
            },
        );
        notify(
            state,
            second,
            ServerEvent::Matched {
                session_id,
                partner: first,
            },
        );
    }

    fn end_session(&self, state: &mut MatchState, conn: ConnId, reason: EndReason) {
        let Some((session_id, partner)) = state.registry.remove_pair(conn) else {
            return;
        };

        info!(
            session = %session_id,
            reason = ?reason,
            "session ended"
        );

        notify(state, partner, ServerEvent::Ended { reason });

        if self.requeue_on_partner_loss {
            self.enqueue_and_match(state, partner);
        }
    }
}

fn identity_of(state: &MatchState, conn: ConnId) -> Option<UserId> {
    state.conns.get(&conn).and_then(|h| h.identity.clone())
}

fn identity_of_ref(state: &MatchState, conn: ConnId) -> Option<&UserId> {
    state.conns.get(&conn).and_then(|h| h.identity.as_ref())
}

fn notify(state: &MatchState, conn: ConnId, event: ServerEvent) -> bool {
    match state.conns.get(&conn) {
        Some(handle) => handle.sender.send(event).is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::blocklist::{BlockStore, MemoryBlockStore};

    fn matchmaker_with(
        store: &Arc<MemoryBlockStore>,
        requeue: bool,
    ) -> Matchmaker {
        Matchmaker::new(BlockGuard::new(store.clone() as Arc<dyn BlockStore>), requeue)
    }

    fn matchmaker() -> Matchmaker {
        matchmaker_with(&Arc::new(MemoryBlockStore::new()), true)
    }

    async fn connect_as(
        m: &Matchmaker,
        identity: Option<&str>,
    ) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = m.register(identity.map(UserId::from), tx).await;
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn two_joiners_get_matched() {
        let m = matchmaker();
        let (u1, mut rx1) = connect_as(&m, None).await;
        let (u2, mut rx2) = connect_as(&m, None).await;

        m.join_waiting(u1).await;
        assert_eq!(drain(&mut rx1), vec![ServerEvent::Waiting]);

        m.join_waiting(u2).await;

        let e1 = drain(&mut rx1);
        let e2 = drain(&mut rx2);
        let ServerEvent::Matched { session_id: s1, partner: p1 } = e1[0].clone() else {
            panic!("u1 expected matched, got {e1:?}");
        };
        let ServerEvent::Matched { session_id: s2, partner: p2 } = e2[0].clone() else {
            panic!("u2 expected matched, got {e2:?}");
        };

        assert_eq!(s1, s2);
        assert_eq!(p1, u2);
        assert_eq!(p2, u1);

        // Registry is symmetric.
        assert_eq!(m.session_view(u1).await.unwrap().partner, u2);
        assert_eq!(m.session_view(u2).await.unwrap().partner, u1);

        let stats = m.stats().await;
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.active_sessions, 1);
    }

    #[tokio::test]
    async fn join_is_idempotent_while_waiting() {
        let m = matchmaker();
        let (u1, mut rx1) = connect_as(&m, None).await;

        m.join_waiting(u1).await;
        m.join_waiting(u1).await;

        assert_eq!(m.stats().await.waiting, 1);
        // Two waiting acks, but one pool entry.
        assert_eq!(drain(&mut rx1), vec![ServerEvent::Waiting, ServerEvent::Waiting]);
    }

    #[tokio::test]
    async fn join_while_paired_is_noop() {
        let m = matchmaker();
        let (u1, mut rx1) = connect_as(&m, None).await;
        let (u2, _rx2) = connect_as(&m, None).await;
        m.join_waiting(u1).await;
        m.join_waiting(u2).await;
        drain(&mut rx1);

        m.join_waiting(u1).await;

        assert!(drain(&mut rx1).is_empty());
        let stats = m.stats().await;
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.active_sessions, 1);
    }

    #[tokio::test]
    async fn blocked_users_are_never_paired() {
        let store = Arc::new(MemoryBlockStore::new());
        store.insert(UserId::from("u3"), UserId::from("u4"));
        let m = matchmaker_with(&store, true);

        let (u3, mut rx3) = connect_as(&m, Some("u3")).await;
        let (u4, mut rx4) = connect_as(&m, Some("u4")).await;

        m.join_waiting(u3).await;
        m.join_waiting(u4).await;

        // Neither was matched; both remain waiting.
        assert_eq!(drain(&mut rx3), vec![ServerEvent::Waiting]);
        assert_eq!(drain(&mut rx4), vec![ServerEvent::Waiting]);
        assert_eq!(m.stats().await.waiting, 2);

        // An eligible third party arrives and pairs with the earliest.
        let (u5, mut rx5) = connect_as(&m, Some("u5")).await;
        m.join_waiting(u5).await;

        let e5 = drain(&mut rx5);
        let ServerEvent::Matched { partner, .. } = e5[0].clone() else {
            panic!("u5 expected matched, got {e5:?}");
        };
        assert_eq!(partner, u3);
        assert_eq!(m.stats().await.waiting, 1);
    }

    #[tokio::test]
    async fn earliest_waiter_is_preferred() {
        let m = matchmaker();
        let (first, _rx_a) = connect_as(&m, None).await;
        let (second, _rx_b) = connect_as(&m, None).await;
        m.join_waiting(first).await;

        // `second` arriving matches the earliest waiter even when others
        // pile in afterwards.
        let (third, _rx_c) = connect_as(&m, None).await;
        m.join_waiting(second).await;
        m.join_waiting(third).await;

        assert_eq!(m.session_view(first).await.unwrap().partner, second);
    }

    #[tokio::test]
    async fn leave_notifies_and_requeues_partner() {
        let m = matchmaker();
        let (u1, mut rx1) = connect_as(&m, None).await;
        let (u2, mut rx2) = connect_as(&m, None).await;
        m.join_waiting(u1).await;
        m.join_waiting(u2).await;
        drain(&mut rx1);
        drain(&mut rx2);

        m.leave(u1).await;

        assert_eq!(
            drain(&mut rx2),
            vec![
                ServerEvent::Ended {
                    reason: EndReason::PartnerLeft
                },
                ServerEvent::Waiting,
            ]
        );
        // The leaver is not auto-requeued.
        assert!(drain(&mut rx1).is_empty());

        let stats = m.stats().await;
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.waiting, 1);
    }

    #[tokio::test]
    async fn disconnect_notifies_partner_with_reason() {
        let m = matchmaker();
        let (u1, mut rx1) = connect_as(&m, None).await;
        let (u2, mut rx2) = connect_as(&m, None).await;
        m.join_waiting(u1).await;
        m.join_waiting(u2).await;
        drain(&mut rx1);
        drain(&mut rx2);

        m.disconnect(u1).await;

        let e2 = drain(&mut rx2);
        assert_eq!(
            e2[0],
            ServerEvent::Ended {
                reason: EndReason::Disconnected
            }
        );
        // Registry holds neither side; the survivor is waiting again.
        assert!(m.session_view(u1).await.is_none());
        assert!(m.session_view(u2).await.is_none());
        assert_eq!(m.stats().await.waiting, 1);
        assert_eq!(m.stats().await.connections, 1);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let m = matchmaker();
        let (u1, _rx1) = connect_as(&m, None).await;
        let (u2, mut rx2) = connect_as(&m, None).await;
        m.join_waiting(u1).await;
        m.join_waiting(u2).await;
        drain(&mut rx2);

        m.disconnect(u1).await;
        m.disconnect(u1).await;

        // Exactly one partner notification.
        let ended: Vec<_> = drain(&mut rx2)
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::Ended { .. }))
            .collect();
        assert_eq!(ended.len(), 1);
    }

    #[tokio::test]
    async fn requeue_can_be_disabled() {
        let m = matchmaker_with(&Arc::new(MemoryBlockStore::new()), false);
        let (u1, _rx1) = connect_as(&m, None).await;
        let (u2, mut rx2) = connect_as(&m, None).await;
        m.join_waiting(u1).await;
        m.join_waiting(u2).await;
        drain(&mut rx2);

        m.disconnect(u1).await;

        assert_eq!(
            drain(&mut rx2),
            vec![ServerEvent::Ended {
                reason: EndReason::Disconnected
            }]
        );
        assert_eq!(m.stats().await.waiting, 0);
    }

    #[tokio::test]
    async fn join_after_disconnect_is_noop() {
        let m = matchmaker();
        let (u1, _rx1) = connect_as(&m, None).await;
        m.disconnect(u1).await;

        m.join_waiting(u1).await;

        let stats = m.stats().await;
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.waiting, 0);
    }

    #[tokio::test]
    async fn no_double_pairing_under_concurrent_joins() {
        const N: usize = 16;

        let m = Arc::new(matchmaker());
        let mut conns = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..N {
            let (conn, rx) = connect_as(&m, None).await;
            conns.push(conn);
            receivers.push(rx);
        }

        let mut tasks = Vec::new();
        for conn in conns.iter().copied() {
            let m = m.clone();
            tasks.push(tokio::spawn(async move { m.join_waiting(conn).await }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stats = m.stats().await;
        assert_eq!(stats.active_sessions, N / 2);
        assert_eq!(stats.waiting, 0);

        // Each handle was matched exactly once, and pairings are mutual.
        for (conn, rx) in conns.iter().zip(receivers.iter_mut()) {
            let matched: Vec<_> = drain(rx)
                .into_iter()
                .filter(|e| matches!(e, ServerEvent::Matched { .. }))
                .collect();
            assert_eq!(matched.len(), 1, "handle matched more than once");

            let view = m.session_view(*conn).await.unwrap();
            let partner_view = m.session_view(view.partner).await.unwrap();
            assert_eq!(partner_view.partner, *conn);
            assert_eq!(partner_view.session_id, view.session_id);
        }
    }
}
