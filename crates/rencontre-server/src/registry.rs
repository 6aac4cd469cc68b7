//! Authoritative mapping of connection handle -> partner handle.
//!
//! Sessions live in one arena keyed by session id, with two index entries
//! (handle -> session id) that are always written and removed together.
//! That collapses the symmetry invariant into "both index entries point to
//! the same session or neither exists": there is no observable state in
//! which `a` maps to `b` without `b` mapping back to `a`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use rencontre_shared::{ConnId, SessionId};

/// One active pairing between two connections.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub participants: [ConnId; 2],
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// The other participant, if `conn` is one of the two.
    pub fn partner_of(&self, conn: ConnId) -> Option<ConnId> {
        let [a, b] = self.participants;
        if conn == a {
            Some(b)
        } else if conn == b {
            Some(a)
        } else {
            None
        }
    }
}

/// Arena of sessions plus the handle -> session index.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    index: HashMap<ConnId, SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session pairing `a` with `b`, updating both index entries.
    ///
    /// Callers must ensure neither handle is already in a session; the
    /// match coordinator guarantees this by holding the state lock across
    /// the eligibility scan and this insert.
    pub fn insert_pair(&mut self, a: ConnId, b: ConnId) -> SessionId {
        debug_assert!(a != b, "a session needs two distinct participants");
        debug_assert!(!self.index.contains_key(&a) && !self.index.contains_key(&b));

        let session = Session {
            id: SessionId::new(),
            participants: [a, b],
            created_at: Utc::now(),
        };
        let id = session.id;
        self.sessions.insert(id, session);
        self.index.insert(a, id);
        self.index.insert(b, id);
        id
    }

    /// Look up the session and partner of `conn`.
    pub fn partner_of(&self, conn: ConnId) -> Option<(SessionId, ConnId)> {
        let id = *self.index.get(&conn)?;
        let session = self.sessions.get(&id)?;
        Some((id, session.partner_of(conn)?))
    }

    pub fn contains(&self, conn: ConnId) -> bool {
        self.index.contains_key(&conn)
    }

    /// Remove the session `conn` participates in, both directions at once.
    ///
    /// Returns the (now former) partner. `None` means `conn` was not in a
    /// session -- callers treat that as a no-op, since disconnects racing
    /// against pairing are expected.
    pub fn remove_pair(&mut self, conn: ConnId) -> Option<(SessionId, ConnId)> {
        let id = self.index.remove(&conn)?;
        let session = self.sessions.remove(&id)?;
        let partner = session.partner_of(conn)?;
        self.index.remove(&partner);
        Some((id, partner))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
