//! Read-only gate over the external block-relationship store.
//!
//! Block relationships are directional `(blocker, blocked)` pairs owned by
//! a collaborating service; this core consults them before pairing and
//! before every message relay, and never mutates them. The check is
//! synchronous so the match coordinator can call it inside its critical
//! section.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use rencontre_shared::UserId;

/// Source of block relationships. Implementations must answer from a
/// consistent local snapshot without blocking.
pub trait BlockStore: Send + Sync {
    /// Directional check: has `blocker` blocked `blocked`?
    fn is_blocked(&self, blocker: &UserId, blocked: &UserId) -> bool;
}

/// In-process block store.
///
/// Serves as the deployment default when no external store is wired up,
/// and as the test double everywhere else. Keyed by blocker so lookups
/// probe with borrowed ids; the check runs inside the match coordinator's
/// critical section on every pool scan step.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocked_by: RwLock<HashMap<UserId, HashSet<UserId>>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `blocker` has blocked `blocked`.
    pub fn insert(&self, blocker: UserId, blocked: UserId) {
        self.blocked_by
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(blocker)
            .or_default()
            .insert(blocked);
    }
}

impl BlockStore for MemoryBlockStore {
    fn is_blocked(&self, blocker: &UserId, blocked: &UserId) -> bool {
        self.blocked_by
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(blocker)
            .is_some_and(|set| set.contains(blocked))
    }
}

/// Gate consulted by the match coordinator and the message relay.
#[derive(Clone)]
pub struct BlockGuard {
    store: Arc<dyn BlockStore>,
}

impl BlockGuard {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self { store }
    }

    /// Either-direction check between two (possibly anonymous) parties.
    ///
    /// An anonymous side has no persistent identity and therefore no block
    /// relationship; such pairs are always eligible.
    pub fn either_blocked(&self, a: Option<&UserId>, b: Option<&UserId>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => self.store.is_blocked(a, b) || self.store.is_blocked(b, a),
            _ => false,
        }
    }
}
