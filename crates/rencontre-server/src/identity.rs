//! Identity token verification and caching.
//!
//! Verifies `IdentityToken` tokens issued by the external auth server using
//! ed25519-dalek, and caches successful verifications to avoid re-checking
//! signatures on every reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use rencontre_shared::identity::{verify_identity_token_with_key, IdentityToken};
use rencontre_shared::UserId;

/// A cached identity verification result.
#[derive(Debug, Clone)]
struct CachedIdentity {
    user_id: UserId,
    /// When the token expires (from the token itself).
    expires_at: DateTime<Utc>,
}

impl CachedIdentity {
    /// Returns `true` if the cached entry is still usable.
    fn is_fresh(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// Verifies and caches identity tokens presented at connect time.
#[derive(Clone)]
pub struct IdentityVerifier {
    /// The auth server's Ed25519 public key.
    auth_pubkey: [u8; 32],
    /// Cache keyed by signature hex, so a cache hit requires the exact
    /// token that was verified, not merely a matching user id.
    cache: Arc<RwLock<HashMap<String, CachedIdentity>>>,
}

impl IdentityVerifier {
    /// Create a new verifier with the given auth server public key.
    pub fn new(auth_pubkey: [u8; 32]) -> Self {
        Self {
            auth_pubkey,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Verify an identity token.
    ///
    /// Returns the token's user id when the signature checks out and the
    /// token has not expired, otherwise `None`. Successful verifications
    /// are cached so reconnects with the same token skip the signature
    /// check.
    pub async fn verify(&self, token: &IdentityToken) -> Option<UserId> {
        let cache_key = hex::encode(&token.signature);

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&cache_key) {
                if entry.is_fresh() && entry.user_id == token.user_id {
                    debug!(user = %entry.user_id, "identity served from cache");
                    return Some(entry.user_id.clone());
                }
            }
        }

        if !verify_identity_token_with_key(token, &self.auth_pubkey) {
            debug!(user = %token.user_id, "identity verification failed");
            return None;
        }

        {
            let mut cache = self.cache.write().await;
            cache.insert(
                cache_key,
                CachedIdentity {
                    user_id: token.user_id.clone(),
                    expires_at: token.expires_at,
                },
            );
        }

        info!(user = %token.user_id, until = %token.expires_at, "identity verified");
        Some(token.user_id.clone())
    }

    /// Evict expired entries from the cache.
    pub async fn purge_expired(&self) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.is_fresh());
        let removed = before - cache.len();
        if removed > 0 {
            debug!(removed, "purged expired identity cache entries");
        }
    }
}
