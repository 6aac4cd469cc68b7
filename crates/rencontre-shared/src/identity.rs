//! Signed identity tokens.
//!
//! The auth server (out of scope here) signs a token binding a user id to an
//! expiry date with its Ed25519 key. Clients present the token once at
//! connect time; the relay verifies the signature against the auth server's
//! public key and otherwise treats the connection as anonymous.

use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Token signed by the auth server, presented by a client at connect time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityToken {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
    pub signature: Vec<u8>,
}

impl IdentityToken {
    /// Encode as URL-safe base64 JSON, the form carried in the `token`
    /// query parameter of the WebSocket upgrade request.
    pub fn to_base64(&self) -> String {
        let json = serde_json::to_vec(self).expect("token serialization cannot fail");
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode from URL-safe base64 JSON.
    pub fn from_base64(encoded: &str) -> Option<Self> {
        let json = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .ok()?;
        serde_json::from_slice(&json).ok()
    }
}

// payload = user_id bytes || expires_at (rfc3339)
fn signing_payload(user_id: &UserId, expires_at: DateTime<Utc>) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(user_id.as_str().as_bytes());
    payload.extend_from_slice(expires_at.to_rfc3339().as_bytes());
    payload
}

/// Verify a token against the auth server's public key.
///
/// Returns `false` for expired tokens, malformed signatures, and signatures
/// made with any other key.
pub fn verify_identity_token_with_key(token: &IdentityToken, auth_pubkey: &[u8; 32]) -> bool {
    if Utc::now() > token.expires_at {
        return false;
    }

    let Ok(verifying_key) = VerifyingKey::from_bytes(auth_pubkey) else {
        return false;
    };

    let Ok(signature) = Signature::from_slice(&token.signature) else {
        return false;
    };

    let payload = signing_payload(&token.user_id, token.expires_at);
    verifying_key.verify(&payload, &signature).is_ok()
}

/// Create a signed token. Lives here so the auth server and the relay's
/// tests share one definition of the payload layout.
pub fn create_identity_token(
    user_id: UserId,
    expires_at: DateTime<Utc>,
    auth_signing_key: &ed25519_dalek::SigningKey,
) -> IdentityToken {
    use ed25519_dalek::Signer;

    let payload = signing_payload(&user_id, expires_at);
    let signature = auth_signing_key.sign(&payload);

    IdentityToken {
        user_id,
        expires_at,
        signature: signature.to_bytes().to_vec(),
    }
}
