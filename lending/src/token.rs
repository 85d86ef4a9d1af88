//! Bearer tokens gating a request's status page.
//!
//! The plain token is delivered to the requester. Lookups go through its
//! SHA-256 hash so reading the hash column alone does not reveal a live
//! secret. Issuing a new token overwrites both, which invalidates the old one.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// A freshly issued token.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Opaque bearer token (base64url, 256 bits of entropy)
    pub token: String,
    /// Hex SHA-256 of `token`
    pub token_hash: String,
    /// End of the validity window
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token_hash", &self.token_hash)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Issues tokens with a fixed validity window.
#[derive(Debug, Clone, Copy)]
pub struct TokenIssuer {
    validity: Duration,
}

impl TokenIssuer {
    /// Create an issuer whose tokens live for `validity`.
    #[must_use]
    pub const fn new(validity: Duration) -> Self {
        Self { validity }
    }

    /// Validity window.
    #[must_use]
    pub const fn validity(&self) -> Duration {
        self.validity
    }

    /// Issue a new token at `now`.
    #[must_use]
    pub fn issue(&self, now: DateTime<Utc>) -> IssuedToken {
        let token = generate_token();
        IssuedToken {
            token_hash: hash_token(&token),
            token,
            expires_at: now + self.validity,
        }
    }
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self::new(Duration::hours(72))
    }
}

/// Generate a cryptographically secure random token.
///
/// Returns a 256-bit random token encoded as base64url (43 characters).
fn generate_token() -> String {
    use base64::Engine;
    use rand::RngCore;

    let mut rng = rand::thread_rng();
    let mut random_bytes = [0u8; 32];
    rng.fill_bytes(&mut random_bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Verifier for a presented token.
#[must_use]
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}
