//! Per-attempt authorization parameters.
//!
//! Every grant attempt generates a fresh [`AuthSession`]: an opaque `state`
//! echoed back on the redirect, a `nonce` embedded in the ID token, and a
//! PKCE verifier/challenge pair. None of it is ever persisted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// PKCE challenge method constant.
pub const PKCE_METHOD: &str = "S256";

/// Characters allowed in the PKCE verifier (RFC 7636 unreserved chars).
const VERIFIER_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// PKCE verifier length in characters (the RFC 7636 maximum).
const PKCE_VERIFIER_LENGTH: usize = 128;

/// Random bytes behind `state` and `nonce`.
const OPAQUE_VALUE_BYTES: usize = 32;

/// PKCE verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct Pkce {
    /// Sent only to the token endpoint.
    pub verifier: String,
    /// SHA-256 of the verifier, base64url without padding. Sent in the authorization URL.
    pub challenge: String,
    pub method: &'static str,
}

impl Pkce {
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let verifier: String = (0..PKCE_VERIFIER_LENGTH)
            .map(|_| {
                let idx = rng.random_range(0..VERIFIER_CHARS.len());
                VERIFIER_CHARS[idx] as char
            })
            .collect();

        Self::from_verifier(verifier)
    }

    /// Derive the challenge for a known verifier.
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
            method: PKCE_METHOD,
        }
    }
}

/// Parameters of one authorization attempt.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub state: String,
    pub nonce: String,
    pub pkce: Pkce,
}

impl AuthSession {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            state: opaque_value(),
            nonce: opaque_value(),
            pkce: Pkce::generate(),
        }
    }
}

/// 32 random bytes, base64url encoded without padding.
fn opaque_value() -> String {
    let bytes: [u8; OPAQUE_VALUE_BYTES] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}
