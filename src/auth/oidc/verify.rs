//! ID token verification.
//!
//! Checks the JWS signature against the provider's JWKS, then `iss`, `aud`,
//! `exp`, `iat`, the nonce of the attempt and, when present, `at_hash`.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::auth::error::{AuthError, Result};
use crate::auth::token::{IdClaims, TokenSet};

/// Signature algorithms accepted for ID tokens.
const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// Verifies ID tokens issued by one provider to one client.
///
/// The JWKS is fetched on first use and kept for the verifier's lifetime. A
/// token signed with an unknown `kid` triggers one refetch.
#[derive(Debug)]
pub struct IdTokenVerifier {
    issuer: String,
    client_id: String,
    jwks_uri: String,
    http: reqwest::Client,
    keys: RwLock<Option<Arc<JwkSet>>>,
}

impl IdTokenVerifier {
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        jwks_uri: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            jwks_uri: jwks_uri.into(),
            http,
            keys: RwLock::new(None),
        }
    }

    /// Preload the key set instead of fetching it.
    pub fn with_jwks(self, jwks: JwkSet) -> Self {
        Self {
            keys: RwLock::new(Some(Arc::new(jwks))),
            ..self
        }
    }

    /// Verify `tokens.id_token`. An empty `expected_nonce` skips the nonce
    /// check (refresh responses carry none).
    #[instrument(skip_all, fields(issuer = %self.issuer))]
    pub async fn verify(&self, tokens: &TokenSet, expected_nonce: &str) -> Result<IdClaims> {
        if tokens.id_token.is_empty() {
            return Err(AuthError::Verification(
                "token response did not include an id_token".to_string(),
            ));
        }

        let header = decode_header(&tokens.id_token)
            .map_err(|e| AuthError::Verification(format!("invalid JWS header: {e}")))?;
        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::Verification(format!(
                "unsupported signing algorithm {:?}",
                header.alg
            )));
        }

        let jwk = self.key_for(header.kid.as_deref(), header.alg).await?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| AuthError::Verification(format!("unusable signing key: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let claims = decode::<Value>(&tokens.id_token, &key, &validation)
            .map_err(|e| AuthError::Verification(e.to_string()))?
            .claims;

        let issued_at = claims
            .get("iat")
            .and_then(Value::as_i64)
            .ok_or_else(|| AuthError::Verification("missing `iat` claim".to_string()))?;
        let leeway = i64::try_from(validation.leeway).unwrap_or(i64::MAX);
        if issued_at > chrono::Utc::now().timestamp().saturating_add(leeway) {
            return Err(AuthError::Verification("`iat` is in the future".to_string()));
        }

        if !expected_nonce.is_empty() {
            let nonce = claims.get("nonce").and_then(Value::as_str).unwrap_or_default();
            if nonce != expected_nonce {
                return Err(AuthError::Verification("nonce does not match".to_string()));
            }
        }

        if let Some(at_hash) = claims.get("at_hash").and_then(Value::as_str) {
            let expected = access_token_hash(&tokens.access_token, header.alg);
            if at_hash != expected {
                return Err(AuthError::Verification(
                    "at_hash does not match access token".to_string(),
                ));
            }
        }

        debug!("ID token verified");
        IdClaims::from_value(claims)
    }

    /// Find the signing key, refetching the JWKS once if `kid` is unknown.
    async fn key_for(&self, kid: Option<&str>, alg: Algorithm) -> Result<Jwk> {
        let cached = self.keys.read().await.clone();
        if let Some(jwks) = &cached {
            if let Some(jwk) = select_jwk(jwks, kid, alg) {
                return Ok(jwk.clone());
            }
            debug!(kid = ?kid, "Signing key not in cached JWKS, refetching");
        }

        let jwks = Arc::new(self.fetch_jwks().await?);
        *self.keys.write().await = Some(jwks.clone());

        select_jwk(&jwks, kid, alg).cloned().ok_or_else(|| {
            AuthError::Verification(match kid {
                Some(kid) => format!("no signing key with kid '{kid}'"),
                None => "no signing key matches the token".to_string(),
            })
        })
    }

    async fn fetch_jwks(&self) -> Result<JwkSet> {
        let response = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| AuthError::Verification(format!("fetching JWKS: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Verification(format!(
                "GET {} returned {status}",
                self.jwks_uri
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| AuthError::Verification(format!("invalid JWKS: {e}")))
    }
}

/// Key with a matching `kid`; without a `kid`, the only key, or the only key
/// declaring `alg`.
fn select_jwk<'a>(jwks: &'a JwkSet, kid: Option<&str>, alg: Algorithm) -> Option<&'a Jwk> {
    if let Some(kid) = kid {
        return jwks.find(kid);
    }

    if let [only] = jwks.keys.as_slice() {
        return Some(only);
    }

    let mut matching = jwks.keys.iter().filter(|k| {
        k.common
            .key_algorithm
            .as_ref()
            .is_some_and(|ka| format!("{ka:?}") == format!("{alg:?}"))
    });
    match (matching.next(), matching.next()) {
        (Some(jwk), None) => Some(jwk),
        _ => None,
    }
}

/// Left half of the hash of `access_token`, base64url encoded. The hash
/// function is the one of the token's signing algorithm.
pub fn access_token_hash(access_token: &str, alg: Algorithm) -> String {
    let digest: Vec<u8> = match alg {
        Algorithm::RS384 | Algorithm::PS384 | Algorithm::ES384 | Algorithm::HS384 => {
            Sha384::digest(access_token.as_bytes()).to_vec()
        }
        Algorithm::RS512 | Algorithm::PS512 | Algorithm::HS512 => {
            Sha512::digest(access_token.as_bytes()).to_vec()
        }
        _ => Sha256::digest(access_token.as_bytes()).to_vec(),
    };
    URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
}
