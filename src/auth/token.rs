//! Token set and unverified ID-token claims.
//!
//! [`TokenSet`] is what the cache persists and what every login path returns.
//! [`IdClaims`] is a view over the middle segment of the ID token; decoding it
//! performs no signature check and is only used to decide expiry of cached
//! tokens. Cryptographic verification lives in [`crate::auth::oidc::verify`].

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::error::{AuthError, Result};

/// Credentials obtained from the identity provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Signed JWT identifying the user.
    pub id_token: String,

    /// Bearer token for the inventory API.
    #[serde(default)]
    pub access_token: String,

    /// Refresh token; empty when the provider issued none.
    #[serde(default)]
    pub refresh_token: String,
}

impl TokenSet {
    pub fn new(
        id_token: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            id_token: id_token.into(),
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Whether a refresh can be attempted.
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Value for the `Authorization` header of inventory API requests.
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("id_token", &redact(&self.id_token))
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() { "<empty>" } else { "<redacted>" }
}

/// Claims of an ID token, decoded without verification.
#[derive(Debug, Clone, PartialEq)]
pub struct IdClaims {
    pub issuer: String,
    pub subject: String,
    pub audience: Vec<String>,
    pub expiry: DateTime<Utc>,
    pub nonce: String,
    raw: Value,
}

impl IdClaims {
    /// Decode the payload segment of a compact JWS.
    pub fn decode(id_token: &str) -> Result<Self> {
        let mut segments = id_token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => {
                return Err(AuthError::MalformedToken(
                    "expected three dot-separated segments".to_string(),
                ));
            }
        };

        // Some issuers pad their segments even though RFC 7515 forbids it.
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthError::MalformedToken(format!("payload is not base64url: {e}")))?;

        let raw: Value = serde_json::from_slice(&bytes)
            .map_err(|e| AuthError::MalformedToken(format!("payload is not JSON: {e}")))?;

        Self::from_value(raw)
    }

    /// Build claims from an already-decoded JSON payload.
    pub fn from_value(raw: Value) -> Result<Self> {
        let exp = raw
            .get("exp")
            .and_then(numeric_date)
            .ok_or_else(|| AuthError::MalformedToken("missing or invalid `exp` claim".into()))?;
        let expiry = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| AuthError::MalformedToken(format!("`exp` out of range: {exp}")))?;

        let audience = match raw.get("aud") {
            Some(Value::String(aud)) => vec![aud.clone()],
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            issuer: string_claim(&raw, "iss"),
            subject: string_claim(&raw, "sub"),
            audience,
            expiry,
            nonce: string_claim(&raw, "nonce"),
            raw,
        })
    }

    /// Whether the token has expired at `now`. No clock skew allowance is applied.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// Look up an arbitrary claim.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.raw.get(name)
    }

    /// Indented JSON rendering of every claim.
    pub fn pretty(&self) -> String {
        serde_json::to_string_pretty(&self.raw).unwrap_or_else(|_| self.raw.to_string())
    }
}

/// JWT NumericDate: integer or fractional seconds since the epoch.
fn numeric_date(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|secs| secs as i64))
}

fn string_claim(raw: &Value, name: &str) -> String {
    raw.get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
