//! OpenID Provider metadata (`/.well-known/openid-configuration`).

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::auth::error::{AuthError, Result};

const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// The subset of provider metadata the client uses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

impl ProviderMetadata {
    /// Discovery document location for `issuer_url`.
    pub fn discovery_url(issuer_url: &str) -> String {
        format!("{}{WELL_KNOWN_PATH}", issuer_url.trim_end_matches('/'))
    }

    /// Fetch and validate the discovery document.
    #[instrument(skip(http))]
    pub async fn fetch(http: &reqwest::Client, issuer_url: &str) -> Result<Self> {
        let discovery_error = |message: String| AuthError::Discovery {
            issuer: issuer_url.to_string(),
            message,
        };

        let url = Self::discovery_url(issuer_url);
        let response = http
            .get(&url)
            .send()
            .await
            .map_err(|e| discovery_error(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(discovery_error(format!("GET {url} returned {status}")));
        }

        let metadata: Self = response
            .json()
            .await
            .map_err(|e| discovery_error(format!("invalid discovery document: {e}")))?;

        metadata.validate(issuer_url).map_err(discovery_error)?;
        debug!(issuer = %metadata.issuer, "Fetched provider metadata");
        Ok(metadata)
    }

    fn validate(&self, issuer_url: &str) -> std::result::Result<(), String> {
        if self.issuer.trim_end_matches('/') != issuer_url.trim_end_matches('/') {
            return Err(format!(
                "discovery document names issuer '{}', expected '{issuer_url}'",
                self.issuer
            ));
        }

        let mut endpoints = vec![
            ("authorization_endpoint", self.authorization_endpoint.as_str()),
            ("token_endpoint", self.token_endpoint.as_str()),
            ("jwks_uri", self.jwks_uri.as_str()),
        ];
        if let Some(endpoint) = &self.end_session_endpoint {
            endpoints.push(("end_session_endpoint", endpoint.as_str()));
        }
        for (name, value) in endpoints {
            url::Url::parse(value).map_err(|e| format!("{name} '{value}' is not a URL: {e}"))?;
        }

        Ok(())
    }
}
