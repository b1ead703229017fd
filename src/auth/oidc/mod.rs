//! OpenID Connect relying-party client.
//!
//! [`OidcProvider`] is the seam the grants and the authenticator depend on;
//! [`OidcClient`] is the HTTP implementation built from the provider's
//! discovery document.

pub mod client;
pub mod discovery;
pub mod loopback;
pub mod retry;
pub mod verify;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::error::{AuthError, Result};
use crate::auth::oauth::AuthSession;
use crate::auth::store::CacheKey;
use crate::auth::token::TokenSet;

pub use client::OidcClient;
pub use discovery::ProviderMetadata;
pub use loopback::{LoopbackInput, get_token_by_auth_code};
pub use retry::RetryPolicy;
pub use verify::IdTokenVerifier;

/// Scope always requested first.
pub const OPENID_SCOPE: &str = "openid";

/// Timeout applied to every request made by the default HTTP client.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity provider coordinates. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub issuer_url: String,
    pub client_id: String,
    /// Sent on token requests when set (confidential clients).
    pub client_secret: Option<String>,
    extra_scopes: Vec<String>,
}

impl ProviderConfig {
    /// Build a config. `openid`, empty entries and repeated scopes are dropped
    /// from `extra_scopes`; the first occurrence keeps its position.
    pub fn new<S: Into<String>>(
        issuer_url: impl Into<String>,
        client_id: impl Into<String>,
        extra_scopes: impl IntoIterator<Item = S>,
    ) -> Self {
        let mut scopes: Vec<String> = Vec::new();
        for scope in extra_scopes.into_iter().map(Into::into) {
            let scope = scope.trim().to_string();
            if scope.is_empty() || scope == OPENID_SCOPE || scopes.contains(&scope) {
                continue;
            }
            scopes.push(scope);
        }

        Self {
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            extra_scopes: scopes,
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into()).filter(|s: &String| !s.is_empty());
        self
    }

    pub fn extra_scopes(&self) -> &[String] {
        &self.extra_scopes
    }

    /// `openid` followed by the extra scopes.
    pub fn scopes(&self) -> Vec<String> {
        std::iter::once(OPENID_SCOPE.to_string())
            .chain(self.extra_scopes.iter().cloned())
            .collect()
    }

    /// Key of this provider's entry in the token cache.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(
            self.issuer_url.clone(),
            self.client_id.clone(),
            self.extra_scopes.clone(),
        )
    }
}

/// Operations of an OIDC relying party against one provider.
#[async_trait]
pub trait OidcProvider: Send + Sync {
    /// Authorization endpoint URL for `session`, redirecting to `redirect_uri`.
    fn auth_code_url(&self, session: &AuthSession, redirect_uri: &str) -> Result<String>;

    /// Exchange an authorization code and verify the ID token against `session.nonce`.
    async fn exchange_auth_code(
        &self,
        code: &str,
        session: &AuthSession,
        redirect_uri: &str,
    ) -> Result<TokenSet>;

    /// Refresh grant. The old refresh token is kept when the provider returns none.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet>;

    /// RP-initiated logout with `id_token` as the hint.
    async fn logout(&self, id_token: &str) -> Result<()>;
}

/// Produces a provider client on demand, so that cache hits need no network.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(&self, config: &ProviderConfig) -> Result<Arc<dyn OidcProvider>>;
}

/// Connects by fetching the provider's discovery document.
#[derive(Debug, Clone)]
pub struct DiscoveryConnector {
    http: reqwest::Client,
    logout_policy: RetryPolicy,
}

impl DiscoveryConnector {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            logout_policy: RetryPolicy::default(),
        }
    }

    pub fn with_logout_policy(mut self, policy: RetryPolicy) -> Self {
        self.logout_policy = policy;
        self
    }
}

#[async_trait]
impl ProviderConnector for DiscoveryConnector {
    async fn connect(&self, config: &ProviderConfig) -> Result<Arc<dyn OidcProvider>> {
        let client = OidcClient::discover(config.clone(), self.http.clone())
            .await?
            .with_logout_policy(self.logout_policy.clone());
        Ok(Arc::new(client))
    }
}

/// HTTP client used for discovery, JWKS, token and logout requests.
///
/// Redirects are not followed: a token endpoint answering with a redirect is
/// treated as a failure rather than replaying credentials elsewhere.
pub fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("ic/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| AuthError::Config(format!("Failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_scopes_are_normalized() {
        let config = ProviderConfig::new(
            "https://issuer.example.com",
            "ic",
            ["email", "openid", "groups", "email", " ", "offline_access"],
        );
        assert_eq!(
            config.extra_scopes(),
            &["email".to_string(), "groups".into(), "offline_access".into()]
        );
        assert_eq!(
            config.scopes(),
            vec!["openid", "email", "groups", "offline_access"]
        );
    }

    #[test]
    fn test_cache_key_follows_config() {
        let a = ProviderConfig::new("https://i", "c", ["a", "b"]);
        let b = ProviderConfig::new("https://i", "c", ["b", "a"]);
        assert_ne!(a.cache_key().filename(), b.cache_key().filename());

        // `openid` never takes part in the key.
        let c = ProviderConfig::new("https://i", "c", ["openid", "a", "b"]);
        assert_eq!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn test_empty_client_secret_is_none() {
        let config = ProviderConfig::new("https://i", "c", Vec::<String>::new()).with_client_secret("");
        assert!(config.client_secret.is_none());
    }
}
