//! HTTP implementation of [`OidcProvider`].

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};

use super::discovery::ProviderMetadata;
use super::loopback::{self, LoopbackInput};
use super::retry::{RetryPolicy, execute_with_retry};
use super::verify::IdTokenVerifier;
use super::{OidcProvider, ProviderConfig};
use crate::auth::error::{AuthError, Result};
use crate::auth::oauth::AuthSession;
use crate::auth::token::TokenSet;

/// Successful token endpoint response (RFC 6749 §5.1 plus `id_token`).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Error response of the token endpoint (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OIDC client bound to one provider and one client registration.
#[derive(Debug)]
pub struct OidcClient {
    config: ProviderConfig,
    metadata: ProviderMetadata,
    http: reqwest::Client,
    verifier: IdTokenVerifier,
    logout_policy: RetryPolicy,
}

impl OidcClient {
    /// Fetch the provider's discovery document and build a client from it.
    #[instrument(skip_all, fields(issuer = %config.issuer_url))]
    pub async fn discover(config: ProviderConfig, http: reqwest::Client) -> Result<Self> {
        let metadata = ProviderMetadata::fetch(&http, &config.issuer_url).await?;
        Ok(Self::from_metadata(config, metadata, http))
    }

    /// Build a client from already known metadata.
    pub fn from_metadata(
        config: ProviderConfig,
        metadata: ProviderMetadata,
        http: reqwest::Client,
    ) -> Self {
        let verifier = IdTokenVerifier::new(
            metadata.issuer.clone(),
            config.client_id.clone(),
            metadata.jwks_uri.clone(),
            http.clone(),
        );
        Self {
            config,
            metadata,
            http,
            verifier,
            logout_policy: RetryPolicy::default(),
        }
    }

    pub fn with_logout_policy(mut self, policy: RetryPolicy) -> Self {
        self.logout_policy = policy;
        self
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Run the loopback receiver against this client.
    pub async fn get_token_by_auth_code(
        &self,
        input: LoopbackInput,
        ready: oneshot::Sender<String>,
    ) -> Result<TokenSet> {
        loopback::get_token_by_auth_code(self, input, ready).await
    }

    async fn token_request(&self, mut form: Vec<(&str, &str)>) -> Result<TokenResponse> {
        form.push(("client_id", self.config.client_id.as_str()));
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .http
            .post(&self.metadata.token_endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = match serde_json::from_str::<OAuthErrorBody>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {desc}", err.error),
                    None => err.error,
                },
                Err(_) => format!("token endpoint returned {status}: {}", body.trim()),
            };
            return Err(AuthError::Exchange(message));
        }

        serde_json::from_str(&body)
            .map_err(|e| AuthError::Exchange(format!("invalid token response: {e}")))
    }

    async fn logout_attempt(&self, url: &str) -> Result<()> {
        let attempt = self.http.get(url).send();
        let response = tokio::time::timeout(self.logout_policy.attempt_timeout(), attempt)
            .await
            .map_err(|_| {
                AuthError::Logout(format!(
                    "no response within {}ms",
                    self.logout_policy.attempt_timeout_ms
                ))
            })??;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AuthError::Logout(format!("end_session_endpoint returned {status}")))
        }
    }
}

#[async_trait]
impl OidcProvider for OidcClient {
    fn auth_code_url(&self, session: &AuthSession, redirect_uri: &str) -> Result<String> {
        let mut url = url::Url::parse(&self.metadata.authorization_endpoint).map_err(|e| {
            AuthError::Config(format!(
                "invalid authorization_endpoint '{}': {e}",
                self.metadata.authorization_endpoint
            ))
        })?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.config.scopes().join(" "))
            .append_pair("state", &session.state)
            .append_pair("nonce", &session.nonce)
            .append_pair("code_challenge", &session.pkce.challenge)
            .append_pair("code_challenge_method", session.pkce.method)
            .append_pair("access_type", "offline");

        Ok(url.into())
    }

    #[instrument(skip_all, fields(issuer = %self.metadata.issuer))]
    async fn exchange_auth_code(
        &self,
        code: &str,
        session: &AuthSession,
        redirect_uri: &str,
    ) -> Result<TokenSet> {
        let response = self
            .token_request(vec![
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", session.pkce.verifier.as_str()),
                ("redirect_uri", redirect_uri),
            ])
            .await?;

        let tokens = TokenSet::new(
            response.id_token.unwrap_or_default(),
            response.access_token,
            response.refresh_token.unwrap_or_default(),
        );
        let claims = self.verifier.verify(&tokens, &session.nonce).await?;
        info!(subject = %claims.subject, "Authorization code exchanged");
        Ok(tokens)
    }

    #[instrument(skip_all, fields(issuer = %self.metadata.issuer))]
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        let response = self
            .token_request(vec![
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .await?;

        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| refresh_token.to_string());
        let tokens = TokenSet::new(
            response.id_token.unwrap_or_default(),
            response.access_token,
            refresh_token,
        );
        self.verifier.verify(&tokens, "").await?;
        debug!("Token refreshed");
        Ok(tokens)
    }

    #[instrument(skip_all, fields(issuer = %self.metadata.issuer))]
    async fn logout(&self, id_token: &str) -> Result<()> {
        let endpoint = self
            .metadata
            .end_session_endpoint
            .as_deref()
            .ok_or(AuthError::LogoutUnsupported)?;

        let mut url = url::Url::parse(endpoint)
            .map_err(|e| AuthError::Logout(format!("invalid end_session_endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("id_token_hint", id_token);
        let url = url.as_str();

        execute_with_retry(&self.logout_policy, |_| self.logout_attempt(url)).await?;
        info!("Logged out at provider");
        Ok(())
    }
}
