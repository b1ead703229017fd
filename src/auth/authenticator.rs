//! Login and logout orchestration.
//!
//! ```text
//! lookup ─┬─ valid ──────────────────────────────────────────► cached tokens
//!         ├─ expired + refresh token ─ refresh ─┬─ ok ─ save ─► fresh tokens
//!         │                                     └─ recoverable failure ─┐
//!         └─ miss / corrupt / no refresh token ─────────────────────────┤
//!                                      silent ─► GrantRequired ◄────────┤
//!                                      grant ─ save ─► new tokens ◄─────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::auth::error::{AuthError, Result};
use crate::auth::grant::GrantSelection;
use crate::auth::oidc::{OidcProvider, ProviderConfig, ProviderConnector};
use crate::auth::store::{CacheError, CacheKey, TokenCache};
use crate::auth::token::{IdClaims, TokenSet};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Options of one login.
#[derive(Debug, Clone, Default)]
pub struct LoginParams {
    pub grant: GrantSelection,
    /// Never prompt; fail with [`AuthError::GrantRequired`] instead.
    pub silent: bool,
    /// Ignore an unexpired cached token and refresh it.
    pub force_refresh: bool,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub tokens: TokenSet,
    /// Claims of `tokens.id_token`, decoded without verification.
    pub claims: IdClaims,
    /// The tokens came from the cache as-is.
    pub using_cached_token: bool,
}

/// Drives login and logout for one provider configuration.
pub struct Authenticator {
    provider: ProviderConfig,
    cache: TokenCache,
    connector: Arc<dyn ProviderConnector>,
    clock: Clock,
}

impl Authenticator {
    pub fn new(
        provider: ProviderConfig,
        cache: TokenCache,
        connector: Arc<dyn ProviderConnector>,
    ) -> Self {
        Self {
            provider,
            cache,
            connector,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the source of the current time used for expiry checks.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Cached tokens for this provider, without any validation.
    pub fn cached_tokens(&self) -> Result<TokenSet> {
        Ok(self.cache.lookup(&self.provider.cache_key())?)
    }

    /// Return usable tokens, from the cache when possible.
    #[instrument(
        skip_all,
        fields(issuer = %self.provider.issuer_url, silent = params.silent)
    )]
    pub async fn login(&self, params: LoginParams) -> Result<LoginOutcome> {
        let key = self.provider.cache_key();
        let mut connected: Option<Arc<dyn OidcProvider>> = None;

        if let Some(cached) = self.lookup(&key) {
            let now = (self.clock)();
            match IdClaims::decode(&cached.id_token) {
                Ok(claims) if !claims.is_expired_at(now) && !params.force_refresh => {
                    debug!(expiry = %claims.expiry, "Using cached token");
                    return Ok(LoginOutcome {
                        tokens: cached,
                        claims,
                        using_cached_token: true,
                    });
                }
                Ok(claims) => debug!(expiry = %claims.expiry, "Cached token needs refresh"),
                Err(e) => warn!(error = %e, "Cached ID token cannot be decoded"),
            }

            if cached.has_refresh_token() {
                let client = self.connect().await?;
                info!("Refreshing token");
                match client.refresh(&cached.refresh_token).await {
                    Ok(tokens) => return self.persist(&key, tokens, "refresh"),
                    Err(e) if e.is_recoverable_refresh_failure() => {
                        warn!(error = %e, "Refreshing token failed; falling back to login");
                    }
                    Err(e) => return Err(e),
                }
                connected = Some(client);
            }
        }

        if params.silent {
            return Err(AuthError::GrantRequired);
        }

        let strategy = params.grant.resolve()?;
        let client = match connected {
            Some(client) => client,
            None => self.connect().await?,
        };

        info!(grant = strategy.name(), "Starting interactive login");
        let tokens = strategy.login(client.as_ref()).await?;
        self.persist(&key, tokens, strategy.name())
    }

    /// End the provider session and drop the cached tokens.
    ///
    /// Without a cached token there is nothing to do. If the provider call
    /// fails the cache entry is kept.
    #[instrument(skip_all, fields(issuer = %self.provider.issuer_url))]
    pub async fn logout(&self) -> Result<()> {
        let key = self.provider.cache_key();
        let cached = match self.cache.lookup(&key) {
            Ok(tokens) => tokens,
            Err(CacheError::NotFound { .. }) => {
                warn!("No cached token; already logged out");
                return Ok(());
            }
            Err(e @ CacheError::Corrupt { .. }) => {
                warn!(error = %e, "Removing unreadable cached token");
                return self.invalidate(&key);
            }
            Err(e) => return Err(e.into()),
        };

        let client = self.connect().await?;
        client.logout(&cached.id_token).await?;
        self.invalidate(&key)?;
        info!("Logged out");
        Ok(())
    }

    async fn connect(&self) -> Result<Arc<dyn OidcProvider>> {
        self.connector.connect(&self.provider).await
    }

    /// Cache lookup where every failure counts as a miss.
    fn lookup(&self, key: &CacheKey) -> Option<TokenSet> {
        match self.cache.lookup(key) {
            Ok(tokens) => Some(tokens),
            Err(CacheError::NotFound { .. }) => {
                debug!("No cached token");
                None
            }
            Err(e) => {
                warn!(error = %e, "Ignoring cached token");
                None
            }
        }
    }

    fn persist(&self, key: &CacheKey, tokens: TokenSet, source: &str) -> Result<LoginOutcome> {
        let claims = IdClaims::decode(&tokens.id_token)?;
        self.cache.save(key, &tokens)?;
        info!(source, subject = %claims.subject, expiry = %claims.expiry, "Saved tokens");
        Ok(LoginOutcome {
            tokens,
            claims,
            using_cached_token: false,
        })
    }

    fn invalidate(&self, key: &CacheKey) -> Result<()> {
        match self.cache.invalidate(key) {
            Ok(()) | Err(CacheError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
