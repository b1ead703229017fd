//! Error types for the auth module.

use std::time::Duration;

use crate::auth::store::CacheError;

/// Convenience alias used throughout the auth module.
pub type Result<T, E = AuthError> = std::result::Result<T, E>;

/// Errors raised by the login, refresh and logout flows.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Token cache failure.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The provider's discovery document could not be fetched or is unusable.
    #[error("OIDC discovery failed for {issuer}: {message}")]
    Discovery { issuer: String, message: String },

    /// Authorization code exchange or refresh failed at the token endpoint.
    #[error("token exchange failed: {0}")]
    Exchange(String),

    /// The returned ID token did not pass verification.
    #[error("ID token verification failed: {0}")]
    Verification(String),

    /// A stored or returned ID token could not be decoded.
    #[error("malformed ID token: {0}")]
    MalformedToken(String),

    /// An interactive grant failed.
    #[error(transparent)]
    Grant(#[from] GrantError),

    /// The provider does not advertise an `end_session_endpoint`.
    #[error("provider does not support RP-initiated logout")]
    LogoutUnsupported,

    /// The provider rejected the logout request.
    #[error("logout failed: {0}")]
    Logout(String),

    /// Silent mode was requested but no usable token exists.
    #[error("interactive login required; run `ic login` first")]
    GrantRequired,

    /// Invalid configuration (e.g. no grant selected).
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl AuthError {
    /// Whether a refresh failure of this kind should fall back to an interactive grant.
    ///
    /// Verification failures are never retried.
    pub fn is_recoverable_refresh_failure(&self) -> bool {
        matches!(self, AuthError::Exchange(_) | AuthError::Http(_))
    }
}

/// Errors specific to the interactive grants.
#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    /// The user did not complete the login in time.
    #[error("timed out after {}s waiting for the authorization redirect", .0.as_secs())]
    Timeout(Duration),

    /// Reading the authorization code from the terminal failed.
    #[error("could not read authorization code: {0}")]
    Input(String),

    /// The OS browser could not be launched.
    #[error("could not open browser: {0}")]
    BrowserLaunch(String),

    /// The local redirect listener could not be bound or served.
    #[error("local redirect listener on {address}: {source}")]
    Listener {
        address: String,
        #[source]
        source: std::io::Error,
    },
}
