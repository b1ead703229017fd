//! Authorization code grant through the system browser and a loopback redirect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::auth::error::{AuthError, GrantError, Result};
use crate::auth::oauth::AuthSession;
use crate::auth::oidc::{LoopbackInput, OidcProvider, get_token_by_auth_code};
use crate::auth::token::TokenSet;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:0";
pub const DEFAULT_REDIRECT_HOSTNAME: &str = "localhost";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Opens a URL for the user.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open(&self, url: &str) -> std::result::Result<(), GrantError>;
}

/// The operating system's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

#[async_trait]
impl BrowserLauncher for SystemBrowser {
    async fn open(&self, url: &str) -> std::result::Result<(), GrantError> {
        let url = url.to_string();
        tokio::task::spawn_blocking(move || open::that(url))
            .await
            .map_err(|e| GrantError::BrowserLaunch(e.to_string()))?
            .map_err(|e| GrantError::BrowserLaunch(e.to_string()))
    }
}

/// Loopback browser grant settings.
#[derive(Clone)]
pub struct LoopbackBrowser {
    pub bind_address: String,
    pub redirect_hostname: String,
    /// Only print the URL; never launch a browser.
    pub skip_open_browser: bool,
    /// Deadline for the whole attempt.
    pub timeout: Duration,
    launcher: Arc<dyn BrowserLauncher>,
}

impl std::fmt::Debug for LoopbackBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackBrowser")
            .field("bind_address", &self.bind_address)
            .field("redirect_hostname", &self.redirect_hostname)
            .field("skip_open_browser", &self.skip_open_browser)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for LoopbackBrowser {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            redirect_hostname: DEFAULT_REDIRECT_HOSTNAME.to_string(),
            skip_open_browser: false,
            timeout: DEFAULT_TIMEOUT,
            launcher: Arc::new(SystemBrowser),
        }
    }
}

impl LoopbackBrowser {
    pub fn with_bind_address(mut self, bind_address: impl Into<String>) -> Self {
        self.bind_address = bind_address.into();
        self
    }

    pub fn with_redirect_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.redirect_hostname = hostname.into();
        self
    }

    pub fn with_skip_open_browser(mut self, skip: bool) -> Self {
        self.skip_open_browser = skip;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Run one attempt with a fresh session.
    ///
    /// Opening the browser and receiving the redirect run concurrently; the
    /// first failure cancels the other, and the whole attempt is bounded by
    /// [`Self::timeout`].
    pub async fn login(&self, provider: &dyn OidcProvider) -> Result<TokenSet> {
        let input = LoopbackInput {
            bind_address: self.bind_address.clone(),
            redirect_hostname: self.redirect_hostname.clone(),
            session: AuthSession::generate(),
        };
        let (ready_tx, ready_rx) = oneshot::channel::<String>();

        let open = async {
            // The receiver drops `ready` without sending when it fails to start;
            // its own error is the one reported.
            if let Ok(url) = ready_rx.await {
                self.present(&url).await;
            }
            Ok::<(), AuthError>(())
        };
        let receive = get_token_by_auth_code(provider, input, ready_tx);

        let attempt = async { tokio::try_join!(open, receive).map(|((), tokens)| tokens) };
        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(GrantError::Timeout(self.timeout).into()),
        }
    }

    async fn present(&self, url: &str) {
        eprintln!("Open the following URL in your browser to log in:\n\n    {url}\n");
        if self.skip_open_browser {
            return;
        }
        match self.launcher.open(url).await {
            Ok(()) => info!("Opened browser for login"),
            Err(e) => warn!(error = %e, "Could not open browser; open the URL manually"),
        }
    }
}
