//! Interactive grants.
//!
//! A grant turns user interaction into a [`TokenSet`]. Each call generates its
//! own state, nonce and PKCE pair.

pub mod browser;
pub mod keyboard;

use crate::auth::error::{AuthError, Result};
use crate::auth::oidc::OidcProvider;
use crate::auth::token::TokenSet;

pub use browser::{BrowserLauncher, LoopbackBrowser, SystemBrowser};
pub use keyboard::{KeyboardPaste, OOB_REDIRECT_URI, Prompt, StdioPrompt};

/// The available interactive grants.
#[derive(Debug, Clone)]
pub enum GrantStrategy {
    LoopbackBrowser(LoopbackBrowser),
    KeyboardPaste(KeyboardPaste),
}

impl GrantStrategy {
    pub async fn login(&self, provider: &dyn OidcProvider) -> Result<TokenSet> {
        match self {
            GrantStrategy::LoopbackBrowser(grant) => grant.login(provider).await,
            GrantStrategy::KeyboardPaste(grant) => grant.login(provider).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GrantStrategy::LoopbackBrowser(_) => "authcode-browser",
            GrantStrategy::KeyboardPaste(_) => "authcode-keyboard",
        }
    }
}

/// Grants the caller enabled. Resolved only when a grant is actually needed.
#[derive(Debug, Clone, Default)]
pub struct GrantSelection {
    pub browser: Option<LoopbackBrowser>,
    pub keyboard: Option<KeyboardPaste>,
}

impl GrantSelection {
    pub fn browser(grant: LoopbackBrowser) -> Self {
        Self {
            browser: Some(grant),
            keyboard: None,
        }
    }

    pub fn keyboard(grant: KeyboardPaste) -> Self {
        Self {
            browser: None,
            keyboard: Some(grant),
        }
    }

    /// The browser grant wins when both are enabled.
    pub fn resolve(&self) -> Result<GrantStrategy> {
        match (&self.browser, &self.keyboard) {
            (Some(browser), _) => Ok(GrantStrategy::LoopbackBrowser(browser.clone())),
            (None, Some(keyboard)) => Ok(GrantStrategy::KeyboardPaste(keyboard.clone())),
            (None, None) => Err(AuthError::Config(
                "no authorization grant is configured".to_string(),
            )),
        }
    }
}
