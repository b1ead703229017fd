//! Authorization code grant with a code pasted into the terminal.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::auth::error::{GrantError, Result};
use crate::auth::oauth::AuthSession;
use crate::auth::oidc::OidcProvider;
use crate::auth::token::TokenSet;

/// Out-of-band redirect: the provider shows the code instead of redirecting.
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

pub const CODE_PROMPT: &str = "Enter code: ";

/// Terminal interaction used by the keyboard grant.
#[async_trait]
pub trait Prompt: Send + Sync {
    /// Show a message to the user.
    async fn show(&self, message: &str) -> std::io::Result<()>;

    /// Show `prompt` and read one line, line terminator included. EOF yields "".
    async fn read_line(&self, prompt: &str) -> std::io::Result<String>;
}

/// Writes to stderr and reads from stdin, keeping stdout free for data.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioPrompt;

#[async_trait]
impl Prompt for StdioPrompt {
    async fn show(&self, message: &str) -> std::io::Result<()> {
        let mut stderr = tokio::io::stderr();
        stderr.write_all(message.as_bytes()).await?;
        stderr.flush().await
    }

    async fn read_line(&self, prompt: &str) -> std::io::Result<String> {
        self.show(prompt).await?;
        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        Ok(line)
    }
}

/// Keyboard grant settings.
#[derive(Clone)]
pub struct KeyboardPaste {
    pub redirect_uri: String,
    prompt: Arc<dyn Prompt>,
}

impl std::fmt::Debug for KeyboardPaste {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyboardPaste")
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl Default for KeyboardPaste {
    fn default() -> Self {
        Self {
            redirect_uri: OOB_REDIRECT_URI.to_string(),
            prompt: Arc::new(StdioPrompt),
        }
    }
}

impl KeyboardPaste {
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Print the authorization URL, read the code and exchange it.
    pub async fn login(&self, provider: &dyn OidcProvider) -> Result<TokenSet> {
        let session = AuthSession::generate();
        let url = provider.auth_code_url(&session, &self.redirect_uri)?;

        let input_error = |e: std::io::Error| GrantError::Input(e.to_string());
        self.prompt
            .show(&format!(
                "Open the following URL in your browser and paste the code shown:\n\n    {url}\n\n"
            ))
            .await
            .map_err(input_error)?;
        let line = self.prompt.read_line(CODE_PROMPT).await.map_err(input_error)?;

        let code = line.trim_end_matches(['\r', '\n']);
        if code.is_empty() {
            return Err(GrantError::Input("no authorization code entered".to_string()).into());
        }

        provider
            .exchange_auth_code(code, &session, &self.redirect_uri)
            .await
    }
}
