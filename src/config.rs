use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::auth::grant::{GrantSelection, KeyboardPaste, LoopbackBrowser};
use crate::auth::grant::browser::{DEFAULT_BIND_ADDRESS, DEFAULT_REDIRECT_HOSTNAME};
use crate::auth::grant::keyboard::OOB_REDIRECT_URI;
use crate::auth::oidc::ProviderConfig;
use crate::auth::store::{TokenCache, default_cache_dir};

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "oidc.client_id") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub oidc: OidcConfig,
    #[serde(default)]
    pub grant: GrantConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

/// Identity provider registration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OidcConfig {
    #[serde(default)]
    pub issuer_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Requested in addition to `openid`.
    #[serde(default)]
    pub extra_scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GrantConfig {
    #[serde(rename = "type", default)]
    pub kind: GrantType,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_redirect_hostname")]
    pub redirect_hostname: String,
    /// Redirect URI of the keyboard grant.
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default)]
    pub skip_open_browser: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            kind: GrantType::default(),
            bind_address: default_bind_address(),
            redirect_hostname: default_redirect_hostname(),
            redirect_uri: default_redirect_uri(),
            skip_open_browser: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GrantType {
    #[default]
    AuthcodeBrowser,
    AuthcodeKeyboard,
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthcodeBrowser => write!(f, "authcode-browser"),
            Self::AuthcodeKeyboard => write!(f, "authcode-keyboard"),
        }
    }
}

impl FromStr for GrantType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "authcode-browser" | "browser" => Ok(Self::AuthcodeBrowser),
            "authcode-keyboard" | "keyboard" => Ok(Self::AuthcodeKeyboard),
            _ => Err(format!("Unknown grant type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Token cache directory; the per-user cache directory when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}
fn default_redirect_hostname() -> String {
    DEFAULT_REDIRECT_HOSTNAME.to_string()
}
fn default_redirect_uri() -> String {
    OOB_REDIRECT_URI.to_string()
}
const fn default_timeout_secs() -> u64 {
    300
}
fn default_log_level() -> String {
    "warn".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// `$IC_CONFIG`, else `<config dir>/ic/config.toml`.
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os("IC_CONFIG").filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ic")
            .join("config.toml")
    }

    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `IC_` takes precedence over the
    /// file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply `IC_*` overrides resolved through `env`.
    fn apply_overrides_from(&mut self, env: impl Fn(&str) -> Option<String>) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Some(val) = env($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Some(val) = env($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Some(val) = env($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_opt_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Some(val) = env($env) {
                    $field = if val.is_empty() { None } else { Some(val.into()) };
                    ov.record($key, $env);
                }
            };
        }

        // -- OIDC --
        env_str!("oidc.issuer_url", "IC_OIDC_ISSUER_URL", self.oidc.issuer_url);
        env_str!("oidc.client_id", "IC_OIDC_CLIENT_ID", self.oidc.client_id);
        env_opt_str!("oidc.client_secret", "IC_OIDC_CLIENT_SECRET", self.oidc.client_secret);
        if let Some(val) = env("IC_OIDC_EXTRA_SCOPES") {
            self.oidc.extra_scopes = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            ov.record("oidc.extra_scopes", "IC_OIDC_EXTRA_SCOPES");
        }

        // -- Grant --
        env_parse!("grant.type", "IC_GRANT_TYPE", self.grant.kind);
        env_str!("grant.bind_address", "IC_GRANT_BIND_ADDRESS", self.grant.bind_address);
        env_str!(
            "grant.redirect_hostname",
            "IC_GRANT_REDIRECT_HOSTNAME",
            self.grant.redirect_hostname
        );
        env_str!("grant.redirect_uri", "IC_GRANT_REDIRECT_URI", self.grant.redirect_uri);
        env_bool!(
            "grant.skip_open_browser",
            "IC_GRANT_SKIP_OPEN_BROWSER",
            self.grant.skip_open_browser
        );
        env_parse!("grant.timeout_secs", "IC_GRANT_TIMEOUT_SECS", self.grant.timeout_secs);

        // -- Cache --
        env_opt_str!("cache.dir", "IC_CACHE_DIR", self.cache.dir);

        // -- Logging --
        env_str!("logging.level", "IC_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "IC_LOG_JSON", self.logging.json);

        self.env_overrides = ov;
    }

    /// Provider coordinates; issuer and client id are required.
    pub fn provider_config(&self) -> anyhow::Result<ProviderConfig> {
        if self.oidc.issuer_url.trim().is_empty() {
            anyhow::bail!("oidc.issuer_url is not set (config file or IC_OIDC_ISSUER_URL)");
        }
        if self.oidc.client_id.trim().is_empty() {
            anyhow::bail!("oidc.client_id is not set (config file or IC_OIDC_CLIENT_ID)");
        }

        let mut provider = ProviderConfig::new(
            self.oidc.issuer_url.trim(),
            self.oidc.client_id.trim(),
            self.oidc.extra_scopes.iter().cloned(),
        );
        if let Some(secret) = &self.oidc.client_secret {
            provider = provider.with_client_secret(secret.clone());
        }
        Ok(provider)
    }

    /// The grant enabled by `grant.type`.
    pub fn grant_selection(&self) -> GrantSelection {
        match self.grant.kind {
            GrantType::AuthcodeBrowser => GrantSelection::browser(
                LoopbackBrowser::default()
                    .with_bind_address(self.grant.bind_address.clone())
                    .with_redirect_hostname(self.grant.redirect_hostname.clone())
                    .with_skip_open_browser(self.grant.skip_open_browser)
                    .with_timeout(Duration::from_secs(self.grant.timeout_secs)),
            ),
            GrantType::AuthcodeKeyboard => GrantSelection::keyboard(
                KeyboardPaste::default().with_redirect_uri(self.grant.redirect_uri.clone()),
            ),
        }
    }

    pub fn token_cache(&self) -> TokenCache {
        TokenCache::new(self.cache.dir.clone().unwrap_or_else(default_cache_dir))
    }
}

// Helper for the default config file location
mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        std::env::var_os("XDG_CONFIG_HOME")
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
