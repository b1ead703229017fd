//! Shared fakes and token helpers for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ic::auth::error::{AuthError, GrantError, Result};
use ic::auth::grant::{BrowserLauncher, Prompt};
use ic::auth::oauth::AuthSession;
use ic::auth::{OidcProvider, ProviderConfig, ProviderConnector, TokenSet};

pub const SIGNING_KEY: &[u8] = include_bytes!("../fixtures/id_token_signing_key.pem");
pub const JWKS: &str = include_str!("../fixtures/jwks.json");
pub const KID: &str = "test-key-1";

pub const ISSUER: &str = "https://idp.example.com";
pub const CLIENT_ID: &str = "ic";

pub fn provider_config() -> ProviderConfig {
    ProviderConfig::new(ISSUER, CLIENT_ID, ["email"])
}

// ---------------------------------------------------------------------------
// ID tokens
// ---------------------------------------------------------------------------

/// Claims of an ID token expiring `lifetime_secs` from now.
pub fn claims(issuer: &str, nonce: Option<&str>, lifetime_secs: i64) -> Value {
    let now = chrono::Utc::now().timestamp();
    let mut claims = json!({
        "iss": issuer,
        "sub": "user-1",
        "aud": CLIENT_ID,
        "iat": now,
        "exp": now + lifetime_secs,
    });
    if let Some(nonce) = nonce {
        claims["nonce"] = json!(nonce);
    }
    claims
}

/// RS256 JWT signed with the fixture key.
pub fn sign(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// JWT-shaped token with a junk signature; enough for unverified decoding.
pub fn unsigned(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

pub fn token_set(lifetime_secs: i64, refresh_token: &str) -> TokenSet {
    TokenSet::new(
        unsigned(&claims(ISSUER, None, lifetime_secs)),
        format!("access-{lifetime_secs}"),
        refresh_token,
    )
}

// ---------------------------------------------------------------------------
// Mock identity provider (HTTP)
// ---------------------------------------------------------------------------

pub fn discovery_document(base: &str, end_session: bool) -> Value {
    let mut doc = json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/authorize"),
        "token_endpoint": format!("{base}/token"),
        "jwks_uri": format!("{base}/keys"),
        "response_types_supported": ["code"],
    });
    if end_session {
        doc["end_session_endpoint"] = json!(format!("{base}/logout"));
    }
    doc
}

pub async fn mount_discovery(server: &MockServer, end_session: bool) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(discovery_document(&server.uri(), end_session)),
        )
        .mount(server)
        .await;
}

pub async fn mount_jwks(server: &MockServer) {
    let jwks: Value = serde_json::from_str(JWKS).unwrap();
    Mock::given(method("GET"))
        .and(path("/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks))
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// What the fake provider does on refresh.
#[derive(Debug, Clone)]
pub enum RefreshBehavior {
    Issue(TokenSet),
    /// Token endpoint rejects the grant.
    Reject(String),
    /// Token endpoint answers but the ID token does not verify.
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct ExchangeCall {
    pub code: String,
    pub state: String,
    pub nonce: String,
    pub redirect_uri: String,
}

#[derive(Debug, Default, Clone)]
pub struct Calls {
    pub auth_urls: Vec<String>,
    pub exchanges: Vec<ExchangeCall>,
    pub refreshes: Vec<String>,
    pub logouts: Vec<String>,
}

/// In-memory provider recording every call. Codes are exchanged for tokens
/// whose ID token carries the session nonce.
pub struct FakeProvider {
    refresh: RefreshBehavior,
    logout_fails: bool,
    exchange_delay: Duration,
    calls: Mutex<Calls>,
}

impl FakeProvider {
    pub fn new(refresh: RefreshBehavior) -> Arc<Self> {
        Arc::new(Self {
            refresh,
            logout_fails: false,
            exchange_delay: Duration::ZERO,
            calls: Mutex::new(Calls::default()),
        })
    }

    /// A provider whose code exchange takes `delay` to complete.
    pub fn slow_exchange(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            refresh: RefreshBehavior::Reject("unused".into()),
            logout_fails: false,
            exchange_delay: delay,
            calls: Mutex::new(Calls::default()),
        })
    }

    pub fn failing_logout() -> Arc<Self> {
        Arc::new(Self {
            refresh: RefreshBehavior::Reject("unused".into()),
            logout_fails: true,
            exchange_delay: Duration::ZERO,
            calls: Mutex::new(Calls::default()),
        })
    }

    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OidcProvider for FakeProvider {
    fn auth_code_url(&self, session: &AuthSession, redirect_uri: &str) -> Result<String> {
        let mut url = url::Url::parse(&format!("{ISSUER}/authorize")).unwrap();
        url.query_pairs_mut()
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", &session.state)
            .append_pair("nonce", &session.nonce);
        let url = url.to_string();
        self.calls.lock().unwrap().auth_urls.push(url.clone());
        Ok(url)
    }

    async fn exchange_auth_code(
        &self,
        code: &str,
        session: &AuthSession,
        redirect_uri: &str,
    ) -> Result<TokenSet> {
        self.calls.lock().unwrap().exchanges.push(ExchangeCall {
            code: code.to_string(),
            state: session.state.clone(),
            nonce: session.nonce.clone(),
            redirect_uri: redirect_uri.to_string(),
        });
        if !self.exchange_delay.is_zero() {
            tokio::time::sleep(self.exchange_delay).await;
        }
        Ok(TokenSet::new(
            unsigned(&claims(ISSUER, Some(&session.nonce), 3600)),
            format!("access-for-{code}"),
            "refresh-from-code",
        ))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        self.calls
            .lock()
            .unwrap()
            .refreshes
            .push(refresh_token.to_string());
        match &self.refresh {
            RefreshBehavior::Issue(tokens) => Ok(tokens.clone()),
            RefreshBehavior::Reject(message) => Err(AuthError::Exchange(message.clone())),
            RefreshBehavior::Invalid(message) => Err(AuthError::Verification(message.clone())),
        }
    }

    async fn logout(&self, id_token: &str) -> Result<()> {
        self.calls.lock().unwrap().logouts.push(id_token.to_string());
        if self.logout_fails {
            Err(AuthError::Logout("end_session_endpoint returned 500".into()))
        } else {
            Ok(())
        }
    }
}

/// Hands out the same provider and counts how often it was asked to.
pub struct FakeConnector {
    provider: Arc<FakeProvider>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(provider: Arc<FakeProvider>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderConnector for FakeConnector {
    async fn connect(&self, _config: &ProviderConfig) -> Result<Arc<dyn OidcProvider>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let provider: Arc<dyn OidcProvider> = self.provider.clone();
        Ok(provider)
    }
}

// ---------------------------------------------------------------------------
// Browser
// ---------------------------------------------------------------------------

/// One request the fake browser sends to the loopback listener.
#[derive(Debug, Clone)]
pub enum Visit {
    /// Redirect with the right state and this code.
    Code(String),
    /// Redirect with a state that belongs to no attempt.
    WrongState(String),
    /// Redirect without any state.
    NoState(String),
    /// Provider error redirect with the right state.
    Denied(String),
    /// Request to an unrelated path.
    Path(String),
}

/// Follows the authorization URL by issuing the configured redirects to the
/// loopback listener and recording the status codes it answers with.
///
/// Visits run one after another, or, with a `gap`, concurrently with each
/// one started `gap` after the previous. Statuses are kept in visit order.
#[derive(Default)]
pub struct RedirectingBrowser {
    visits: Vec<Visit>,
    gap: Option<Duration>,
    opened: Mutex<Vec<String>>,
    statuses: Mutex<Vec<u16>>,
}

impl RedirectingBrowser {
    pub fn new(visits: Vec<Visit>) -> Arc<Self> {
        Arc::new(Self {
            visits,
            ..Self::default()
        })
    }

    pub fn staggered(visits: Vec<Visit>, gap: Duration) -> Arc<Self> {
        Arc::new(Self {
            visits,
            gap: Some(gap),
            ..Self::default()
        })
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<u16> {
        self.statuses.lock().unwrap().clone()
    }
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[async_trait]
impl BrowserLauncher for RedirectingBrowser {
    async fn open(&self, url: &str) -> std::result::Result<(), GrantError> {
        self.opened.lock().unwrap().push(url.to_string());

        let redirect_uri = query_param(url, "redirect_uri").unwrap();
        let state = query_param(url, "state").unwrap();
        let http = reqwest::Client::builder().no_proxy().build().unwrap();

        let mut targets = Vec::with_capacity(self.visits.len());
        for visit in &self.visits {
            let mut target = url::Url::parse(&redirect_uri).unwrap();
            match visit {
                Visit::Code(code) => {
                    target
                        .query_pairs_mut()
                        .append_pair("code", code)
                        .append_pair("state", &state);
                }
                Visit::WrongState(code) => {
                    target
                        .query_pairs_mut()
                        .append_pair("code", code)
                        .append_pair("state", "not-the-state");
                }
                Visit::NoState(code) => {
                    target.query_pairs_mut().append_pair("code", code);
                }
                Visit::Denied(error) => {
                    target
                        .query_pairs_mut()
                        .append_pair("error", error)
                        .append_pair("error_description", "user said no")
                        .append_pair("state", &state);
                }
                Visit::Path(path) => target.set_path(path),
            }
            targets.push(target);
        }

        let Some(gap) = self.gap else {
            for target in targets {
                let status = fetch_status(&http, target).await;
                self.statuses.lock().unwrap().push(status);
            }
            return Ok(());
        };

        let mut requests = tokio::task::JoinSet::new();
        for (i, target) in targets.into_iter().enumerate() {
            let http = http.clone();
            requests.spawn(async move {
                tokio::time::sleep(gap * i as u32).await;
                (i, fetch_status(&http, target).await)
            });
        }
        let mut statuses = requests.join_all().await;
        statuses.sort_by_key(|(i, _)| *i);
        self.statuses
            .lock()
            .unwrap()
            .extend(statuses.into_iter().map(|(_, status)| status));
        Ok(())
    }
}

async fn fetch_status(http: &reqwest::Client, target: url::Url) -> u16 {
    http.get(target)
        .send()
        .await
        .map(|r| r.status().as_u16())
        .unwrap_or(0)
}

/// A browser that cannot be launched.
pub struct BrokenBrowser;

#[async_trait]
impl BrowserLauncher for BrokenBrowser {
    async fn open(&self, _url: &str) -> std::result::Result<(), GrantError> {
        Err(GrantError::BrowserLaunch("no display".into()))
    }
}

// ---------------------------------------------------------------------------
// Terminal
// ---------------------------------------------------------------------------

/// Answers every prompt with a fixed line and records what was shown.
pub struct ScriptedPrompt {
    input: String,
    shown: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new(input: &str) -> Arc<Self> {
        Arc::new(Self {
            input: input.to_string(),
            shown: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prompt for ScriptedPrompt {
    async fn show(&self, message: &str) -> std::io::Result<()> {
        self.shown.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn read_line(&self, prompt: &str) -> std::io::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.input.clone())
    }
}
