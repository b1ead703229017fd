//! Authorization redirect handling.
//!
//! Classifies the query of a redirect hitting the loopback listener and
//! renders the page shown in the user's browser afterwards.

use serde::Deserialize;
use tracing::warn;

/// Query parameters of the authorization redirect.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// What the listener should do with a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// State matched and a code was issued; exchange it.
    Code(String),
    /// State matched but the provider reported an error; the attempt is over.
    Denied { error: String, description: String },
    /// Not a valid redirect for this attempt; answer 400 and keep waiting.
    Rejected(&'static str),
}

/// Classify a redirect against the `state` generated for this attempt.
///
/// The state is checked first so that a forged request can neither deliver a
/// code nor abort the attempt with an error.
pub fn validate_callback_params(params: &CallbackParams, expected_state: &str) -> CallbackOutcome {
    match params.state.as_deref() {
        Some(state) if state == expected_state => {}
        Some(_) => {
            warn!("Ignoring authorization redirect with mismatched state");
            return CallbackOutcome::Rejected("state does not match");
        }
        None => {
            warn!("Ignoring authorization redirect without state");
            return CallbackOutcome::Rejected("missing state");
        }
    }

    if let Some(error) = &params.error {
        let description = params
            .error_description
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "Authorization denied by provider");
        return CallbackOutcome::Denied {
            error: error.clone(),
            description,
        };
    }

    match params.code.as_deref() {
        Some(code) if !code.is_empty() => CallbackOutcome::Code(code.to_string()),
        _ => CallbackOutcome::Rejected("missing authorization code"),
    }
}

// =============================================================================
// HTML Response Generation
// =============================================================================

const PAGE_STYLE: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: #f5f6f8;
            color: #1f2933;
        }
        .container {
            text-align: center;
            padding: 2rem;
            max-width: 480px;
        }
        h1.ok { color: #047857; }
        h1.fail { color: #b91c1c; }
        code {
            font-family: monospace;
            background: #e5e7eb;
            padding: 0.1rem 0.3rem;
            border-radius: 4px;
        }
"#;

/// Page shown after a successful login.
pub fn success_html() -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>ic: logged in</title>
    <style>{PAGE_STYLE}</style>
</head>
<body>
    <div class="container">
        <h1 class="ok">Logged in</h1>
        <p>You can close this window and return to the terminal.</p>
    </div>
</body>
</html>"#
    )
}

/// Page shown when the provider or the token exchange reported an error.
pub fn error_html(error: &str, description: &str) -> String {
    let error_code = html_escape(error);
    let desc = html_escape(description);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>ic: login failed</title>
    <style>{PAGE_STYLE}</style>
</head>
<body>
    <div class="container">
        <h1 class="fail">Login failed</h1>
        <p><code>{error_code}</code></p>
        <p>{desc}</p>
        <p>Close this window and run <code>ic login</code> again.</p>
    </div>
</body>
</html>"#
    )
}

fn html_escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
