//! Loopback redirect receiver.
//!
//! Serves `http://<hostname>:<port>/` on a local listener, waits for the
//! provider to redirect the browser there with the authorization code, and
//! exchanges the code before answering the browser.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::OidcProvider;
use crate::auth::error::{AuthError, GrantError, Result};
use crate::auth::oauth::{
    AuthSession, CallbackOutcome, CallbackParams, error_html, success_html,
    validate_callback_params,
};
use crate::auth::token::TokenSet;

/// Where to listen and which attempt to accept redirects for.
#[derive(Debug, Clone)]
pub struct LoopbackInput {
    /// `host:port` to bind; port 0 picks a free port.
    pub bind_address: String,
    /// Host name placed in the redirect URI.
    pub redirect_hostname: String,
    pub session: AuthSession,
}

/// A redirect that passed the state check, handed from the HTTP handler to
/// the exchanging side together with a channel for the page to render.
struct RedirectHit {
    outcome: Redirect,
    reply: oneshot::Sender<std::result::Result<(), String>>,
}

enum Redirect {
    Code(String),
    Denied { error: String, description: String },
}

#[derive(Clone)]
struct ReceiverState {
    expected_state: Arc<str>,
    /// Set by the first redirect with a valid state; later ones get a 409.
    claimed: Arc<AtomicBool>,
    hits: mpsc::Sender<RedirectHit>,
}

/// Bind the listener, send the authorization URL on `ready`, then wait for
/// the redirect and exchange its code.
///
/// Redirects with a wrong or missing `state` get a 400 and are otherwise
/// ignored. Only the first valid redirect is processed; repeats (a reload of
/// the redirect page, say) get a 409. The listener is shut down before this
/// returns, and when the returned future is dropped.
pub async fn get_token_by_auth_code(
    provider: &dyn OidcProvider,
    input: LoopbackInput,
    ready: oneshot::Sender<String>,
) -> Result<TokenSet> {
    let listener_error = |source| GrantError::Listener {
        address: input.bind_address.clone(),
        source,
    };
    let listener = TcpListener::bind(&input.bind_address)
        .await
        .map_err(listener_error)?;
    let port = listener.local_addr().map_err(listener_error)?.port();
    let redirect_uri = format!("http://{}:{port}/", input.redirect_hostname);
    debug!(redirect_uri = %redirect_uri, "Redirect listener bound");

    let auth_url = provider.auth_code_url(&input.session, &redirect_uri)?;

    let (hits_tx, mut hits_rx) = mpsc::channel(1);
    let app = Router::new()
        .route("/", get(handle_redirect))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(ReceiverState {
            expected_state: Arc::from(input.session.state.as_str()),
            claimed: Arc::new(AtomicBool::new(false)),
            hits: hits_tx,
        });

    let shutdown = CancellationToken::new();
    let server = {
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        }
    };

    let exchange = async move {
        let _stop_server = shutdown.drop_guard();

        if ready.send(auth_url).is_err() {
            debug!("Nobody is waiting for the authorization URL");
        }

        let hit = hits_rx
            .recv()
            .await
            .ok_or_else(|| AuthError::Exchange("redirect listener stopped".to_string()))?;
        drop(hits_rx);

        match hit.outcome {
            Redirect::Code(code) => {
                info!("Received authorization code");
                let result = provider
                    .exchange_auth_code(&code, &input.session, &redirect_uri)
                    .await;
                let page = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
                let _ = hit.reply.send(page);
                result
            }
            Redirect::Denied { error, description } => {
                let message = format!("authorization denied: {error}: {description}");
                let _ = hit.reply.send(Err(message.clone()));
                Err(AuthError::Exchange(message))
            }
        }
    };

    let (served, result) = tokio::join!(server, exchange);
    if let Err(e) = served {
        warn!(error = %e, "Redirect listener failed");
    }
    result
}

async fn handle_redirect(
    State(state): State<ReceiverState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let outcome = match validate_callback_params(&params, &state.expected_state) {
        CallbackOutcome::Rejected(reason) => {
            return (
                StatusCode::BAD_REQUEST,
                Html(error_html("invalid_request", reason)),
            )
                .into_response();
        }
        CallbackOutcome::Code(code) => Redirect::Code(code),
        CallbackOutcome::Denied { error, description } => Redirect::Denied { error, description },
    };

    if state.claimed.swap(true, Ordering::SeqCst) {
        return already_handled();
    }

    let (reply_tx, reply_rx) = oneshot::channel();
    let hit = RedirectHit {
        outcome,
        reply: reply_tx,
    };
    if state.hits.try_send(hit).is_err() {
        return already_handled();
    }

    match reply_rx.await {
        Ok(Ok(())) => Html(success_html()).into_response(),
        Ok(Err(message)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(error_html("login_failed", &message)),
        )
            .into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Html(error_html("cancelled", "The login attempt was cancelled.")),
        )
            .into_response(),
    }
}

fn already_handled() -> Response {
    (
        StatusCode::CONFLICT,
        Html(error_html(
            "already_handled",
            "This login attempt has already received a redirect.",
        )),
    )
        .into_response()
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver(claimed: bool) -> (ReceiverState, mpsc::Receiver<RedirectHit>) {
        let (hits, rx) = mpsc::channel(1);
        let state = ReceiverState {
            expected_state: Arc::from("s-1"),
            claimed: Arc::new(AtomicBool::new(claimed)),
            hits,
        };
        (state, rx)
    }

    fn code_params(state: &str) -> CallbackParams {
        CallbackParams {
            code: Some("C".to_string()),
            state: Some(state.to_string()),
            error: None,
            error_description: None,
        }
    }

    #[tokio::test]
    async fn test_claimed_attempt_answers_conflict() {
        let (state, mut rx) = receiver(true);
        let response = handle_redirect(State(state), Query(code_params("s-1"))).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wrong_state_does_not_claim() {
        let (state, _rx) = receiver(false);
        let claimed = state.claimed.clone();
        let response = handle_redirect(State(state), Query(code_params("other"))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!claimed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dropped_receiver_answers_unavailable() {
        let (state, mut rx) = receiver(false);
        let handler = tokio::spawn(handle_redirect(State(state), Query(code_params("s-1"))));
        let hit = rx.recv().await.unwrap();
        assert!(matches!(hit.outcome, Redirect::Code(ref c) if c == "C"));
        drop(hit);
        drop(rx);
        let response = handler.await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
