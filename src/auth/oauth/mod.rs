//! Authorization-code building blocks shared by the grants.

pub mod callback;
pub mod session;

pub use callback::{CallbackOutcome, CallbackParams, error_html, success_html, validate_callback_params};
pub use session::{AuthSession, PKCE_METHOD, Pkce};
