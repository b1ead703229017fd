//! OIDC authentication core: token cache, provider client, interactive
//! grants and the authenticator that ties them together.

pub mod authenticator;
pub mod error;
pub mod grant;
pub mod oauth;
pub mod oidc;
pub mod store;
pub mod token;

pub use authenticator::{Authenticator, LoginOutcome, LoginParams};
pub use error::{AuthError, GrantError, Result};
pub use grant::{GrantSelection, GrantStrategy, KeyboardPaste, LoopbackBrowser};
pub use oidc::{DiscoveryConnector, OidcClient, OidcProvider, ProviderConfig, ProviderConnector};
pub use store::{CacheError, CacheKey, TokenCache};
pub use token::{IdClaims, TokenSet};
