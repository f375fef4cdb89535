//! OAuth 2.0 authorization-code authentication (OpenID Connect on top).
//!
//! This module decides, for every request, whether the caller is already
//! authenticated, must be sent to the identity provider, or is completing
//! a round trip from it.
//!
//! - **authenticator**: the state machine (`Authenticator`)
//! - **challenge**: authorization-endpoint URLs and anti-forgery tokens
//! - **session**: per-client attribute store with scoped exclusive access
//! - **replay**: the saved original request, resumed after login
//! - **exchange**: the `CredentialExchange` contract and identity types
//! - **oidc**: `CredentialExchange` backed by a real token endpoint + JWKS
//!
//! ## Security Model
//!
//! - The `state` parameter is checked before any code exchange; a mismatch
//!   is always a bare `403`, never the error page
//! - Anti-forgery token mint/verify and replay read/clear run inside one
//!   `Session::lock()` critical section each
//! - Denials carry no body, so neither the token nor the session id leak
//!
//! ## Usage
//!
//! ```ignore
//! let authenticator = Authenticator::new(config, exchange, sessions);
//!
//! let mut slot = SessionSlot::new(sessions.get(&id).await);
//! authenticator.prepare_request(&mut request, slot.get().map(|s| s.as_ref())).await?;
//! match authenticator.validate_request(&mut request, &mut slot, true).await? {
//!     AuthOutcome::Authenticated(auth) => { /* serve */ }
//!     outcome => { /* send outcome.directive() */ }
//! }
//! ```

mod authenticator;
mod challenge;
mod error;
mod exchange;
pub mod jwks;
mod oidc;
mod outcome;
mod replay;
mod request;
mod session;

pub use authenticator::{Authenticator, AuthenticatorConfig};
pub use challenge::{ChallengeBuilder, GOOGLE_AUTHORIZATION_ENDPOINT, SCOPES, mint_token};
pub use error::{AuthError, AuthResult, SessionError};
pub use exchange::{
    AUTH_METHOD, CachedAuthentication, Credential, CredentialExchange, ExchangeError, Principal,
};
pub use jwks::{DEFAULT_CACHE_TTL_SECONDS, JwksCache, JwksCacheError};
pub use oidc::{GOOGLE_ISSUER, GOOGLE_JWKS_URL, GOOGLE_TOKEN_ENDPOINT, OidcCodeExchange, OidcSettings};
pub use outcome::{AuthOutcome, Directive, redirect_status};
pub use replay::ReplayRecord;
pub use request::{AuthRequest, FORM_URLENCODED, FormParams, decode_form, encode_form};
pub use session::{
    AUTHENTICATED, CSRF_TOKEN, DEFAULT_SESSION_TTL_SECONDS, InMemorySessionStore, ORIGINAL_FORM,
    ORIGINAL_METHOD, ORIGINAL_URI, Session, SessionGuard, SessionSlot, SessionStore, USER_INFO,
};
