pub mod api;
pub mod auth;
pub mod config;
pub mod types;

// Re-export key types and functions
pub use api::{AppState, AuthenticatedUser, create_router};
pub use auth::{
    AuthOutcome, AuthRequest, Authenticator, AuthenticatorConfig, CredentialExchange,
    InMemorySessionStore, OidcCodeExchange, SessionStore,
};
pub use config::{GatekeeperConfig, load_config};

use std::sync::Arc;

use anyhow::Result;
use axum::Router;

/// Convenience function to wire a fully configured gatekeeper.
///
/// Builds the in-memory session store, the OIDC code exchange and the
/// authenticator, and returns the router together with the store so the
/// caller can schedule `purge_expired`.
pub fn create_app(config: GatekeeperConfig) -> Result<(Router, Arc<InMemorySessionStore>)> {
    let sessions = Arc::new(InMemorySessionStore::new(config.session_ttl_seconds));
    let exchange = OidcCodeExchange::new(config.oidc_settings())
        .map_err(|e| anyhow::anyhow!("Failed to build token client: {}", e))?;

    let authenticator = Arc::new(Authenticator::new(
        config.authenticator_config(),
        Arc::new(exchange),
        sessions.clone(),
    ));

    let router = create_router(AppState::new(config, authenticator));
    Ok((router, sessions))
}
