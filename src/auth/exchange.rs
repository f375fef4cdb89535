//! Contract for turning an authorization code into a verified principal.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AuthorizationCode, Subject};

/// Authentication method tag recorded on every cached authentication.
pub const AUTH_METHOD: &str = "GOOGLE";

/// Identity produced by a successful code exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Provider-scoped subject identifier
    pub subject: Subject,
    /// Email address, if the `email` scope was granted
    #[serde(default)]
    pub email: Option<String>,
    /// Display name, if the `profile` scope was granted
    #[serde(default)]
    pub name: Option<String>,
    /// Raw user-info claims as returned by the provider
    #[serde(default)]
    pub user_info: Value,
}

impl Principal {
    pub fn new(subject: impl Into<Subject>) -> Self {
        Self {
            subject: subject.into(),
            email: None,
            name: None,
            user_info: Value::Null,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_user_info(mut self, user_info: Value) -> Self {
        self.user_info = user_info;
        self
    }

    /// Best human-readable label for this principal.
    pub fn display(&self) -> String {
        if let Some(name) = &self.name {
            name.clone()
        } else if let Some(email) = &self.email {
            email.clone()
        } else {
            self.subject.to_string()
        }
    }
}

/// The credential a login was performed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub code: AuthorizationCode,
}

/// Result of a prior successful login, cached in the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAuthentication {
    /// Authentication method tag (e.g. "GOOGLE")
    pub method: String,
    pub principal: Principal,
    /// Opaque original credential
    pub credential: Credential,
    pub authenticated_at: chrono::DateTime<chrono::Utc>,
}

impl CachedAuthentication {
    pub fn new(principal: Principal, credential: Credential) -> Self {
        Self {
            method: AUTH_METHOD.to_string(),
            principal,
            credential,
            authenticated_at: chrono::Utc::now(),
        }
    }
}

/// Reasons a code exchange can fail.
#[derive(Debug, Clone)]
pub enum ExchangeError {
    /// The provider rejected the code (expired, reused, wrong client).
    Rejected(String),
    /// The token endpoint could not be reached or answered garbage.
    Transport(String),
    /// The identity assertion failed verification.
    InvalidToken(String),
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "Authorization code rejected: {}", msg),
            Self::Transport(msg) => write!(f, "Token endpoint unavailable: {}", msg),
            Self::InvalidToken(msg) => write!(f, "Invalid identity token: {}", msg),
        }
    }
}

impl std::error::Error for ExchangeError {}

/// Login service backing the authenticator.
///
/// `exchange` is awaited outside any session lock and is never retried by
/// the authenticator.
pub trait CredentialExchange: Send + Sync {
    /// Exchange an authorization code for a verified principal.
    fn exchange(
        &self,
        code: &AuthorizationCode,
    ) -> Pin<Box<dyn Future<Output = Result<Principal, ExchangeError>> + Send + '_>>;

    /// Whether a previously authenticated principal is still valid.
    ///
    /// Returning `false` revokes the cached authentication.
    fn validate(&self, _principal: &Principal) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(std::future::ready(true))
    }
}
