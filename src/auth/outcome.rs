//! Result of evaluating one request.
//!
//! The authenticator never writes to the transport itself. Every outcome
//! that needs a response carries a `Directive` the HTTP adapter turns into
//! the actual redirect or denial.

use http::{StatusCode, Version};

use crate::auth::exchange::CachedAuthentication;

/// Redirect status for a client speaking `version`.
///
/// `303 See Other` forces the follow-up request to be a GET on HTTP/1.1+;
/// older clients only understand `302 Found`.
pub fn redirect_status(version: Version) -> StatusCode {
    if version < Version::HTTP_11 {
        StatusCode::FOUND
    } else {
        StatusCode::SEE_OTHER
    }
}

/// Response the adapter must send instead of invoking the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Redirect to `location`.
    Redirect {
        status: StatusCode,
        location: String,
        /// Send an explicit `Content-Length: 0`.
        empty_body: bool,
    },
    /// Deny with an empty `403 Forbidden`.
    Forbidden,
}

impl Directive {
    pub fn redirect(version: Version, location: impl Into<String>) -> Self {
        Self::Redirect {
            status: redirect_status(version),
            location: location.into(),
            empty_body: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Redirect { status, .. } => *status,
            Self::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Redirect { location, .. } => Some(location),
            Self::Forbidden => None,
        }
    }
}

/// Outcome of `Authenticator::validate_request`.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    /// Authentication is not mandatory here; decide later if ever.
    Deferred,
    /// A challenge redirect was issued; awaiting the provider callback.
    ChallengeSent(Directive),
    /// The callback completed a login; the response resumes the original request.
    LoginSucceeded {
        authentication: CachedAuthentication,
        directive: Directive,
    },
    /// A cached authentication was found and is still valid.
    Authenticated(CachedAuthentication),
    /// Explicit failure: forged callback or rejected code.
    Failed(Directive),
    /// No identity and no challenge could be issued.
    Unauthenticated,
}

impl AuthOutcome {
    /// Response to send in place of the application, if any.
    pub fn directive(&self) -> Option<&Directive> {
        match self {
            Self::ChallengeSent(directive)
            | Self::Failed(directive)
            | Self::LoginSucceeded { directive, .. } => Some(directive),
            Self::Deferred | Self::Authenticated(_) | Self::Unauthenticated => None,
        }
    }

    /// Identity resolved by this evaluation, if any.
    pub fn authentication(&self) -> Option<&CachedAuthentication> {
        match self {
            Self::Authenticated(auth) => Some(auth),
            Self::LoginSucceeded { authentication, .. } => Some(authentication),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Short tag for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deferred => "deferred",
            Self::ChallengeSent(_) => "challenge_sent",
            Self::LoginSucceeded { .. } => "login_succeeded",
            Self::Authenticated(_) => "authenticated",
            Self::Failed(_) => "failed",
            Self::Unauthenticated => "unauthenticated",
        }
    }
}
