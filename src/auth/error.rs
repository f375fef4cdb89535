//! Error types for the authentication handshake.
//!
//! Exchange failures and state-token mismatches are *not* errors here: they
//! are terminal denials expressed through `AuthOutcome::Failed`. `AuthError`
//! is reserved for fatal request-level problems the caller cannot recover
//! from within the current request.

use std::fmt;

/// Errors raised by session attribute access.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// A stored attribute could not be encoded.
    Encode { key: String, message: String },
    /// A stored attribute did not decode into the requested type.
    Decode { key: String, message: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode { key, message } => {
                write!(f, "Failed to encode session attribute {}: {}", key, message)
            }
            Self::Decode { key, message } => {
                write!(f, "Failed to decode session attribute {}: {}", key, message)
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Fatal errors surfaced by the authenticator.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// Session state was unreadable or could not be written.
    Session(SessionError),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(err) => write!(f, "Session error: {}", err),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Session(err) => Some(err),
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

/// Result type for authenticator operations.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display() {
        let err = AuthError::from(SessionError::Decode {
            key: "gatekeeper.original_uri".to_string(),
            message: "invalid type".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Session error: Failed to decode session attribute gatekeeper.original_uri: invalid type"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
