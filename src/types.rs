//! NewType wrappers for strong typing throughout the gatekeeper.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., comparing an authorization code against an anti-forgery token).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Opaque per-client session identifier.
    ///
    /// Carried in the session cookie. Never written to logs as-is; use
    /// `fingerprint()` when a session has to be correlated in diagnostics.
    SessionId
);

impl SessionId {
    /// Generate a fresh random session identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Short, non-reversible tag for log lines.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let digest = Sha256::digest(self.0.as_bytes());
        format!("{:x}", digest)[..12].to_string()
    }
}

newtype_string!(
    /// OAuth client identifier registered with the identity provider.
    ClientId
);

newtype_string!(
    /// OAuth redirect URI for callback handling.
    ///
    /// The URI where the provider redirects after authorization.
    /// Must match what's configured with the provider.
    RedirectUri
);

newtype_string!(
    /// Short-lived authorization code returned by the provider on the callback.
    AuthorizationCode
);

newtype_string!(
    /// Anti-forgery token bound to a pending login attempt.
    ///
    /// Echoed back by the provider in the `state` query parameter and
    /// compared verbatim against the copy held in the session.
    AntiForgeryToken
);

newtype_string!(
    /// Stable subject identifier of an authenticated principal (the `sub` claim).
    Subject
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_generate_is_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_session_fingerprint_hides_id() {
        let id = SessionId::new("abcdef0123456789");
        let fp = id.fingerprint();
        assert_eq!(fp.len(), 12);
        assert!(!fp.contains("abcdef0123"));
        assert_eq!(fp, id.fingerprint());
    }

    #[test]
    fn test_newtype_serde_transparent() {
        let token = AntiForgeryToken::new("T1");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"T1\"");
        let back: AntiForgeryToken = serde_json::from_str("\"T1\"").unwrap();
        assert_eq!(back, token);
    }
}
