//! Session cookie encoding.
//!
//! The cookie only carries the opaque `SessionId`; everything else lives in
//! the server-side session.

use axum::http::{HeaderMap, HeaderValue, header::COOKIE, header::SET_COOKIE};

use crate::types::SessionId;

/// Attributes of the issued session cookie.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    /// `Path` attribute; the context path or `/`.
    pub path: String,
    /// Add the `Secure` flag (when the app is served over HTTPS).
    pub secure: bool,
    pub max_age_seconds: u64,
}

impl CookieSettings {
    /// `Set-Cookie` value binding `session_id`.
    ///
    /// `SameSite=Lax` because the provider callback is a cross-site
    /// top-level navigation that must still carry the cookie.
    pub fn create(&self, session_id: &SessionId) -> String {
        let secure_flag = if self.secure { "; Secure" } else { "" };
        format!(
            "{}={}; HttpOnly{}; SameSite=Lax; Path={}; Max-Age={}",
            self.name, session_id, secure_flag, self.path, self.max_age_seconds
        )
    }

    /// `Set-Cookie` value expiring the cookie.
    pub fn clear(&self) -> String {
        let secure_flag = if self.secure { "; Secure" } else { "" };
        format!(
            "{}=; HttpOnly{}; SameSite=Lax; Path={}; Max-Age=0",
            self.name, secure_flag, self.path
        )
    }

    pub fn set(&self, headers: &mut HeaderMap, session_id: &SessionId) {
        if let Ok(value) = HeaderValue::from_str(&self.create(session_id)) {
            headers.append(SET_COOKIE, value);
        }
    }

    /// Session id from the request's `Cookie` headers, if present.
    pub fn extract(&self, headers: &HeaderMap) -> Option<SessionId> {
        let prefix = format!("{}=", self.name);
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|cookies| cookies.split(';'))
            .filter_map(|part| part.trim().strip_prefix(prefix.as_str()))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(SessionId::new)
    }
}
