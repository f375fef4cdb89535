//! Saved description of the request that triggered a challenge.
//!
//! The record lives in three session attributes (`ORIGINAL_URI`,
//! `ORIGINAL_METHOD`, `ORIGINAL_FORM`). All functions here take a
//! `SessionGuard` so the read and the conditional clear happen in one
//! critical section.

use http::Method;
use serde::{Deserialize, Serialize};

use crate::auth::error::SessionError;
use crate::auth::request::{AuthRequest, FormParams};
use crate::auth::session::{ORIGINAL_FORM, ORIGINAL_METHOD, ORIGINAL_URI, SessionGuard};

/// The original request to resume after the provider round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayRecord {
    /// Full URL including the query string.
    pub uri: String,
    /// Original HTTP method, as its canonical string.
    pub method: Option<String>,
    /// Decoded body of a challenged form POST.
    pub form: Option<FormParams>,
}

impl ReplayRecord {
    /// Describe `request` for later replay.
    pub fn capture(request: &AuthRequest) -> Self {
        let form = if request.is_form_post() {
            Some(request.form().cloned().unwrap_or_default())
        } else {
            None
        };

        Self {
            uri: request.full_url().to_string(),
            method: Some(request.method().as_str().to_string()),
            form,
        }
    }

    /// Read the record from the session. Empty URIs count as absent.
    pub fn load(guard: &SessionGuard<'_>) -> Result<Option<Self>, SessionError> {
        let Some(uri) = guard.get::<String>(ORIGINAL_URI)? else {
            return Ok(None);
        };
        if uri.is_empty() {
            return Ok(None);
        }

        Ok(Some(Self {
            uri,
            method: guard.get(ORIGINAL_METHOD)?,
            form: guard.get(ORIGINAL_FORM)?,
        }))
    }

    /// Write the record, replacing whatever was stored before.
    pub fn store(&self, guard: &mut SessionGuard<'_>) -> Result<(), SessionError> {
        guard.set(ORIGINAL_URI, &self.uri)?;
        match &self.method {
            Some(method) => guard.set(ORIGINAL_METHOD, method)?,
            None => {
                guard.remove(ORIGINAL_METHOD);
            }
        }
        match &self.form {
            Some(form) => guard.set(ORIGINAL_FORM, form)?,
            None => {
                guard.remove(ORIGINAL_FORM);
            }
        }
        Ok(())
    }

    /// Remove all three attributes.
    pub fn clear(guard: &mut SessionGuard<'_>) {
        guard.remove(ORIGINAL_URI);
        guard.remove(ORIGINAL_METHOD);
        guard.remove(ORIGINAL_FORM);
    }

    pub fn matches(&self, request: &AuthRequest) -> bool {
        self.uri == request.full_url()
    }

    /// Saved method, if it parses as an HTTP method.
    pub fn parsed_method(&self) -> Option<Method> {
        self.method
            .as_deref()
            .filter(|m| !m.is_empty())
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
    }
}

/// Save `request` as the replay target unless one is already pending.
///
/// With `always_save` the pending record is overwritten. Returns whether a
/// record was written.
pub fn remember(
    guard: &mut SessionGuard<'_>,
    request: &AuthRequest,
    always_save: bool,
) -> Result<bool, SessionError> {
    if !always_save && guard.contains(ORIGINAL_URI) {
        return Ok(false);
    }

    ReplayRecord::capture(request).store(guard)?;
    Ok(true)
}

/// Consume the record if it targets `request`.
///
/// On a match the saved form body is returned (if any) and the record is
/// cleared. A record for a different URL is left untouched.
pub fn take_if_matches(
    guard: &mut SessionGuard<'_>,
    request: &AuthRequest,
) -> Result<Option<ReplayRecord>, SessionError> {
    let Some(record) = ReplayRecord::load(guard)? else {
        return Ok(None);
    };
    if !record.matches(request) {
        return Ok(None);
    }

    ReplayRecord::clear(guard);
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::Session;
    use crate::types::SessionId;

    fn form_post(url: &str) -> AuthRequest {
        AuthRequest::parse(Method::POST, url)
            .unwrap()
            .with_form(vec![("item".to_string(), "42".to_string())])
    }

    #[test]
    fn test_capture_get() {
        let req = AuthRequest::parse(Method::GET, "http://localhost/protected?x=1").unwrap();
        let record = ReplayRecord::capture(&req);
        assert_eq!(record.uri, "http://localhost/protected?x=1");
        assert_eq!(record.method.as_deref(), Some("GET"));
        assert!(record.form.is_none());
    }

    #[test]
    fn test_capture_form_post() {
        let record = ReplayRecord::capture(&form_post("http://localhost/order"));
        assert_eq!(record.method.as_deref(), Some("POST"));
        assert_eq!(
            record.form,
            Some(vec![("item".to_string(), "42".to_string())])
        );
    }

    #[test]
    fn test_capture_json_post_has_no_form() {
        let req = AuthRequest::parse(Method::POST, "http://localhost/api")
            .unwrap()
            .with_content_type("application/json");
        assert!(ReplayRecord::capture(&req).form.is_none());
    }

    #[tokio::test]
    async fn test_remember_keeps_first_uri() {
        let session = Session::new(SessionId::new("s"));
        let first = AuthRequest::parse(Method::GET, "http://localhost/first").unwrap();
        let second = AuthRequest::parse(Method::GET, "http://localhost/second").unwrap();

        let mut guard = session.lock().await;
        assert!(remember(&mut guard, &first, false).unwrap());
        assert!(!remember(&mut guard, &second, false).unwrap());
        assert_eq!(
            ReplayRecord::load(&guard).unwrap().unwrap().uri,
            "http://localhost/first"
        );

        assert!(remember(&mut guard, &second, true).unwrap());
        assert_eq!(
            ReplayRecord::load(&guard).unwrap().unwrap().uri,
            "http://localhost/second"
        );
    }

    #[tokio::test]
    async fn test_overwrite_drops_stale_form() {
        let session = Session::new(SessionId::new("s"));
        let mut guard = session.lock().await;

        remember(&mut guard, &form_post("http://localhost/order"), true).unwrap();
        let get = AuthRequest::parse(Method::GET, "http://localhost/other").unwrap();
        remember(&mut guard, &get, true).unwrap();

        let record = ReplayRecord::load(&guard).unwrap().unwrap();
        assert_eq!(record.method.as_deref(), Some("GET"));
        assert!(record.form.is_none());
    }

    #[tokio::test]
    async fn test_take_if_matches_clears_once() {
        let session = Session::new(SessionId::new("s"));
        let req = form_post("http://localhost/order?step=2");

        let mut guard = session.lock().await;
        remember(&mut guard, &req, false).unwrap();

        let other = AuthRequest::parse(Method::GET, "http://localhost/elsewhere").unwrap();
        assert!(take_if_matches(&mut guard, &other).unwrap().is_none());
        assert!(guard.contains(ORIGINAL_URI));

        let resumed = AuthRequest::parse(Method::GET, "http://localhost/order?step=2").unwrap();
        let record = take_if_matches(&mut guard, &resumed).unwrap().unwrap();
        assert_eq!(record.parsed_method(), Some(Method::POST));
        assert!(record.form.is_some());
        assert!(!guard.contains(ORIGINAL_URI));
        assert!(!guard.contains(ORIGINAL_METHOD));
        assert!(!guard.contains(ORIGINAL_FORM));

        assert!(take_if_matches(&mut guard, &resumed).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_uri_is_absent() {
        let session = Session::new(SessionId::new("s"));
        let mut guard = session.lock().await;
        guard.set(ORIGINAL_URI, &"").unwrap();
        assert!(ReplayRecord::load(&guard).unwrap().is_none());
    }
}
