//! Transport-neutral view of an inbound request.
//!
//! The authenticator never touches the host framework directly: the HTTP
//! adapter builds an `AuthRequest`, lets the authenticator inspect and
//! mutate it (method restoration, re-attached form body), and then applies
//! the changes to the real request before forwarding it.

use http::{Method, Version};
use url::Url;

use crate::types::{AuthorizationCode, AntiForgeryToken};

/// Content type of HTML form submissions.
pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Decoded form parameters, in submission order. Keys may repeat.
pub type FormParams = Vec<(String, String)>;

/// Everything the authenticator needs to know about one request.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    method: Method,
    url: Url,
    version: Version,
    content_type: Option<String>,
    form: Option<FormParams>,
    content_params: Option<FormParams>,
    response_deferred: bool,
}

impl AuthRequest {
    /// Create a request for the given method and absolute URL.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            version: Version::HTTP_11,
            content_type: None,
            form: None,
            content_params: None,
            response_deferred: false,
        }
    }

    /// Parse an absolute URL string.
    pub fn parse(method: Method, url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(method, Url::parse(url)?))
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Attach a request body that was submitted as an HTML form.
    pub fn with_form(mut self, params: FormParams) -> Self {
        self.content_type = Some(FORM_URLENCODED.to_string());
        self.form = Some(params);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Mark the response channel as unable to carry a challenge.
    pub fn deferred(mut self) -> Self {
        self.response_deferred = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Overwrite the request method (used when resuming a replayed request).
    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Full request URL including the query string, as used for replay matching.
    pub fn full_url(&self) -> &str {
        self.url.as_str()
    }

    /// Path component without the query string.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// First value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Authorization code delivered on the provider callback.
    pub fn auth_code(&self) -> Option<AuthorizationCode> {
        self.query_param("code").map(AuthorizationCode::new)
    }

    /// Anti-forgery token echoed by the provider.
    pub fn state(&self) -> Option<AntiForgeryToken> {
        self.query_param("state").map(AntiForgeryToken::new)
    }

    pub fn has_auth_code(&self) -> bool {
        self.url.query_pairs().any(|(k, _)| k == "code")
    }

    /// Whether this is a POST carrying a url-encoded form.
    pub fn is_form_post(&self) -> bool {
        self.method == Method::POST
            && self
                .content_type
                .as_deref()
                .and_then(|ct| ct.split(';').next())
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_URLENCODED))
    }

    /// Form parameters decoded from this request's own body.
    pub fn form(&self) -> Option<&FormParams> {
        self.form.as_ref()
    }

    /// Form parameters restored from a replayed request, if any.
    pub fn content_params(&self) -> Option<&FormParams> {
        self.content_params.as_ref()
    }

    pub fn set_content_params(&mut self, params: FormParams) {
        self.content_params = Some(params);
    }

    pub fn response_deferred(&self) -> bool {
        self.response_deferred
    }

    pub fn set_response_deferred(&mut self, deferred: bool) {
        self.response_deferred = deferred;
    }
}

/// Decode an `application/x-www-form-urlencoded` body.
pub fn decode_form(body: &[u8]) -> FormParams {
    url::form_urlencoded::parse(body).into_owned().collect()
}

/// Encode form parameters back into a request body.
pub fn encode_form(params: &FormParams) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_accessors() {
        let req = AuthRequest::parse(Method::GET, "http://localhost:8080/cb?code=abc&state=T1").unwrap();
        assert!(req.has_auth_code());
        assert_eq!(req.auth_code().unwrap().as_str(), "abc");
        assert_eq!(req.state().unwrap().as_str(), "T1");
        assert_eq!(req.path(), "/cb");
        assert_eq!(req.full_url(), "http://localhost:8080/cb?code=abc&state=T1");
    }

    #[test]
    fn test_empty_code_still_counts_as_callback() {
        let req = AuthRequest::parse(Method::GET, "http://localhost/cb?code=").unwrap();
        assert!(req.has_auth_code());
        assert_eq!(req.auth_code().unwrap().as_str(), "");
        assert!(req.state().is_none());
    }

    #[test]
    fn test_is_form_post() {
        let url = "http://localhost/submit";
        let form = AuthRequest::parse(Method::POST, url)
            .unwrap()
            .with_content_type("application/x-www-form-urlencoded; charset=UTF-8");
        assert!(form.is_form_post());

        let json = AuthRequest::parse(Method::POST, url)
            .unwrap()
            .with_content_type("application/json");
        assert!(!json.is_form_post());

        let get = AuthRequest::parse(Method::GET, url)
            .unwrap()
            .with_content_type(FORM_URLENCODED);
        assert!(!get.is_form_post());
    }

    #[test]
    fn test_form_codec_keeps_repeated_keys() {
        let params = decode_form(b"a=1&b=two+words&a=3");
        assert_eq!(
            params,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two words".to_string()),
                ("a".to_string(), "3".to_string()),
            ]
        );
        assert_eq!(encode_form(&params), "a=1&b=two+words&a=3");
    }
}
