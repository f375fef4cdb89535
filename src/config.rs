use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::auth::{
    AuthenticatorConfig, DEFAULT_SESSION_TTL_SECONDS, GOOGLE_AUTHORIZATION_ENDPOINT, GOOGLE_ISSUER,
    GOOGLE_JWKS_URL, GOOGLE_TOKEN_ENDPOINT, OidcSettings,
};
use crate::types::{ClientId, RedirectUri};

/// Longest accepted idle session lifetime (one year).
pub const MAX_SESSION_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Name of the cookie carrying the session id.
pub const DEFAULT_SESSION_COOKIE: &str = "GATEKEEPER_SESSION";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub redirect_uri: String,

    // login flow
    #[serde(default)]
    pub error_page: Option<String>,
    #[serde(default)]
    pub always_save_uri: bool,
    #[serde(default)]
    pub context_path: String,
    #[serde(default)]
    pub clear_state_on_login: bool,

    // routing
    #[serde(default = "default_protected_paths")]
    pub protected_paths: Vec<String>,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,

    // provider
    #[serde(default = "default_authorization_endpoint")]
    pub authorization_endpoint: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_jwks_url")]
    pub jwks_url: String,
    #[serde(default = "default_issuer")]
    pub issuer: String,

    // sessions
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
}

fn default_protected_paths() -> Vec<String> {
    vec!["/".to_string()]
}

fn default_logout_path() -> String {
    "/logout".to_string()
}

fn default_authorization_endpoint() -> String {
    GOOGLE_AUTHORIZATION_ENDPOINT.to_string()
}

fn default_token_endpoint() -> String {
    GOOGLE_TOKEN_ENDPOINT.to_string()
}

fn default_jwks_url() -> String {
    GOOGLE_JWKS_URL.to_string()
}

fn default_issuer() -> String {
    GOOGLE_ISSUER.to_string()
}

fn default_session_cookie() -> String {
    DEFAULT_SESSION_COOKIE.to_string()
}

fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL_SECONDS
}

impl GatekeeperConfig {
    /// Minimal configuration for one client; everything else defaulted.
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: String::new(),
            redirect_uri: redirect_uri.into(),
            error_page: None,
            always_save_uri: false,
            context_path: String::new(),
            clear_state_on_login: false,
            protected_paths: default_protected_paths(),
            logout_path: default_logout_path(),
            authorization_endpoint: default_authorization_endpoint(),
            token_endpoint: default_token_endpoint(),
            jwks_url: default_jwks_url(),
            issuer: default_issuer(),
            session_cookie: default_session_cookie(),
            session_ttl_seconds: default_session_ttl(),
        }
    }

    /// Parse a JSON document, expanding `${VAR}` in every string value.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let cfg: Self = serde_json::from_value(expand_value(value))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(anyhow::anyhow!("`client_id` must not be empty"));
        }
        url::Url::parse(&self.redirect_uri)
            .map_err(|e| anyhow::anyhow!("`redirect_uri` is not an absolute URL: {}", e))?;
        if !self.logout_path.starts_with('/') {
            return Err(anyhow::anyhow!("`logout_path` must start with /"));
        }
        if self.session_ttl_seconds > MAX_SESSION_TTL_SECONDS {
            return Err(anyhow::anyhow!(
                "`session_ttl_seconds` must be at most {}",
                MAX_SESSION_TTL_SECONDS
            ));
        }
        if self.session_cookie.is_empty()
            || self
                .session_cookie
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, ';' | ',' | '='))
        {
            return Err(anyhow::anyhow!(
                "`session_cookie` is not a valid cookie name: {:?}",
                self.session_cookie
            ));
        }
        Ok(())
    }

    pub fn authenticator_config(&self) -> AuthenticatorConfig {
        let mut config = AuthenticatorConfig::new(
            self.client_id.as_str(),
            self.redirect_uri.as_str(),
        )
        .with_always_save_uri(self.always_save_uri)
        .with_context_path(self.context_path.clone())
        .with_clear_state_on_login(self.clear_state_on_login);
        if let Some(page) = &self.error_page {
            config = config.with_error_page(page.clone());
        }
        config.authorization_endpoint = self.authorization_endpoint.clone();
        config
    }

    pub fn oidc_settings(&self) -> OidcSettings {
        let mut issuers = vec![self.issuer.clone()];
        // Google also issues tokens without the scheme
        if let Some(bare) = self.issuer.strip_prefix("https://")
            && self.issuer == GOOGLE_ISSUER
        {
            issuers.push(bare.to_string());
        }

        OidcSettings {
            client_id: ClientId::new(self.client_id.as_str()),
            client_secret: self.client_secret.clone(),
            redirect_uri: RedirectUri::new(self.redirect_uri.as_str()),
            token_endpoint: self.token_endpoint.clone(),
            jwks_url: self.jwks_url.clone(),
            issuers,
        }
    }

    /// Whether `path` (as seen by the server, context path included)
    /// requires authentication.
    pub fn is_protected(&self, path: &str) -> bool {
        let context = self.context_path.trim_end_matches('/');
        let in_context = if context.is_empty() {
            path
        } else {
            match path.strip_prefix(context) {
                Some("") => "/",
                Some(rest) if rest.starts_with('/') => rest,
                _ => return false,
            }
        };

        self.protected_paths.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            prefix.is_empty()
                || in_context == prefix
                || in_context
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

pub fn resolve_config_path() -> anyhow::Result<PathBuf> {
    resolve_config_path_in(
        env::var("GATEKEEPER_CONFIG").ok().as_deref(),
        env::var("XDG_CONFIG_HOME").ok().as_deref(),
        Path::new("."),
    )
}

fn resolve_config_path_in(
    explicit: Option<&str>,
    xdg_config_home: Option<&str>,
    cwd: &Path,
) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(PathBuf::from(p));
    }

    if let Some(xdg) = xdg_config_home {
        let candidate = PathBuf::from(xdg).join("gatekeeper").join("gatekeeper.json");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let candidate = cwd.join("gatekeeper.json");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow::anyhow!(
        "Could not find gatekeeper.json (set GATEKEEPER_CONFIG or create ./gatekeeper.json)"
    ))
}

pub(crate) fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(expand_env_vars(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(expand_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, expand_value(v)))
                .collect(),
        ),
        other => other,
    }
}

pub fn load_config() -> anyhow::Result<GatekeeperConfig> {
    let path = resolve_config_path()?;
    GatekeeperConfig::from_file(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "client_id": "client-123.apps.googleusercontent.com",
        "redirect_uri": "https://app.example.com/auth/callback"
    }"#;

    #[test]
    fn test_defaults() {
        let cfg = GatekeeperConfig::from_json_str(MINIMAL).unwrap();
        assert_eq!(cfg.client_secret, "");
        assert_eq!(cfg.protected_paths, vec!["/".to_string()]);
        assert_eq!(cfg.logout_path, "/logout");
        assert_eq!(cfg.token_endpoint, GOOGLE_TOKEN_ENDPOINT);
        assert_eq!(cfg.session_cookie, DEFAULT_SESSION_COOKIE);
        assert_eq!(cfg.session_ttl_seconds, DEFAULT_SESSION_TTL_SECONDS);
        assert!(!cfg.always_save_uri);
        assert!(!cfg.clear_state_on_login);
    }

    #[test]
    fn test_env_expansion() {
        // SAFETY: the variable name is unique to this test
        unsafe { env::set_var("GATEKEEPER_TEST_SECRET_7F3A", "hunter2") };

        let raw = r#"{
            "client_id": "client",
            "client_secret": "${GATEKEEPER_TEST_SECRET_7F3A}",
            "redirect_uri": "https://app.example.com/cb",
            "protected_paths": ["/${GATEKEEPER_TEST_UNSET_7F3A}/x"]
        }"#;
        let cfg = GatekeeperConfig::from_json_str(raw).unwrap();
        assert_eq!(cfg.client_secret, "hunter2");
        assert_eq!(cfg.protected_paths, vec!["/${GATEKEEPER_TEST_UNSET_7F3A}/x".to_string()]);
    }

    #[test]
    fn test_expand_env_vars_passthrough() {
        assert_eq!(expand_env_vars("plain $text"), "plain $text");
        assert_eq!(expand_env_vars("${GATEKEEPER_NOPE_1}"), "${GATEKEEPER_NOPE_1}");
    }

    #[test]
    fn test_session_ttl_bounds() {
        let err = GatekeeperConfig::from_json_str(&format!(
            r#"{{"client_id": "c", "redirect_uri": "https://app/cb", "session_ttl_seconds": {}}}"#,
            u64::MAX
        ))
        .unwrap_err();
        assert!(err.to_string().contains("session_ttl_seconds"));

        let cfg = GatekeeperConfig::from_json_str(&format!(
            r#"{{"client_id": "c", "redirect_uri": "https://app/cb", "session_ttl_seconds": {}}}"#,
            MAX_SESSION_TTL_SECONDS
        ))
        .unwrap();
        assert_eq!(cfg.session_ttl_seconds, MAX_SESSION_TTL_SECONDS);
    }

    #[test]
    fn test_validation_errors() {
        let err = GatekeeperConfig::from_json_str(
            r#"{"client_id": " ", "redirect_uri": "https://app/cb"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("client_id"));

        let err = GatekeeperConfig::from_json_str(
            r#"{"client_id": "c", "redirect_uri": "/relative"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("redirect_uri"));

        let err = GatekeeperConfig::from_json_str(
            r#"{"client_id": "c", "redirect_uri": "https://app/cb", "session_cookie": "a b"}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("session_cookie"));
    }

    #[test]
    fn test_authenticator_config_mapping() {
        let mut cfg = GatekeeperConfig::new("client", "https://app/cb");
        cfg.error_page = Some("/error".to_string());
        cfg.context_path = "/app".to_string();
        cfg.always_save_uri = true;

        let auth = cfg.authenticator_config();
        assert_eq!(auth.client_id.as_str(), "client");
        assert_eq!(auth.error_page.as_deref(), Some("/error"));
        assert_eq!(auth.context_path, "/app");
        assert!(auth.always_save_uri);
        assert_eq!(auth.authorization_endpoint, GOOGLE_AUTHORIZATION_ENDPOINT);
    }

    #[test]
    fn test_oidc_settings_issuers() {
        let cfg = GatekeeperConfig::new("client", "https://app/cb");
        assert_eq!(
            cfg.oidc_settings().issuers,
            vec![GOOGLE_ISSUER.to_string(), "accounts.google.com".to_string()]
        );

        let mut custom = cfg.clone();
        custom.issuer = "https://idp.example.com".to_string();
        assert_eq!(
            custom.oidc_settings().issuers,
            vec!["https://idp.example.com".to_string()]
        );
    }

    #[test]
    fn test_is_protected() {
        let mut cfg = GatekeeperConfig::new("client", "https://app/cb");
        assert!(cfg.is_protected("/anything"));

        cfg.protected_paths = vec!["/admin".to_string(), "/orders/".to_string()];
        assert!(cfg.is_protected("/admin"));
        assert!(cfg.is_protected("/admin/users"));
        assert!(cfg.is_protected("/orders/7"));
        assert!(!cfg.is_protected("/administrator"));
        assert!(!cfg.is_protected("/public"));

        cfg.context_path = "/app".to_string();
        assert!(cfg.is_protected("/app/admin"));
        assert!(!cfg.is_protected("/admin"));
    }

    #[test]
    fn test_resolve_prefers_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = resolve_config_path_in(Some("/etc/custom.json"), None, dir.path()).unwrap();
        assert_eq!(path, PathBuf::from("/etc/custom.json"));
    }

    #[test]
    fn test_resolve_xdg_then_cwd() {
        let xdg = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        let xdg_str = xdg.path().to_str().unwrap();

        assert!(resolve_config_path_in(None, Some(xdg_str), cwd.path()).is_err());

        let local = cwd.path().join("gatekeeper.json");
        fs::write(&local, MINIMAL).unwrap();
        assert_eq!(
            resolve_config_path_in(None, Some(xdg_str), cwd.path()).unwrap(),
            local
        );

        let nested = xdg.path().join("gatekeeper");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("gatekeeper.json"), MINIMAL).unwrap();
        assert_eq!(
            resolve_config_path_in(None, Some(xdg_str), cwd.path()).unwrap(),
            nested.join("gatekeeper.json")
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let cfg = GatekeeperConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.client_id, "client-123.apps.googleusercontent.com");

        let missing = GatekeeperConfig::from_file(Path::new("/nonexistent/gatekeeper.json"));
        assert!(missing.is_err());
    }
}
