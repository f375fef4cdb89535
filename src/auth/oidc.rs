//! `CredentialExchange` against an OpenID Connect token endpoint.
//!
//! The authorization code is redeemed with the standard code grant and the
//! returned `id_token` is verified (RS256 signature via the provider JWKS,
//! issuer, audience, expiry) before its claims become the principal.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::auth::exchange::{CredentialExchange, ExchangeError, Principal};
use crate::auth::jwks::{DEFAULT_CACHE_TTL_SECONDS, JwksCache};
use crate::types::{AuthorizationCode, ClientId, RedirectUri};

/// Google's OAuth 2.0 token endpoint.
pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
/// Google's signing keys.
pub const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
/// Issuer Google puts in ID tokens (also issued without the scheme).
pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";

/// Token endpoint + verification settings.
#[derive(Debug, Clone)]
pub struct OidcSettings {
    pub client_id: ClientId,
    pub client_secret: String,
    pub redirect_uri: RedirectUri,
    pub token_endpoint: String,
    pub jwks_url: String,
    /// Accepted `iss` values
    pub issuers: Vec<String>,
}

impl OidcSettings {
    /// Settings for Google's endpoints.
    pub fn google(client_id: ClientId, client_secret: String, redirect_uri: RedirectUri) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_uri,
            token_endpoint: GOOGLE_TOKEN_ENDPOINT.to_string(),
            jwks_url: GOOGLE_JWKS_URL.to_string(),
            issuers: vec![
                GOOGLE_ISSUER.to_string(),
                "accounts.google.com".to_string(),
            ],
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Redeems authorization codes and verifies the resulting ID token.
pub struct OidcCodeExchange {
    settings: OidcSettings,
    client: reqwest::Client,
    jwks: Arc<JwksCache>,
}

impl OidcCodeExchange {
    pub fn new(settings: OidcSettings) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;
        let jwks = Arc::new(JwksCache::with_client(
            settings.jwks_url.clone(),
            DEFAULT_CACHE_TTL_SECONDS,
            true,
            client.clone(),
        ));

        Ok(Self {
            settings,
            client,
            jwks,
        })
    }

    pub fn settings(&self) -> &OidcSettings {
        &self.settings
    }

    async fn redeem(&self, code: &AuthorizationCode) -> Result<String, ExchangeError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "authorization_code")
            .append_pair("code", code.as_str())
            .append_pair("client_id", self.settings.client_id.as_str())
            .append_pair("client_secret", &self.settings.client_secret)
            .append_pair("redirect_uri", self.settings.redirect_uri.as_str())
            .finish();

        let response = self
            .client
            .post(&self.settings.token_endpoint)
            .header(http::header::CONTENT_TYPE, crate::auth::FORM_URLENCODED)
            .header(http::header::ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ExchangeError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let reason = match response.json::<TokenErrorResponse>().await {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{}: {}", err.error, desc),
                    None => err.error,
                },
                Err(_) => format!("HTTP {}", status),
            };
            return Err(ExchangeError::Rejected(reason));
        }
        if !status.is_success() {
            return Err(ExchangeError::Transport(format!(
                "HTTP {} from token endpoint",
                status
            )));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Transport(format!("Malformed token response: {}", e)))?;

        tokens
            .id_token
            .ok_or_else(|| ExchangeError::InvalidToken("Token response has no id_token".to_string()))
    }

    async fn verify(&self, id_token: &str) -> Result<Value, ExchangeError> {
        let header = decode_header(id_token)
            .map_err(|e| ExchangeError::InvalidToken(format!("Invalid JWT header: {}", e)))?;

        let key = self
            .jwks
            .get_key(header.kid.as_deref())
            .await
            .map_err(|e| ExchangeError::InvalidToken(e.to_string()))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&self.settings.issuers);
        validation.set_audience(&[self.settings.client_id.as_str()]);

        let data = decode::<Value>(id_token, &key, &validation).map_err(|e| {
            ExchangeError::InvalidToken(format!("Signature verification failed: {}", e))
        })?;

        Ok(data.claims)
    }
}

/// Build a principal from verified ID-token claims.
pub(crate) fn principal_from_claims(claims: Value) -> Result<Principal, ExchangeError> {
    let subject = claims
        .get("sub")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ExchangeError::InvalidToken("ID token has no sub claim".to_string()))?
        .to_string();

    let mut principal = Principal::new(subject);
    if let Some(email) = claims.get("email").and_then(Value::as_str) {
        principal = principal.with_email(email);
    }
    if let Some(name) = claims.get("name").and_then(Value::as_str) {
        principal = principal.with_name(name);
    }
    Ok(principal.with_user_info(claims))
}

impl CredentialExchange for OidcCodeExchange {
    fn exchange(
        &self,
        code: &AuthorizationCode,
    ) -> Pin<Box<dyn Future<Output = Result<Principal, ExchangeError>> + Send + '_>> {
        let code = code.clone();
        Box::pin(async move {
            let id_token = self.redeem(&code).await?;
            let claims = self.verify(&id_token).await?;
            let principal = principal_from_claims(claims)?;
            debug!(subject = %principal.subject, "ID token verified");
            Ok(principal)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn exchange_for(server: &MockServer) -> OidcCodeExchange {
        let mut settings = OidcSettings::google(
            ClientId::new("client-1"),
            "s3cret".to_string(),
            RedirectUri::new("https://app.example.com/auth/callback"),
        );
        settings.token_endpoint = format!("{}/token", server.uri());
        settings.jwks_url = format!("{}/certs", server.uri());
        OidcCodeExchange::new(settings).unwrap()
    }

    #[test]
    fn test_google_settings() {
        let settings = OidcSettings::google(
            ClientId::new("c"),
            "s".to_string(),
            RedirectUri::new("https://app/cb"),
        );
        assert_eq!(settings.token_endpoint, GOOGLE_TOKEN_ENDPOINT);
        assert_eq!(settings.jwks_url, GOOGLE_JWKS_URL);
        assert!(settings.issuers.contains(&"accounts.google.com".to_string()));
    }

    #[test]
    fn test_principal_from_claims() {
        let claims = serde_json::json!({
            "sub": "1100227",
            "email": "ada@example.com",
            "name": "Ada Lovelace",
            "email_verified": true
        });
        let principal = principal_from_claims(claims.clone()).unwrap();
        assert_eq!(principal.subject.as_str(), "1100227");
        assert_eq!(principal.email.as_deref(), Some("ada@example.com"));
        assert_eq!(principal.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(principal.user_info, claims);

        let err = principal_from_claims(serde_json::json!({"email": "x@y"})).unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_rejected_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Bad Request"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = exchange_for(&server)
            .exchange(&AuthorizationCode::new("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected(ref msg) if msg == "invalid_grant: Bad Request"));
    }

    #[tokio::test]
    async fn test_server_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = exchange_for(&server)
            .exchange(&AuthorizationCode::new("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Transport(_)));
    }

    #[tokio::test]
    async fn test_missing_id_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.token",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;

        let err = exchange_for(&server)
            .exchange(&AuthorizationCode::new("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_garbage_id_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "id_token": "not-a-jwt" })),
            )
            .mount(&server)
            .await;

        let err = exchange_for(&server)
            .exchange(&AuthorizationCode::new("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidToken(ref msg) if msg.starts_with("Invalid JWT header")));
    }
}
