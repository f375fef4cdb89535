//! Construction of the redirect to the provider's authorization endpoint.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::auth::error::SessionError;
use crate::auth::session::{CSRF_TOKEN, Session};
use crate::types::{AntiForgeryToken, ClientId, RedirectUri};

/// Google's OAuth 2.0 authorization endpoint.
pub const GOOGLE_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// OpenID Connect scopes requested on every challenge.
pub const SCOPES: [&str; 3] = ["openid", "email", "profile"];

/// Random bytes per anti-forgery token (192 bits).
const TOKEN_BYTES: usize = 24;

/// Mint a new anti-forgery token from the OS CSPRNG.
pub fn mint_token() -> AntiForgeryToken {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    AntiForgeryToken::new(URL_SAFE_NO_PAD.encode(bytes))
}

/// Builds authorization-endpoint URLs for one registered client.
#[derive(Debug, Clone)]
pub struct ChallengeBuilder {
    endpoint: String,
    client_id: ClientId,
    redirect_uri: RedirectUri,
}

impl ChallengeBuilder {
    pub fn new(client_id: ClientId, redirect_uri: RedirectUri) -> Self {
        Self {
            endpoint: GOOGLE_AUTHORIZATION_ENDPOINT.to_string(),
            client_id,
            redirect_uri,
        }
    }

    /// Point the challenge at a different authorization endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn redirect_uri(&self) -> &RedirectUri {
        &self.redirect_uri
    }

    /// Authorization URL carrying `token` as the `state` parameter.
    pub fn build(&self, token: &AntiForgeryToken) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", self.client_id.as_str())
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("state", token.as_str())
            .append_pair("response_type", "code")
            .finish()
            // form encoding writes spaces as '+'; keep the scope list as %20
            .replace('+', "%20");

        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.endpoint, separator, query)
    }

    /// Challenge URL for `session`, reusing its pending token or minting one.
    ///
    /// The read and the lazy write of the token happen under the session
    /// lock, so concurrent challenges on one session agree on the token.
    pub async fn challenge_uri(&self, session: &Session) -> Result<String, SessionError> {
        let token = {
            let mut guard = session.lock().await;
            match guard.get::<AntiForgeryToken>(CSRF_TOKEN)? {
                Some(token) => token,
                None => {
                    let token = mint_token();
                    guard.set(CSRF_TOKEN, &token)?;
                    token
                }
            }
        };

        Ok(self.build(&token))
    }
}
