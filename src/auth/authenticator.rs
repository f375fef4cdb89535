//! OAuth 2.0 / OpenID Connect authorization-code authenticator.
//!
//! Unauthenticated requests are redirected to the provider's authorization
//! endpoint. The provider redirects back to the configured redirect URI with
//! an authorization code, which is exchanged for a verified principal and
//! cached in the session. The browser is then sent back to the request that
//! triggered the challenge, with its method and form body restored.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::challenge::{ChallengeBuilder, GOOGLE_AUTHORIZATION_ENDPOINT};
use crate::auth::error::AuthResult;
use crate::auth::exchange::{CachedAuthentication, Credential, CredentialExchange};
use crate::auth::outcome::{AuthOutcome, Directive, redirect_status};
use crate::auth::replay::{self, ReplayRecord};
use crate::auth::request::AuthRequest;
use crate::auth::session::{
    AUTHENTICATED, CSRF_TOKEN, Session, SessionSlot, SessionStore, USER_INFO,
};
use crate::types::{AntiForgeryToken, AuthorizationCode, ClientId, RedirectUri};

/// Authenticator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatorConfig {
    /// OAuth client id registered with the provider
    pub client_id: ClientId,
    /// Callback URI registered with the provider
    pub redirect_uri: RedirectUri,
    /// Page (relative to the context path) to redirect to when a code exchange fails
    #[serde(default)]
    pub error_page: Option<String>,
    /// Remember every challenged URI instead of only the first one
    #[serde(default)]
    pub always_save_uri: bool,
    /// Path prefix the protected application is mounted under
    #[serde(default)]
    pub context_path: String,
    /// Drop the anti-forgery token once a callback has verified it
    #[serde(default)]
    pub clear_state_on_login: bool,
    /// Authorization endpoint challenges redirect to
    #[serde(default = "default_authorization_endpoint")]
    pub authorization_endpoint: String,
}

fn default_authorization_endpoint() -> String {
    GOOGLE_AUTHORIZATION_ENDPOINT.to_string()
}

impl AuthenticatorConfig {
    pub fn new(client_id: impl Into<ClientId>, redirect_uri: impl Into<RedirectUri>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            error_page: None,
            always_save_uri: false,
            context_path: String::new(),
            clear_state_on_login: false,
            authorization_endpoint: default_authorization_endpoint(),
        }
    }

    pub fn with_error_page(mut self, error_page: impl Into<String>) -> Self {
        self.error_page = Some(error_page.into());
        self
    }

    pub fn with_always_save_uri(mut self, always_save: bool) -> Self {
        self.always_save_uri = always_save;
        self
    }

    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    pub fn with_clear_state_on_login(mut self, clear: bool) -> Self {
        self.clear_state_on_login = clear;
        self
    }
}

/// Normalized error page: the redirect target and the bare path used to
/// recognize requests for it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ErrorPage {
    page: String,
    path: String,
}

impl ErrorPage {
    fn parse(raw: Option<&str>) -> Option<Self> {
        let raw = raw.map(str::trim).filter(|p| !p.is_empty())?;

        let page = if raw.starts_with('/') {
            raw.to_string()
        } else {
            warn!("error-page must start with /");
            format!("/{}", raw)
        };

        let path = match page.find('?') {
            Some(idx) if idx > 0 => page[..idx].to_string(),
            _ => page.clone(),
        };

        Some(Self { page, path })
    }
}

/// Join a context path and a context-relative path.
fn add_paths(context_path: &str, path: &str) -> String {
    let context = context_path.trim_end_matches('/');
    if context.is_empty() {
        return path.to_string();
    }
    if path.starts_with('/') {
        format!("{}{}", context, path)
    } else {
        format!("{}/{}", context, path)
    }
}

/// The authentication state machine.
pub struct Authenticator {
    config: AuthenticatorConfig,
    error_page: Option<ErrorPage>,
    challenge: ChallengeBuilder,
    exchange: Arc<dyn CredentialExchange>,
    sessions: Arc<dyn SessionStore>,
}

impl Authenticator {
    pub fn new(
        config: AuthenticatorConfig,
        exchange: Arc<dyn CredentialExchange>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let error_page = ErrorPage::parse(config.error_page.as_deref());
        let challenge = ChallengeBuilder::new(config.client_id.clone(), config.redirect_uri.clone())
            .with_endpoint(config.authorization_endpoint.clone());

        Self {
            config,
            error_page,
            challenge,
            exchange,
            sessions,
        }
    }

    pub fn config(&self) -> &AuthenticatorConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn challenge_builder(&self) -> &ChallengeBuilder {
        &self.challenge
    }

    /// Normalized error page, if one is configured.
    pub fn error_page(&self) -> Option<&str> {
        self.error_page.as_ref().map(|e| e.page.as_str())
    }

    /// Whether `path_in_context` is the configured error page.
    pub fn is_error_page(&self, path_in_context: &str) -> bool {
        self.error_page
            .as_ref()
            .is_some_and(|e| e.path == path_in_context)
    }

    /// Strip the context path from a request path.
    fn path_in_context<'a>(&self, path: &'a str) -> &'a str {
        let context = self.config.context_path.trim_end_matches('/');
        if context.is_empty() {
            return path;
        }
        match path.strip_prefix(context) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        }
    }

    /// Where to send the browser when no original request was saved.
    fn application_root(&self) -> String {
        let context = self.config.context_path.trim_end_matches('/');
        if context.is_empty() {
            "/".to_string()
        } else {
            context.to_string()
        }
    }

    /// Evaluate one request.
    ///
    /// `mandatory` says whether the resource requires authentication; it is
    /// forced on when the request carries an authorization code.
    pub async fn validate_request(
        &self,
        request: &mut AuthRequest,
        slot: &mut SessionSlot,
        mandatory: bool,
    ) -> AuthResult<AuthOutcome> {
        let has_code = request.has_auth_code();
        if !mandatory && !has_code {
            return Ok(AuthOutcome::Deferred);
        }

        if self.is_error_page(self.path_in_context(request.path())) && !request.response_deferred() {
            return Ok(AuthOutcome::Deferred);
        }

        if has_code {
            return self.handle_callback(request, slot).await;
        }

        // Look for cached authentication
        if let Some(session) = slot.get().cloned()
            && let Some(outcome) = self.resume_cached(request, &session).await?
        {
            return Ok(outcome);
        }

        // A committed response cannot carry a challenge
        if request.response_deferred() {
            debug!(
                session = ?slot.get().map(|s| s.id().fingerprint()),
                "auth deferred"
            );
            return Ok(AuthOutcome::Unauthenticated);
        }

        self.send_challenge(request, slot).await
    }

    /// Force a decision for a request that previously came back `Deferred`.
    ///
    /// With `can_challenge == false` the caller's response is already
    /// committed, so a missing identity yields `Unauthenticated` rather
    /// than a redirect.
    pub async fn resolve_deferred(
        &self,
        request: &mut AuthRequest,
        slot: &mut SessionSlot,
        can_challenge: bool,
    ) -> AuthResult<AuthOutcome> {
        if !can_challenge {
            request.set_response_deferred(true);
        }
        self.validate_request(request, slot, true).await
    }

    async fn handle_callback(
        &self,
        request: &AuthRequest,
        slot: &SessionSlot,
    ) -> AuthResult<AuthOutcome> {
        // Verify anti-forgery state token before anything else
        let verified = match slot.get() {
            Some(session) => self.verify_state(session, request.state().as_ref()).await?,
            None => false,
        };
        let (Some(session), Some(code), true) = (slot.get().cloned(), request.auth_code(), verified)
        else {
            warn!("auth failed 403: invalid state parameter");
            return Ok(AuthOutcome::Failed(Directive::Forbidden));
        };

        if let Some(authentication) = self.login(&session, code).await? {
            let resume = {
                let guard = session.lock().await;
                ReplayRecord::load(&guard)?.map(|record| record.uri)
            }
            .unwrap_or_else(|| self.application_root());

            debug!(
                subject = %authentication.principal.subject,
                "authenticated, resuming {}",
                resume
            );

            return Ok(AuthOutcome::LoginSucceeded {
                authentication,
                directive: Directive::Redirect {
                    status: redirect_status(request.version()),
                    location: resume,
                    empty_body: true,
                },
            });
        }

        debug!("OAuth authentication FAILED");
        match &self.error_page {
            None => {
                debug!("auth failed 403");
                Ok(AuthOutcome::Failed(Directive::Forbidden))
            }
            Some(error_page) => {
                debug!("auth failed {}", error_page.page);
                let location = add_paths(&self.config.context_path, &error_page.page);
                Ok(AuthOutcome::Failed(Directive::redirect(request.version(), location)))
            }
        }
    }

    /// Compare the echoed `state` to the session's token.
    ///
    /// In `clear_state_on_login` mode a matching token is consumed in the
    /// same critical section so it cannot verify a second callback.
    async fn verify_state(
        &self,
        session: &Session,
        state: Option<&AntiForgeryToken>,
    ) -> AuthResult<bool> {
        let mut guard = session.lock().await;
        let expected = guard.get::<AntiForgeryToken>(CSRF_TOKEN)?;

        let matched = matches!((expected.as_ref(), state), (Some(e), Some(s)) if e == s);
        if matched && self.config.clear_state_on_login {
            guard.remove(CSRF_TOKEN);
        }
        Ok(matched)
    }

    /// Cached-authentication path. `None` means fall through to a challenge.
    async fn resume_cached(
        &self,
        request: &mut AuthRequest,
        session: &Session,
    ) -> AuthResult<Option<AuthOutcome>> {
        let Some(authentication) = session.get::<CachedAuthentication>(AUTHENTICATED).await? else {
            return Ok(None);
        };

        // Has authentication been revoked?
        if !self.exchange.validate(&authentication.principal).await {
            debug!(subject = %authentication.principal.subject, "auth revoked");
            session.remove(AUTHENTICATED).await;
            return Ok(None);
        }

        let replayed = {
            let mut guard = session.lock().await;
            replay::take_if_matches(&mut guard, request)?
        };
        if let Some(record) = replayed {
            debug!("auth retry {}", record.uri);
            if let Some(form) = record.form {
                debug!("auth rePOST {}", record.uri);
                request.set_content_params(form);
            }
        }

        debug!(subject = %authentication.principal.subject, "auth cached");
        Ok(Some(AuthOutcome::Authenticated(authentication)))
    }

    async fn send_challenge(
        &self,
        request: &AuthRequest,
        slot: &mut SessionSlot,
    ) -> AuthResult<AuthOutcome> {
        let session = slot.get_or_create(self.sessions.as_ref()).await;

        {
            let mut guard = session.lock().await;
            if replay::remember(&mut guard, request, self.config.always_save_uri)? {
                debug!("saved {} {} for replay", request.method(), request.full_url());
            }
        }

        let challenge_uri = self.challenge.challenge_uri(&session).await?;
        debug!(
            session = %session.id().fingerprint(),
            "challenge -> {}",
            self.challenge.endpoint()
        );

        Ok(AuthOutcome::ChallengeSent(Directive::redirect(
            request.version(),
            challenge_uri,
        )))
    }

    /// Attach a form body read after the challenge to the saved request.
    ///
    /// For adapters that only buffer a body once a challenge was issued.
    /// The record is updated only when it describes this request and was
    /// captured without its form parameters.
    pub async fn remember_form(&self, session: &Session, request: &AuthRequest) -> AuthResult<()> {
        let Some(form) = request.form() else {
            return Ok(());
        };

        let mut guard = session.lock().await;
        let Some(mut record) = ReplayRecord::load(&guard)? else {
            return Ok(());
        };
        let captured_empty = record.form.as_ref().is_some_and(|f| f.is_empty());
        if !record.matches(request)
            || record.parsed_method().as_ref() != Some(request.method())
            || !captured_empty
        {
            return Ok(());
        }

        record.form = Some(form.clone());
        record.store(&mut guard)?;
        debug!("attached {} form fields to {}", form.len(), record.uri);
        Ok(())
    }

    /// Exchange `code` and cache the resulting identity in `session`.
    ///
    /// Returns `None` when the provider rejects the code.
    pub async fn login(
        &self,
        session: &Session,
        code: AuthorizationCode,
    ) -> AuthResult<Option<CachedAuthentication>> {
        let principal = match self.exchange.exchange(&code).await {
            Ok(principal) => principal,
            Err(e) => {
                warn!("code exchange failed: {}", e);
                return Ok(None);
            }
        };

        let user_info = principal.user_info.clone();
        let cached = CachedAuthentication::new(principal, Credential { code });

        {
            let mut guard = session.lock().await;
            guard.set(AUTHENTICATED, &cached)?;
            guard.set(USER_INFO, &user_info)?;
        }

        info!(
            subject = %cached.principal.subject,
            "login succeeded for {}",
            cached.principal.display()
        );
        Ok(Some(cached))
    }

    /// Drop the cached identity. A missing session or identity is a no-op.
    pub async fn logout(&self, session: Option<&Session>) {
        let Some(session) = session else {
            return;
        };

        let removed = {
            let mut guard = session.lock().await;
            guard.remove(USER_INFO);
            guard.remove(AUTHENTICATED)
        };
        if removed.is_some() {
            info!(session = %session.id().fingerprint(), "logged out");
        }
    }

    /// Restore the original method on the request that resumes a login.
    ///
    /// The provider's redirect chain turns every request into a GET; when
    /// this request targets the saved URL its saved method is put back.
    /// Must run before `validate_request`, which clears the record.
    pub async fn prepare_request(
        &self,
        request: &mut AuthRequest,
        session: Option<&Session>,
    ) -> AuthResult<()> {
        let Some(session) = session else {
            return Ok(());
        };

        let record = {
            let guard = session.lock().await;
            if !guard.contains(AUTHENTICATED) {
                return Ok(()); // not authenticated yet
            }
            ReplayRecord::load(&guard)?
        };

        let Some(record) = record else {
            return Ok(());
        };
        if !record.matches(request) {
            return Ok(());
        }
        let Some(method) = record.parsed_method() else {
            return Ok(());
        };

        debug!(
            "Restoring original method {} for {} with method {}",
            method,
            record.uri,
            request.method()
        );
        request.set_method(method);
        Ok(())
    }
}
