//! Authentication middleware for the protected application.
//!
//! Every request passing through `gate` is evaluated by the `Authenticator`.
//! Challenges, login completions and failures are answered here; everything
//! else is forwarded to the inner service, with the caller's identity in the
//! request extensions when one is known.

use axum::{
    body::{Body, to_bytes},
    extract::{FromRequestParts, Request, State},
    http::{
        HeaderValue, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION},
        request::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};
use url::Url;

use super::AppState;
use crate::auth::{
    AuthOutcome, AuthRequest, CachedAuthentication, Directive, FORM_URLENCODED, Session,
    SessionSlot, decode_form, encode_form,
};

/// Largest challenged form body saved for replay (1 MiB).
pub const MAX_FORM_BYTES: usize = 1024 * 1024;

/// Identity of the caller, inserted into request extensions by `gate`.
///
/// As an extractor it rejects with `401` when the request was not
/// authenticated.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    /// Best human-readable label: name, then email, then subject.
    pub display_name: String,
    pub method: String,
    pub authenticated_at: DateTime<Utc>,
    pub user_info: Value,
}

impl From<&CachedAuthentication> for AuthenticatedUser {
    fn from(auth: &CachedAuthentication) -> Self {
        Self {
            subject: auth.principal.subject.to_string(),
            email: auth.principal.email.clone(),
            name: auth.principal.name.clone(),
            display_name: auth.principal.display(),
            method: auth.method.clone(),
            authenticated_at: auth.authenticated_at,
            user_info: auth.principal.user_info.clone(),
        }
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Middleware entry point.
pub async fn gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match authorize(&state, request, next).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

async fn authorize(state: &AppState, request: Request, next: Next) -> Result<Response, StatusCode> {
    let (mut parts, body) = request.into_parts();
    let authenticator = &state.authenticator;

    let session = match state.cookies.extract(&parts.headers) {
        Some(id) => authenticator.sessions().get(&id).await,
        None => None,
    };
    let mut slot = SessionSlot::new(session);

    let url = absolute_url(&parts).map_err(|e| {
        debug!("Unparseable request URL: {}", e);
        StatusCode::BAD_REQUEST
    })?;
    let mut auth_request = AuthRequest::new(parts.method.clone(), url).with_version(parts.version);
    if let Some(content_type) = parts.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        auth_request = auth_request.with_content_type(content_type);
    }

    authenticator
        .prepare_request(&mut auth_request, slot.get().map(|s| s.as_ref()))
        .await
        .map_err(internal_error)?;

    let mandatory = state.config.is_protected(auth_request.path());
    let mut outcome = authenticator
        .validate_request(&mut auth_request, &mut slot, mandatory)
        .await
        .map_err(internal_error)?;

    // Optional resources still see a cached identity; no challenge is sent
    if matches!(outcome, AuthOutcome::Deferred) && slot.get().is_some() {
        outcome = authenticator
            .resolve_deferred(&mut auth_request, &mut slot, false)
            .await
            .map_err(internal_error)?;
    }
    debug!(outcome = outcome.kind(), path = auth_request.path(), "gate");

    // Idle expiry is refreshed on every lookup, so the cookie slides with it
    let issue_cookie = slot.is_new() || outcome.authentication().is_some();

    let mut response = match outcome {
        AuthOutcome::Authenticated(authentication) => {
            parts
                .extensions
                .insert(AuthenticatedUser::from(&authentication));
            forward(parts, body, &auth_request, next).await
        }
        AuthOutcome::Deferred | AuthOutcome::Unauthenticated => {
            forward(parts, body, &auth_request, next).await
        }
        AuthOutcome::ChallengeSent(directive) => {
            if auth_request.is_form_post()
                && let Some(session) = slot.get()
            {
                capture_form(state, session, auth_request, body).await?;
            }
            directive_response(&directive)?
        }
        AuthOutcome::Failed(directive) | AuthOutcome::LoginSucceeded { directive, .. } => {
            directive_response(&directive)?
        }
    };

    if issue_cookie && let Some(session) = slot.get() {
        state.cookies.set(response.headers_mut(), session.id());
    }

    Ok(response)
}

/// Buffer a challenged form POST and save its parameters for replay.
///
/// Bodies are only read here, once a challenge is certain; an oversized
/// body still gets the challenge, just without its form.
async fn capture_form(
    state: &AppState,
    session: &Session,
    auth_request: AuthRequest,
    body: Body,
) -> Result<(), StatusCode> {
    let bytes = match to_bytes(body, MAX_FORM_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Form body not saved for replay: {}", e);
            return Ok(());
        }
    };

    let auth_request = auth_request.with_form(decode_form(&bytes));
    state
        .authenticator
        .remember_form(session, &auth_request)
        .await
        .map_err(internal_error)
}

/// Absolute URL of the request as the browser addressed it.
fn absolute_url(parts: &Parts) -> Result<Url, url::ParseError> {
    let scheme = parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");
    let path = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");

    Url::parse(&format!("{}://{}{}", scheme, host, path))
}

/// Hand the request to the application, with the restored method and form.
async fn forward(mut parts: Parts, body: Body, auth_request: &AuthRequest, next: Next) -> Response {
    parts.method = auth_request.method().clone();

    let body = match auth_request.content_params() {
        Some(params) => {
            let encoded = encode_form(params);
            parts
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_URLENCODED));
            parts
                .headers
                .insert(CONTENT_LENGTH, HeaderValue::from(encoded.len()));
            Body::from(encoded)
        }
        None => body,
    };

    next.run(Request::from_parts(parts, body)).await
}

fn directive_response(directive: &Directive) -> Result<Response, StatusCode> {
    match directive {
        Directive::Redirect {
            status,
            location,
            empty_body,
        } => {
            let location = HeaderValue::from_str(location).map_err(|e| {
                error!("Redirect target is not a valid header value: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

            let mut response = Response::new(Body::empty());
            *response.status_mut() = *status;
            response.headers_mut().insert(LOCATION, location);
            if *empty_body {
                response
                    .headers_mut()
                    .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
            Ok(response)
        }
        Directive::Forbidden => Ok(StatusCode::FORBIDDEN.into_response()),
    }
}

fn internal_error(e: crate::auth::AuthError) -> StatusCode {
    error!("Authentication failed internally: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}
