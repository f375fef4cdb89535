// HTTP front of the gatekeeper

mod gate;
mod session_cookie;

use axum::{
    Json, Router,
    extract::{Extension, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::SET_COOKIE},
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::auth::{Authenticator, FORM_URLENCODED, decode_form};
use crate::config::GatekeeperConfig;

pub use gate::{AuthenticatedUser, MAX_FORM_BYTES};

/// Largest body the stand-in application reads (16 MiB).
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
pub use session_cookie::CookieSettings;

#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub config: Arc<GatekeeperConfig>,
    pub cookies: Arc<CookieSettings>,
}

impl AppState {
    pub fn new(config: GatekeeperConfig, authenticator: Arc<Authenticator>) -> Self {
        let path = match config.context_path.trim_end_matches('/') {
            "" => "/".to_string(),
            context => context.to_string(),
        };
        let cookies = CookieSettings {
            name: config.session_cookie.clone(),
            path,
            secure: config.redirect_uri.starts_with("https://"),
            max_age_seconds: config.session_ttl_seconds,
        };

        Self {
            authenticator,
            config: Arc::new(config),
            cookies: Arc::new(cookies),
        }
    }
}

/// Router with the health and logout endpoints plus the gated application.
pub fn create_router(state: AppState) -> Router {
    let logout_path = state.config.logout_path.clone();

    let gated = Router::new()
        .route("/me", get(current_user))
        .fallback(protected_resource)
        .layer(middleware::from_fn_with_state(state.clone(), gate::gate));

    Router::new()
        .route("/health", get(health_check))
        .route(&logout_path, get(logout).post(logout))
        .merge(gated)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn current_user(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}

/// Drop the cached identity of the caller's session and expire its cookie.
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let session = match state.cookies.extract(&headers) {
        Some(id) => state.authenticator.sessions().get(&id).await,
        None => None,
    };
    state.authenticator.logout(session.as_deref()).await;

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&state.cookies.clear()) {
        response_headers.insert(SET_COOKIE, value);
    }

    (
        response_headers,
        Json(serde_json::json!({ "status": "logged_out" })),
    )
}

/// Stand-in for the protected application: describes the request it got.
async fn protected_resource(
    user: Option<Extension<AuthenticatedUser>>,
    request: Request,
) -> Result<Json<Value>, StatusCode> {
    let (parts, body) = request.into_parts();
    let is_form = parts
        .headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(FORM_URLENCODED));

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;
    let form = if is_form {
        let params: serde_json::Map<String, Value> = decode_form(&bytes)
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        Some(params)
    } else {
        None
    };

    Ok(Json(serde_json::json!({
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "user": user.map(|Extension(u)| u.subject),
        "form": form,
        "body_bytes": bytes.len(),
    })))
}
