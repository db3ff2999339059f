//! Proxy login endpoints served on every service domain.
//!
//! # Data Flow
//! ```text
//! POST /auth/session {username, password}
//!     → local password check → proxy policies → session + cookie (200)
//! GET /auth/callback?token&timestamp&nonce&sig
//!     → signature check (nonce consumed) → proxy policies → session + cookie (302 /)
//! ```
//!
//! # Design Decisions
//! - Both endpoints run the same proxy policy checks as a proxied request
//! - The cookie is scoped to the parent domain for session-sharing services
//! - Callback links are single use; prefetches are refused so a link preview
//!   cannot burn the nonce

use axum::body::Body;
use axum::extract::{FromRequest, Query};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use url::Url;

use crate::audit::{AuditFields, AuditKind};
use crate::auth::agent::Agent;
use crate::auth::cookie::{SessionCookie, SetCookies};
use crate::auth::password::authenticate_local;
use crate::auth::signature::sign;
use crate::auth::{SessionKind, Signature};
use crate::context::{user_agent, RequestContext};
use crate::error::{ErrorData, GatewayError, GatewayResult};
use crate::http::response::{found, LOGIN_PATH};
use crate::http::server::AppState;
use crate::model::{unix_now, User};
use crate::observability::metrics;
use crate::policy::Evaluation;
use crate::proxy::headers::is_prefetch;
use crate::routing::Host;

pub const SESSION_PATH: &str = "/auth/session";
pub const CALLBACK_PATH: &str = "/auth/callback";

#[derive(Debug, Deserialize)]
pub struct LoginData {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub sig: String,
}

/// `POST /auth/session`: password login for the matched service.
pub async fn session_post(
    state: &AppState,
    host: &Host,
    ctx: &mut RequestContext,
    request: Request<Body>,
) -> Response {
    ctx.agent =
        Agent::resolve(state.geo.as_ref(), ctx.client_ip, user_agent(request.headers())).await;

    let Json(data) = match Json::<LoginData>::from_request(request, &()).await {
        Ok(data) => data,
        Err(rejection) => return rejection.into_response(),
    };

    let users = state.auth.users.as_ref();
    let user = match authenticate_local(users, &data.username, &data.password).await {
        Ok(user) => user,
        Err(e) => return login_failed(ctx, host, e),
    };

    match open_session(state, host, ctx, &user, "login").await {
        Ok(cookies) => (StatusCode::OK, cookies, ()).into_response(),
        Err(response) => response,
    }
}

/// `GET /auth/callback`: exchange a signed single-use link for a session.
pub async fn callback_get(
    state: &AppState,
    host: &Host,
    ctx: &mut RequestContext,
    request: Request<Body>,
) -> Response {
    if is_prefetch(request.headers()) {
        return (StatusCode::SERVICE_UNAVAILABLE, "Prefetch blocked").into_response();
    }
    ctx.agent =
        Agent::resolve(state.geo.as_ref(), ctx.client_ip, user_agent(request.headers())).await;

    let Query(query) = match Query::<CallbackQuery>::try_from_uri(request.uri()) {
        Ok(query) => query,
        Err(rejection) => return rejection.into_response(),
    };

    let user = match callback_user(state, &query).await {
        Ok(user) => user,
        Err(e) => return login_failed(ctx, host, e),
    };

    match open_session(state, host, ctx, &user, "callback").await {
        Ok(cookies) => found(LOGIN_PATH, cookies),
        Err(response) => response,
    }
}

async fn callback_user(state: &AppState, query: &CallbackQuery) -> GatewayResult<User> {
    let signature = Signature::parse(
        &query.token,
        &query.sig,
        &query.timestamp,
        &query.nonce,
        "GET",
        CALLBACK_PATH,
    )?;
    state.auth.signatures.validate(&signature).await
}

fn login_failed(ctx: &RequestContext, host: &Host, err: GatewayError) -> Response {
    if !err.is_authentication() {
        return err.into_response();
    }
    tracing::info!(
        request_id = %ctx.request_id,
        service = %host.service.name,
        client_ip = %ctx.client_ip,
        error = %err,
        "Proxy login failed"
    );
    metrics::record_auth_failure("proxy", "login");
    let body = ErrorData::new("authentication", "Invalid credentials");
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// Validate `user` against the service's policies and issue a proxy session.
async fn open_session(
    state: &AppState,
    host: &Host,
    ctx: &RequestContext,
    user: &User,
    method: &str,
) -> Result<SetCookies, Response> {
    match state
        .policies
        .validate_proxy(user, false, &host.service, ctx)
        .await
    {
        Ok(Evaluation::Allow(_)) => {}
        Ok(Evaluation::Deny(denial)) => {
            let mut fields = AuditFields::new();
            fields.insert("error".to_string(), denial.audit.error.clone());
            fields.insert("message".to_string(), denial.audit.message.clone());
            fields.insert("method".to_string(), method.to_string());
            if let Err(e) = state
                .audit
                .record(&user.id, AuditKind::ProxyAuthFailed, fields, ctx)
                .await
            {
                return Err(e.into_response());
            }

            tracing::info!(
                request_id = %ctx.request_id,
                user_id = %user.id,
                service = %host.service.name,
                error = %denial.data.error,
                "Proxy login denied by policy"
            );
            metrics::record_auth_failure("proxy", "policy");
            return Err((StatusCode::UNAUTHORIZED, Json(denial.data)).into_response());
        }
        Err(e) => return Err(e.into_response()),
    }

    let (session, signature) = state
        .auth
        .sessions
        .create(&user.id, ctx, SessionKind::Proxy)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(SessionCookie {
        id: session.id,
        signature,
    }
    .set_cookie(
        SessionKind::Proxy,
        &state.auth.cookies,
        host.shared_domain().as_deref(),
    ))
}

/// Single-use login link for `base` (scheme and host of the service).
pub fn callback_url(base: &Url, token: &str, secret: &str, nonce: &str) -> GatewayResult<Url> {
    let timestamp = unix_now();
    let sig = sign(secret, token, timestamp, nonce, "GET", CALLBACK_PATH)?;

    let mut url = base
        .join(CALLBACK_PATH)
        .map_err(|e| GatewayError::Parse(format!("callback url: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("timestamp", &timestamp.to_string())
        .append_pair("nonce", nonce)
        .append_pair("sig", &sig);
    Ok(url)
}
