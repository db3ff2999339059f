//! Request dispatch for proxied services.
//!
//! # Data Flow
//! ```text
//! request
//!     → match Host against service domains (no match: /check or 404)
//!     → CSRF origin check (401, no body)
//!     → login endpoints (/auth/session, /auth/callback) issue proxy sessions
//!     → whitelisted network or path? forward without authentication
//!     → resolve agent, authorize proxy session or signature
//!     → resolve user, validate proxy policies (deny: clear + audit)
//!     → websocket upgrade, logout path, or forward to a random server
//! ```

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use crate::audit::{AuditFields, AuditKind};
use crate::auth::agent::Agent;
use crate::auth::csrf::origin_allowed;
use crate::auth::Authorizer;
use crate::context::{request_host, strip_port, user_agent, RequestContext};
use crate::http::request::request_id;
use crate::http::response::{csrf_rejected, found, unauthenticated, LOGIN_PATH};
use crate::http::server::AppState;
use crate::http::websocket::proxy_websocket;
use crate::model::{Service, ServiceServer};
use crate::observability::metrics;
use crate::policy::Evaluation;
use crate::proxy::headers::{is_prefetch, is_websocket_upgrade, upstream_request_headers, Forwarded};
use crate::proxy::login;
use crate::proxy::transport::bad_gateway;
use crate::routing::Host;

/// Fallback handler for every request the gateway receives.
pub async fn dispatch(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();

    let matched = inbound_host(&request).and_then(|host| state.services.match_host(&host));
    let (response, service) = match matched {
        Some(host) => {
            let name = host.service.name.clone();
            (serve(&state, host, peer.ip(), request).await, name)
        }
        None => (unmatched(&request), "none".to_string()),
    };

    metrics::record_request(&method, response.status().as_u16(), &service, start);
    response
}

fn unmatched(request: &Request<Body>) -> Response {
    if request.uri().path() == "/check" {
        return (StatusCode::OK, "ok").into_response();
    }
    tracing::debug!(
        host = ?request.headers().get(header::HOST),
        path = %request.uri().path(),
        "No service matched"
    );
    StatusCode::NOT_FOUND.into_response()
}

async fn serve(state: &AppState, host: Arc<Host>, client_ip: IpAddr, request: Request<Body>) -> Response {
    let service = host.service.clone();
    let mut ctx = RequestContext {
        request_id: request_id(request.headers()),
        client_ip,
        method: request.method().clone(),
        path: request.uri().path().to_string(),
        host: inbound_host(&request).unwrap_or_default(),
        scheme: state.scheme,
        port: state.port_for(&request),
        agent: Agent::default(),
    };

    if !service.disable_csrf_check && !origin_allowed(request.headers(), &ctx) {
        tracing::warn!(
            request_id = %ctx.request_id,
            service = %service.name,
            origin = ?request.headers().get(header::ORIGIN),
            "Origin check failed"
        );
        metrics::record_auth_failure("proxy", "csrf");
        return csrf_rejected();
    }

    if ctx.method == Method::POST && ctx.path == login::SESSION_PATH {
        return login::session_post(state, &host, &mut ctx, request).await;
    }
    if ctx.method == Method::GET && ctx.path == login::CALLBACK_PATH {
        return login::callback_get(state, &host, &mut ctx, request).await;
    }

    if is_whitelisted(&service, client_ip, &ctx.path) {
        tracing::debug!(
            request_id = %ctx.request_id,
            service = %service.name,
            client_ip = %client_ip,
            "Whitelisted request"
        );
        return proxy_request(state, &host, &ctx, request).await;
    }

    ctx.agent = Agent::resolve(state.geo.as_ref(), client_ip, user_agent(request.headers())).await;

    let mut authr = match state
        .auth
        .authorize_proxy(service.clone(), host.shared_domain(), request.headers(), &ctx)
        .await
    {
        Ok(authr) => authr,
        Err(e) => {
            if e.is_authentication() {
                tracing::info!(
                    request_id = %ctx.request_id,
                    service = %service.name,
                    client_ip = %client_ip,
                    error = %e,
                    "Proxy authentication failed"
                );
                metrics::record_auth_failure("proxy", "credentials");
            }
            return e.into_response();
        }
    };

    if !authr.is_valid() {
        return clear_unauthenticated(state, &mut authr, request.headers(), &ctx).await;
    }

    let user = match authr.get_user(state.auth.users.as_ref()).await {
        Ok(Some(user)) => user,
        Ok(None) => return clear_unauthenticated(state, &mut authr, request.headers(), &ctx).await,
        Err(e) => return e.into_response(),
    };

    match state
        .policies
        .validate_proxy(&user, authr.is_api(), &service, &ctx)
        .await
    {
        Ok(Evaluation::Allow(_)) => {}
        Ok(Evaluation::Deny(denial)) => {
            if denial.is_account_disabled() {
                if let Err(e) = state.auth.sessions.remove_all(&user.id).await {
                    return e.into_response();
                }
            }

            let cookies = match authr.clear(&state.auth.sessions).await {
                Ok(cookies) => cookies,
                Err(e) => return e.into_response(),
            };

            let mut fields = AuditFields::new();
            fields.insert("error".to_string(), denial.audit.error.clone());
            fields.insert("message".to_string(), denial.audit.message.clone());
            fields.insert("method".to_string(), "check".to_string());
            if let Err(e) = state
                .audit
                .record(&user.id, AuditKind::ProxyAuthFailed, fields, &ctx)
                .await
            {
                return e.into_response();
            }

            tracing::info!(
                request_id = %ctx.request_id,
                user_id = %user.id,
                service = %service.name,
                error = %denial.data.error,
                "Proxy access denied by policy"
            );
            metrics::record_auth_failure("proxy", "policy");
            return unauthenticated(request.headers(), &ctx.path, cookies);
        }
        Err(e) => return e.into_response(),
    }

    if service.websockets && is_websocket_upgrade(request.headers()) {
        return proxy_request(state, &host, &ctx, request).await;
    }

    if matches_glob(service.logout_path.as_deref(), &ctx.path) {
        if is_prefetch(request.headers()) {
            return (StatusCode::SERVICE_UNAVAILABLE, "Prefetch blocked").into_response();
        }
        let cookies = match authr.clear(&state.auth.sessions).await {
            Ok(cookies) => cookies,
            Err(e) => return e.into_response(),
        };
        tracing::info!(request_id = %ctx.request_id, user_id = %user.id, "Proxy session logged out");
        return found(LOGIN_PATH, cookies);
    }

    proxy_request(state, &host, &ctx, request).await
}

async fn clear_unauthenticated(
    state: &AppState,
    authr: &mut Authorizer,
    headers: &HeaderMap,
    ctx: &RequestContext,
) -> Response {
    match authr.clear(&state.auth.sessions).await {
        Ok(cookies) => unauthenticated(headers, &ctx.path, cookies),
        Err(e) => e.into_response(),
    }
}

/// Websocket bridge or plain HTTP forward to one of the service's servers.
async fn proxy_request(
    state: &AppState,
    host: &Host,
    ctx: &RequestContext,
    request: Request<Body>,
) -> Response {
    let Some(server) = pick_server(&host.service) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    // Without websocket support the upgrade headers are dropped as
    // hop-by-hop and the request goes out as plain HTTP.
    if host.service.websockets && is_websocket_upgrade(request.headers()) {
        return proxy_websocket(state, host, server, ctx, request).await;
    }

    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");

    let mut headers = upstream_request_headers(
        &parts.headers,
        &Forwarded {
            client_ip: ctx.client_ip,
            proto: ctx.scheme,
            port: ctx.port,
            host_override: host.domain.host.as_deref(),
        },
    );
    // HTTP/2 clients send the authority in the URI only.
    if !headers.contains_key(header::HOST) {
        if let Some(authority) = parts.uri.authority() {
            if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
                headers.insert(header::HOST, value);
            }
        }
    }

    match state
        .transport
        .forward(server, host.service.http2, parts.method, path_and_query, headers, body)
        .await
    {
        Ok(response) if response.status() == StatusCode::SWITCHING_PROTOCOLS => {
            tracing::warn!(
                request_id = %ctx.request_id,
                service = %host.service.name,
                "Upstream switched protocols on a plain request"
            );
            bad_gateway()
        }
        Ok(response) => response,
        Err(e) => {
            tracing::error!(
                request_id = %ctx.request_id,
                service = %host.service.name,
                server = %server.base_url(),
                error = %e,
                "Proxy server error"
            );
            bad_gateway()
        }
    }
}

/// Uniformly random server of the service.
fn pick_server(service: &Service) -> Option<&ServiceServer> {
    match service.servers.len() {
        0 => None,
        1 => service.servers.first(),
        n => service.servers.get(fastrand::usize(..n)),
    }
}

fn is_whitelisted(service: &Service, client_ip: IpAddr, path: &str) -> bool {
    service.whitelist_networks.iter().any(|net| net.contains(&client_ip))
        || service
            .whitelist_paths
            .iter()
            .any(|pattern| matches_glob(Some(pattern), path))
}

fn matches_glob(pattern: Option<&str>, path: &str) -> bool {
    pattern
        .and_then(|p| glob::Pattern::new(p).ok())
        .map(|p| p.matches(path))
        .unwrap_or(false)
}

/// Lowercased host of the request from the Host header or, for HTTP/2,
/// the URI authority.
fn inbound_host(request: &Request<Body>) -> Option<String> {
    request_host(request.headers()).or_else(|| {
        request
            .uri()
            .host()
            .map(|h| strip_port(h).trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
    })
}
