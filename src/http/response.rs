//! Responses the gateway answers itself.
//!
//! # Design Decisions
//! - API clients (JSON accept) get a JSON 401, browsers get sent to the
//!   login page at `/`
//! - Cookie removals ride along with every unauthenticated answer
//! - Bodies never say which check failed

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};

use crate::auth::cookie::SetCookies;
use crate::error::ErrorData;

/// Path the interactive login lives on.
pub const LOGIN_PATH: &str = "/";

/// Whether the client negotiated JSON.
pub fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("application/json") && !accept.contains("text/html"))
        .unwrap_or(false)
}

/// Answer for a request without a usable identity.
///
/// Page loads are redirected to the login page, except the login page
/// itself which gets a bare 401 so it cannot loop.
pub fn unauthenticated(headers: &HeaderMap, path: &str, cookies: SetCookies) -> Response {
    if wants_json(headers) {
        let body = ErrorData::new("authentication", "Authentication required");
        return (StatusCode::UNAUTHORIZED, cookies, Json(body)).into_response();
    }
    if path == LOGIN_PATH {
        return (StatusCode::UNAUTHORIZED, cookies, "Unauthorized").into_response();
    }
    found(LOGIN_PATH, cookies)
}

/// `302 Found` to `location`.
pub fn found(location: &'static str, cookies: SetCookies) -> Response {
    (
        StatusCode::FOUND,
        cookies,
        [(header::LOCATION, HeaderValue::from_static(location))],
    )
        .into_response()
}

/// CSRF failures carry no body.
pub fn csrf_rejected() -> Response {
    StatusCode::UNAUTHORIZED.into_response()
}
