//! Header rewriting between client and upstream.

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::net::IpAddr;

use crate::auth::cookie::PROXY_COOKIE;
use crate::auth::signature::HEADER_PREFIX;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const X_FORWARDED_PORT: &str = "x-forwarded-port";

/// Connection-scoped headers that never cross the proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Where the client reached the gateway.
#[derive(Debug, Clone)]
pub struct Forwarded<'a> {
    pub client_ip: IpAddr,
    pub proto: &'a str,
    pub port: u16,
    /// Replaces the `Host` header when set.
    pub host_override: Option<&'a str>,
}

/// Headers to send upstream for a client request.
pub fn upstream_request_headers(incoming: &HeaderMap, forwarded: &Forwarded<'_>) -> HeaderMap {
    let mut headers = incoming.clone();
    remove_hop_by_hop(&mut headers);
    strip_gateway_credentials(&mut headers);

    headers.insert(
        HeaderName::from_static(X_FORWARDED_FOR),
        header_value(&forwarded.client_ip.to_string()),
    );
    headers.insert(
        HeaderName::from_static(X_FORWARDED_PROTO),
        header_value(forwarded.proto),
    );
    headers.insert(
        HeaderName::from_static(X_FORWARDED_PORT),
        header_value(&forwarded.port.to_string()),
    );

    if let Some(host) = forwarded.host_override.filter(|h| !h.is_empty()) {
        if let Ok(value) = HeaderValue::from_str(host) {
            headers.insert(header::HOST, value);
        }
    }

    headers
}

/// Drop hop-by-hop headers from an upstream response.
pub fn downstream_response_headers(headers: &mut HeaderMap) {
    remove_hop_by_hop(headers);
}

/// Remove signature headers and the proxy session cookie so upstreams
/// never see gateway credentials.
pub fn strip_gateway_credentials(headers: &mut HeaderMap) {
    let signature_headers: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with(HEADER_PREFIX))
        .cloned()
        .collect();
    for name in signature_headers {
        headers.remove(name);
    }

    let cookies: Vec<String> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            pair.split_once('=')
                .map(|(name, _)| name.trim() != PROXY_COOKIE)
                .unwrap_or(true)
        })
        .map(str::to_string)
        .collect();

    headers.remove(header::COOKIE);
    if !cookies.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&cookies.join("; ")) {
            headers.insert(header::COOKIE, value);
        }
    }
}

/// Speculative loads that must not trigger a logout.
pub fn is_prefetch(headers: &HeaderMap) -> bool {
    let is = |name: &str, expected: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case(expected))
            .unwrap_or(false)
    };

    is("purpose", "prefetch")
        || is("sec-purpose", "prefetch")
        || is("x-purpose", "prefetch")
        || is("x-purpose", "preview")
        || is("x-moz", "prefetch")
}

/// True when the client asks to switch to the websocket protocol.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

fn remove_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in Connection are hop-by-hop too.
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarded() -> Forwarded<'static> {
        Forwarded {
            client_ip: "203.0.113.9".parse().unwrap(),
            proto: "https",
            port: 443,
            host_override: None,
        }
    }

    #[test]
    fn sets_forwarding_headers() {
        let mut incoming = HeaderMap::new();
        incoming.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        incoming.insert(header::HOST, HeaderValue::from_static("app.example.com"));

        let out = upstream_request_headers(&incoming, &forwarded());

        assert_eq!(out["x-forwarded-for"], "203.0.113.9");
        assert_eq!(out["x-forwarded-proto"], "https");
        assert_eq!(out["x-forwarded-port"], "443");
        assert_eq!(out[header::HOST], "app.example.com");
    }

    #[test]
    fn host_override_replaces_host() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::HOST, HeaderValue::from_static("app.example.com"));
        let mut fwd = forwarded();
        fwd.host_override = Some("internal.local");

        let out = upstream_request_headers(&incoming, &fwd);
        assert_eq!(out[header::HOST], "internal.local");
    }

    #[test]
    fn strips_credentials_and_proxy_cookie() {
        let mut incoming = HeaderMap::new();
        incoming.insert("pritunl-zero-token", HeaderValue::from_static("tok"));
        incoming.insert("pritunl-zero-signature", HeaderValue::from_static("sig"));
        incoming.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; pritunl-zero=secret; lang=en"),
        );

        let out = upstream_request_headers(&incoming, &forwarded());

        assert!(out.get("pritunl-zero-token").is_none());
        assert!(out.get("pritunl-zero-signature").is_none());
        assert_eq!(out[header::COOKIE], "theme=dark; lang=en");
    }

    #[test]
    fn removes_cookie_header_when_only_proxy_cookie() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::COOKIE, HeaderValue::from_static("pritunl-zero=secret"));

        let out = upstream_request_headers(&incoming, &forwarded());
        assert!(out.get(header::COOKIE).is_none());
    }

    #[test]
    fn removes_hop_by_hop_and_listed_headers() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-secret"));
        incoming.insert("x-secret", HeaderValue::from_static("1"));
        incoming.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        incoming.insert("x-kept", HeaderValue::from_static("1"));

        let out = upstream_request_headers(&incoming, &forwarded());

        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get("x-secret").is_none());
        assert!(out.get(header::TRANSFER_ENCODING).is_none());
        assert_eq!(out["x-kept"], "1");
    }

    #[test]
    fn detects_prefetch() {
        let mut headers = HeaderMap::new();
        assert!(!is_prefetch(&headers));

        headers.insert("sec-purpose", HeaderValue::from_static("prefetch"));
        assert!(is_prefetch(&headers));

        let mut preview = HeaderMap::new();
        preview.insert("x-purpose", HeaderValue::from_static("preview"));
        assert!(is_prefetch(&preview));
    }
}
