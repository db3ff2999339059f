//! Typed request-scoped context threaded through authorization.

use axum::http::{header, HeaderMap, Method};
use std::net::IpAddr;

use crate::auth::agent::Agent;

/// Everything about the inbound request the auth and policy layers read.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: IpAddr,
    pub method: Method,
    pub path: String,

    /// Lowercased host without port.
    pub host: String,

    /// `https` when the listener terminates TLS.
    pub scheme: &'static str,

    /// Public port of the listener.
    pub port: u16,

    pub agent: Agent,
}

impl RequestContext {
    /// `scheme://host[:port]`, omitting default ports.
    pub fn origin(&self) -> String {
        let default_port = matches!((self.scheme, self.port), ("https", 443) | ("http", 80));
        if default_port || self.port == 0 {
            format!("{}://{}", self.scheme, self.host)
        } else {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

/// Host header without port, lowercased, trailing dot removed.
pub fn request_host(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::HOST)?.to_str().ok()?;
    let host = strip_port(raw).trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// Remove a `:port` suffix, keeping bracketed IPv6 literals intact.
pub fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &rest[..end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

pub fn user_agent(headers: &HeaderMap) -> &str {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}
