//! Upstream HTTP transport.
//!
//! # Responsibilities
//! - Shared, pooled clients for every upstream server
//! - Dial, keepalive and idle timeouts from the router config
//! - Stream request and response bodies without buffering
//!
//! # Design Decisions
//! - Certificate checks are skipped for upstreams addressed by IP (they
//!   cannot present a matching name) or when `skip_verify` is set
//! - Redirects are returned to the client untouched
//! - HTTP/2 is only negotiated for services that enable it

use axum::body::{Body, HttpBody};
use axum::http::{HeaderMap, Method, Response, StatusCode};
use std::net::IpAddr;
use std::time::Duration;

use crate::config::RouterConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::model::ServiceServer;
use crate::proxy::headers::downstream_response_headers;

/// Pooled upstream clients keyed by (certificate checks, http2).
pub struct Transport {
    verified: reqwest::Client,
    verified_h2: reqwest::Client,
    insecure: reqwest::Client,
    insecure_h2: reqwest::Client,
    skip_verify: bool,
}

impl Transport {
    pub fn new(config: &RouterConfig) -> GatewayResult<Self> {
        Ok(Self {
            verified: build_client(config, false, false)?,
            verified_h2: build_client(config, false, true)?,
            insecure: build_client(config, true, false)?,
            insecure_h2: build_client(config, true, true)?,
            skip_verify: config.skip_verify,
        })
    }

    fn client(&self, server: &ServiceServer, http2: bool) -> &reqwest::Client {
        let insecure = self.skip_verify || server.hostname.parse::<IpAddr>().is_ok();
        match (insecure, http2) {
            (false, false) => &self.verified,
            (false, true) => &self.verified_h2,
            (true, false) => &self.insecure,
            (true, true) => &self.insecure_h2,
        }
    }

    /// Send a request to `server` and stream the answer back.
    pub async fn forward(
        &self,
        server: &ServiceServer,
        http2: bool,
        method: Method,
        path_and_query: &str,
        headers: HeaderMap,
        body: Body,
    ) -> GatewayResult<Response<Body>> {
        let url = format!("{}{}", server.base_url(), path_and_query);

        let mut request = self.client(server, http2).request(method, &url).headers(headers);
        if body.size_hint().exact() != Some(0) {
            request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = request.send().await.map_err(|e| {
            tracing::warn!(upstream = %url, error = %e, "Upstream request failed");
            GatewayError::Unknown(format!("upstream request: {}", e))
        })?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        downstream_response_headers(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn build_client(config: &RouterConfig, insecure: bool, http2: bool) -> GatewayResult<reqwest::Client> {
    // The connect timeout covers the TLS handshake as well as the dial.
    let connect = Duration::from_secs(config.dial_timeout_secs + config.handshake_timeout_secs);

    let mut builder = reqwest::Client::builder()
        .connect_timeout(connect)
        .tcp_keepalive(Duration::from_secs(config.dial_keepalive_secs))
        .pool_idle_timeout(Duration::from_secs(config.idle_conn_timeout_secs))
        .pool_max_idle_per_host(config.max_idle_conns_per_host)
        .redirect(reqwest::redirect::Policy::none())
        .danger_accept_invalid_certs(insecure);
    if !http2 {
        builder = builder.http1_only();
    }

    builder
        .build()
        .map_err(|e| GatewayError::Unknown(format!("build upstream client: {}", e)))
}

/// Answer for a failed upstream exchange.
pub fn bad_gateway() -> Response<Body> {
    let mut response = Response::new(Body::from("Bad Gateway"));
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(hostname: &str) -> ServiceServer {
        ServiceServer {
            protocol: "https".into(),
            hostname: hostname.into(),
            port: 443,
        }
    }

    #[test]
    fn ip_upstreams_skip_verification() {
        let transport = Transport::new(&RouterConfig::default()).unwrap();

        assert!(std::ptr::eq(
            transport.client(&server("10.0.0.5"), false),
            &transport.insecure
        ));
        assert!(std::ptr::eq(
            transport.client(&server("app.internal"), false),
            &transport.verified
        ));
    }

    #[test]
    fn skip_verify_applies_to_names() {
        let config = RouterConfig {
            skip_verify: true,
            ..Default::default()
        };
        let transport = Transport::new(&config).unwrap();

        assert!(std::ptr::eq(
            transport.client(&server("app.internal"), true),
            &transport.insecure_h2
        ));
    }
}
