//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy dispatcher as fallback
//! - Wire up middleware (tracing, limits, request ID, panics)
//! - Serve plain HTTP or TLS with SNI certificate selection
//! - Drain in-flight requests on shutdown and close upgraded sockets

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::audit::AuditSink;
use crate::auth::AuthServices;
use crate::config::GatewayConfig;
use crate::geo::GeoResolver;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, X_REQUEST_ID};
use crate::net::SocketRegistry;
use crate::policy::PolicyEngine;
use crate::proxy::dispatcher::dispatch;
use crate::proxy::transport::Transport;
use crate::routing::ServiceRouter;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<ServiceRouter>,
    pub auth: AuthServices,
    pub policies: Arc<PolicyEngine>,
    pub audit: Arc<dyn AuditSink>,
    pub geo: Arc<dyn GeoResolver>,
    pub transport: Arc<Transport>,
    pub sockets: SocketRegistry,

    /// `https` when the listener terminates TLS.
    pub scheme: &'static str,

    /// Port clients connect to, 0 to take it from the Host header.
    pub public_port: u16,
}

impl AppState {
    /// Port the client addressed, for `X-Forwarded-Port` and origin checks.
    pub fn port_for(&self, request: &Request<Body>) -> u16 {
        if self.public_port != 0 {
            return self.public_port;
        }

        let host = request
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| request.uri().authority().map(|a| a.to_string()));
        host.as_deref()
            .and_then(host_port)
            .unwrap_or(if self.scheme == "https" { 443 } else { 80 })
    }
}

/// Explicit port of a `host[:port]` or `[v6][:port]` authority.
fn host_port(host: &str) -> Option<u16> {
    let rest = match host.strip_prefix('[') {
        Some(bracketed) => bracketed.split_once(']')?.1,
        None => host,
    };
    rest.rsplit_once(':')?.1.parse().ok()
}

type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> Response;

/// Turns handler panics into a bare 500. Sits inside the trace layer, so the
/// log line carries the request span fields.
pub fn catch_panic_layer() -> CatchPanicLayer<PanicHandler> {
    CatchPanicLayer::custom(panic_response as PanicHandler)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    tracing::error!(panic = %message, "Request handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    tls: Option<RustlsConfig>,
    sockets: SocketRegistry,
}

impl HttpServer {
    /// Create a server; `tls` is required when the listener protocol is https.
    pub fn new(config: GatewayConfig, state: AppState, tls: Option<RustlsConfig>) -> Self {
        let sockets = state.sockets.clone();
        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            tls,
            sockets,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            let request_id = request
                .headers()
                .get(X_REQUEST_ID)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let client_ip = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
                .unwrap_or_default();
            tracing::info_span!(
                "request",
                request_id = %request_id,
                client_ip = %client_ip,
                method = %request.method(),
                path = %request.uri().path(),
            )
        });

        Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(propagate_request_id_layer())
            .layer(catch_panic_layer())
            .layer(trace)
            .layer(set_request_id_layer())
            .layer(ConcurrencyLimitLayer::new(config.listener.max_connections))
    }

    /// Run until `handle` is told to shut down.
    pub async fn run(self, handle: Handle) -> std::io::Result<()> {
        let addr: SocketAddr = self.config.listener.bind_address.parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("bind address {}: {}", self.config.listener.bind_address, e),
            )
        })?;

        tracing::info!(
            address = %addr,
            protocol = %self.config.listener.protocol,
            max_connections = self.config.listener.max_connections,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        match self.tls {
            Some(tls) => {
                axum_server::bind_rustls(addr, tls)
                    .handle(handle)
                    .serve(app)
                    .await?
            }
            None => axum_server::bind(addr).handle(handle).serve(app).await?,
        }

        // Upgraded sockets are not part of the graceful drain.
        self.sockets.close_all();
        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        if !self.sockets.wait_closed(grace).await {
            tracing::warn!(
                open = self.sockets.active_count(),
                "Websockets still open after shutdown grace"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}
