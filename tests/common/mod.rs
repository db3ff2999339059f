//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum_server::Handle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use zero_gateway::audit::MemoryAuditSink;
use zero_gateway::auth::cookie::SessionCookie;
use zero_gateway::auth::agent::Agent;
use zero_gateway::auth::signature::{
    sign, NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER, TOKEN_HEADER,
};
use zero_gateway::auth::SessionKind;
use zero_gateway::config::GatewayConfig;
use zero_gateway::context::RequestContext;
use zero_gateway::geo::StaticGeoResolver;
use zero_gateway::lifecycle::{Gateway, Shutdown};
use zero_gateway::model::{unix_now, Service, ServiceDomain, ServiceServer, User};
use zero_gateway::routing::certificates::certified_key_from_pem;
use zero_gateway::routing::self_cert;
use zero_gateway::store::MemoryStore;
use zero_gateway::GatewayResult;

pub const TOKEN: &str = "tok-ops";
pub const SECRET: &str = "secret-ops";
pub const USER_ID: &str = "u-ops";
pub const USERNAME: &str = "ops";
pub const PASSWORD: &str = "correct horse battery";

/// Start a backend that answers every request with its own request head,
/// so tests can assert on the path and headers that reached it.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut head = Vec::new();
                        let mut buf = [0u8; 1024];
                        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => head.extend_from_slice(&buf[..n]),
                            }
                        }
                        let body = String::from_utf8_lossy(&head).to_string();
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a backend that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

pub fn ops_user() -> User {
    User {
        id: USER_ID.into(),
        username: USERNAME.into(),
        token: TOKEN.into(),
        secret: SECRET.into(),
        roles: vec!["ops".into()],
        ..Default::default()
    }
}

/// Service answering on `domain`, forwarding to `backend`, open to `ops`.
pub fn service(id: &str, domain: &str, backend: SocketAddr) -> Service {
    Service {
        id: id.into(),
        name: id.into(),
        domains: vec![ServiceDomain {
            domain: domain.into(),
            host: None,
        }],
        roles: vec!["ops".into()],
        servers: vec![ServiceServer {
            protocol: "http".into(),
            hostname: backend.ip().to_string(),
            port: backend.port(),
        }],
        logout_path: Some("/logout".into()),
        ..Default::default()
    }
}

/// Plain HTTP gateway on an ephemeral port with one user and the given
/// services routed by this node.
pub fn test_config(services: Vec<Service>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.listener.protocol = "http".into();
    config.timeouts.shutdown_grace_secs = 1;
    config.events.refresh_interval_secs = 0;
    config.node.services = services.iter().map(|s| s.id.clone()).collect();
    config.users = vec![ops_user()];
    config.services = services;
    config
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub gateway_state: zero_gateway::http::AppState,
    pub shutdown: Shutdown,
    task: JoinHandle<GatewayResult<()>>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Session cookie header value for a fresh proxy session of `user_id`.
    pub async fn proxy_cookie(&self, user_id: &str) -> String {
        let ctx = RequestContext {
            request_id: "test".into(),
            client_ip: "127.0.0.1".parse().unwrap(),
            method: axum::http::Method::GET,
            path: "/".into(),
            host: "localhost".into(),
            scheme: "http",
            port: self.addr.port(),
            agent: Agent::default(),
        };
        let (session, signature) = self
            .gateway_state
            .auth
            .sessions
            .create(user_id, &ctx, SessionKind::Proxy)
            .await
            .unwrap();
        let set = SessionCookie {
            id: session.id,
            signature,
        }
        .set_cookie(SessionKind::Proxy, &self.gateway_state.auth.cookies, None);

        let value = set.0[0].to_str().unwrap();
        value.split(';').next().unwrap().to_string()
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

/// Build and start a gateway, returning once it listens.
pub async fn spawn_gateway(config: GatewayConfig) -> TestGateway {
    let (cert, key) = self_cert::generate().unwrap();
    let (fallback, _) = certified_key_from_pem(&cert, &key).unwrap();

    let store = Arc::new(MemoryStore::from_config(&config));
    let audit = Arc::new(MemoryAuditSink::new());
    let gateway = Gateway::build(
        config,
        store.clone(),
        Arc::new(StaticGeoResolver::default()),
        audit.clone(),
        Arc::new(fallback),
    )
    .await
    .unwrap();
    let gateway_state = gateway.state().clone();

    let shutdown = Shutdown::new();
    let handle = Handle::new();
    let task = tokio::spawn(gateway.run(handle.clone(), shutdown.clone(), None));
    let addr = handle.listening().await.expect("gateway failed to bind");

    TestGateway {
        addr,
        store,
        audit,
        gateway_state,
        shutdown,
        task,
    }
}

/// `name=value` part of the response's first `Set-Cookie`, ready to send
/// back as a `Cookie` header.
pub fn session_cookie(res: &reqwest::Response) -> String {
    let value = res.headers()[reqwest::header::SET_COOKIE].to_str().unwrap();
    value.split(';').next().unwrap().to_string()
}

/// Client that never follows redirects and never pools connections.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Signature headers for `method path` with a fresh nonce.
pub fn signed(method: &str, path: &str, nonce: &str) -> Vec<(&'static str, String)> {
    let timestamp = unix_now();
    let signature = sign(SECRET, TOKEN, timestamp, nonce, method, path).unwrap();
    vec![
        (TOKEN_HEADER, TOKEN.to_string()),
        (TIMESTAMP_HEADER, timestamp.to_string()),
        (NONCE_HEADER, nonce.to_string()),
        (SIGNATURE_HEADER, signature),
    ]
}
