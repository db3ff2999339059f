//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from a validated configuration
//! - Load the node's services and certificates before accepting traffic
//! - Start background tasks (event subscriber, refresh, housekeeping,
//!   config reload)
//! - Bind the listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)
//! - A reloaded config reseeds the store and forces a full refresh;
//!   listener, TLS and key settings need a restart

use arc_swap::ArcSwap;
use axum_server::Handle;
use rustls::sign::CertifiedKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::audit::AuditSink;
use crate::auth::cookie::CookieKeys;
use crate::auth::nonce::NonceGuard;
use crate::auth::session::{SessionLifetimes, SessionManager};
use crate::auth::{AuthServices, SignatureAuthenticator};
use crate::config::{GatewayConfig, NodeConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::events::{next_event, spawn_housekeeping, spawn_refresh, ChangeEvent, EventBus};
use crate::geo::GeoResolver;
use crate::http::server::{AppState, HttpServer};
use crate::lifecycle::Shutdown;
use crate::net::tls::rustls_config;
use crate::net::SocketRegistry;
use crate::policy::PolicyEngine;
use crate::proxy::transport::Transport;
use crate::routing::{CertificateRouter, ServiceRouter};
use crate::store::MemoryStore;

/// A fully wired gateway, ready to serve.
pub struct Gateway {
    config: GatewayConfig,
    store: Arc<MemoryStore>,
    events: EventBus,
    node: Arc<ArcSwap<NodeConfig>>,
    certificates: Arc<CertificateRouter>,
    nonces: NonceGuard,
    state: AppState,
}

impl Gateway {
    /// Build all subsystems. `fallback` is served when no stored
    /// certificate matches the SNI name.
    pub async fn build(
        config: GatewayConfig,
        store: Arc<MemoryStore>,
        geo: Arc<dyn GeoResolver>,
        audit: Arc<dyn AuditSink>,
        fallback: Arc<CertifiedKey>,
    ) -> GatewayResult<Self> {
        let events = EventBus::default();

        let keys = Arc::new(CookieKeys::from_config(&config.cookies)?);
        let nonces = NonceGuard::new(store.clone());
        let auth = AuthServices {
            users: store.clone(),
            signatures: SignatureAuthenticator::new(
                store.clone(),
                nonces.clone(),
                config.auth.window_secs,
            ),
            sessions: SessionManager::new(
                store.clone(),
                keys.clone(),
                SessionLifetimes::from_config(&config.auth),
            ),
            cookies: keys,
        };

        let services = Arc::new(ServiceRouter::new(store.clone()));
        services.reload(&config.node.services).await?;

        let certificates = Arc::new(CertificateRouter::new(store.clone(), fallback));
        certificates.update(&config.node.certificates).await?;

        let policies = Arc::new(PolicyEngine::new(store.clone(), store.clone(), events.clone()));
        let transport = Arc::new(Transport::new(&config.router)?);

        let state = AppState {
            services,
            auth,
            policies,
            audit,
            geo,
            transport,
            sockets: SocketRegistry::new(),
            scheme: if config.listener.is_https() { "https" } else { "http" },
            public_port: config.listener.public_port,
        };

        tracing::info!(
            services = config.node.services.len(),
            certificates = config.node.certificates.len(),
            scheme = state.scheme,
            "Gateway initialized"
        );

        Ok(Self {
            node: Arc::new(ArcSwap::from_pointee(config.node.clone())),
            config,
            store,
            events,
            certificates,
            nonces,
            state,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Start background tasks and serve until `shutdown` fires.
    ///
    /// `updates` carries validated configs from the file watcher.
    pub async fn run(
        self,
        handle: Handle,
        shutdown: Shutdown,
        updates: Option<mpsc::UnboundedReceiver<GatewayConfig>>,
    ) -> GatewayResult<()> {
        let mut tasks = vec![spawn_subscriber(
            self.events.subscribe(),
            self.node.clone(),
            self.certificates.clone(),
            self.state.clone(),
            shutdown.subscribe(),
        )];

        if self.config.events.refresh_interval_secs > 0 {
            tasks.push(spawn_refresh(
                self.events.clone(),
                Duration::from_secs(self.config.events.refresh_interval_secs),
                shutdown.subscribe(),
            ));
        }
        tasks.push(spawn_housekeeping(
            self.nonces.clone(),
            Duration::from_secs(self.config.auth.nonce_ttl_secs),
            Duration::from_secs(self.config.events.housekeeping_interval_secs),
            shutdown.subscribe(),
        ));
        if let Some(updates) = updates {
            tasks.push(spawn_reloader(
                updates,
                self.store.clone(),
                self.node.clone(),
                self.events.clone(),
                shutdown.subscribe(),
            ));
        }

        let tls = if self.config.listener.is_https() {
            Some(rustls_config(self.certificates.clone())?)
        } else {
            None
        };

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        let server_handle = handle.clone();
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = stop.recv().await;
            tracing::info!(grace_secs = grace.as_secs(), "Draining connections");
            server_handle.graceful_shutdown(Some(grace));
        });

        let result = HttpServer::new(self.config, self.state, tls)
            .run(handle)
            .await
            .map_err(|e| GatewayError::Unknown(format!("http server: {}", e)));

        // The server can also stop on its own (bind failure).
        shutdown.trigger();
        for task in tasks {
            let _ = task.await;
        }
        result
    }
}

/// Rebuild caches as change events arrive.
fn spawn_subscriber(
    mut events: broadcast::Receiver<ChangeEvent>,
    node: Arc<ArcSwap<NodeConfig>>,
    certificates: Arc<CertificateRouter>,
    state: AppState,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = next_event(&mut events) => match event {
                    Some(event) => apply(event, &node.load_full(), &certificates, &state).await,
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Event subscriber stopped");
    })
}

async fn apply(
    event: ChangeEvent,
    node: &NodeConfig,
    certificates: &CertificateRouter,
    state: &AppState,
) {
    let refresh = event == ChangeEvent::Refresh;

    if refresh || event == ChangeEvent::Certificates {
        if let Err(e) = certificates.update(&node.certificates).await {
            tracing::error!(event = event.as_str(), error = %e, "Certificate update failed");
        }
    }
    if refresh || event == ChangeEvent::Services {
        if let Err(e) = state.services.reload(&node.services).await {
            tracing::error!(event = event.as_str(), error = %e, "Service reload failed");
        }
    }
    if refresh || event == ChangeEvent::Policies {
        state.policies.invalidate();
    }
}

/// Apply configs from the file watcher.
fn spawn_reloader(
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    store: Arc<MemoryStore>,
    node: Arc<ArcSwap<NodeConfig>>,
    events: EventBus,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                update = updates.recv() => {
                    let Some(config) = update else { break };
                    store.reseed(&config);
                    node.store(Arc::new(config.node.clone()));
                    events.publish(ChangeEvent::Refresh);
                    tracing::info!("Configuration reloaded");
                }
                _ = shutdown.recv() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::geo::StaticGeoResolver;
    use crate::model::{Service, ServiceDomain, ServiceServer};
    use crate::routing::self_cert;

    fn service(id: &str, domain: &str) -> Service {
        Service {
            id: id.into(),
            name: id.into(),
            domains: vec![ServiceDomain {
                domain: domain.into(),
                host: None,
            }],
            servers: vec![ServiceServer {
                protocol: "http".into(),
                hostname: "127.0.0.1".into(),
                port: 8080,
            }],
            ..Default::default()
        }
    }

    async fn gateway(config: GatewayConfig) -> (Gateway, Arc<MemoryStore>) {
        let (cert, key) = self_cert::generate().unwrap();
        let (fallback, _) =
            crate::routing::certificates::certified_key_from_pem(&cert, &key).unwrap();
        let store = Arc::new(MemoryStore::from_config(&config));
        let gateway = Gateway::build(
            config,
            store.clone(),
            Arc::new(StaticGeoResolver::default()),
            Arc::new(MemoryAuditSink::new()),
            Arc::new(fallback),
        )
        .await
        .unwrap();
        (gateway, store)
    }

    #[tokio::test]
    async fn build_loads_node_services() {
        let mut config = GatewayConfig::default();
        config.services = vec![service("a", "a.example.com"), service("b", "b.example.com")];
        config.node.services = vec!["a".into()];

        let (gateway, _) = gateway(config).await;
        assert!(gateway.state().services.match_host("a.example.com").is_some());
        assert!(gateway.state().services.match_host("b.example.com").is_none());
        assert_eq!(gateway.state().scheme, "https");
    }

    #[tokio::test]
    async fn reload_reseeds_and_refreshes() {
        let mut config = GatewayConfig::default();
        config.services = vec![service("a", "a.example.com")];
        config.node.services = vec!["a".into()];
        let (gateway, store) = gateway(config.clone()).await;

        let shutdown = Shutdown::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriber = spawn_subscriber(
            gateway.events.subscribe(),
            gateway.node.clone(),
            gateway.certificates.clone(),
            gateway.state.clone(),
            shutdown.subscribe(),
        );
        let reloader = spawn_reloader(
            rx,
            store,
            gateway.node.clone(),
            gateway.events.clone(),
            shutdown.subscribe(),
        );

        config.services = vec![service("c", "c.example.com")];
        config.node.services = vec!["c".into()];
        tx.send(config).unwrap();

        let mut matched = false;
        for _ in 0..100 {
            if gateway.state().services.match_host("c.example.com").is_some() {
                matched = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matched);
        assert!(gateway.state().services.match_host("a.example.com").is_none());

        shutdown.trigger();
        subscriber.await.unwrap();
        reloader.await.unwrap();
    }
}
