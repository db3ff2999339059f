//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::geo::GeoEntry;
use crate::model::{CertificateRecord, Service, User};
use crate::policy::Policy;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, protocol).
    pub listener: ListenerConfig,

    /// Self-signed fallback certificate storage.
    pub tls: TlsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Upstream transport settings.
    pub router: RouterConfig,

    /// Signature window and session lifetimes.
    pub auth: AuthConfig,

    /// Cookie encryption keys.
    pub cookies: CookieConfig,

    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Scheduled task intervals.
    pub events: EventsConfig,

    /// Certificates and services attached to this node.
    pub node: NodeConfig,

    pub users: Vec<User>,
    pub services: Vec<Service>,
    pub policies: Vec<Policy>,
    pub certificates: Vec<CertificateRecord>,

    /// Static geo-IP table.
    pub geo: Vec<GeoEntry>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:443").
    pub bind_address: String,

    /// `https` terminates TLS with the certificate router, `http` does not.
    pub protocol: String,

    /// Port clients connect to, used for forwarding headers and origin
    /// checks. Zero means the bound port.
    pub public_port: u16,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:443".to_string(),
            protocol: "https".to_string(),
            public_port: 0,
            max_connections: 10_000,
        }
    }
}

impl ListenerConfig {
    pub fn is_https(&self) -> bool {
        self.protocol == "https"
    }
}

/// Self-signed fallback certificate location.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to the fallback certificate (PEM). Generated if missing.
    pub self_cert_path: String,

    /// Path to the fallback private key (PEM). Generated if missing.
    pub self_key_path: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            self_cert_path: "/var/lib/zero-gateway/self.crt".to_string(),
            self_key_path: "/var/lib/zero-gateway/self.key".to_string(),
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Grace period for in-flight requests on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 90,
            shutdown_grace_secs: 10,
        }
    }
}

/// Upstream transport settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterConfig {
    pub dial_timeout_secs: u64,
    pub dial_keepalive_secs: u64,
    pub handshake_timeout_secs: u64,
    pub idle_conn_timeout_secs: u64,
    pub max_idle_conns_per_host: usize,

    /// Accept any upstream certificate.
    pub skip_verify: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            dial_timeout_secs: 60,
            dial_keepalive_secs: 60,
            handshake_timeout_secs: 10,
            idle_conn_timeout_secs: 90,
            max_idle_conns_per_host: 100,
            skip_verify: false,
        }
    }
}

/// Lifetime limits for one session kind. Zero disables a limit.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionLimits {
    /// Inactivity timeout in seconds.
    pub expire_secs: u64,

    /// Absolute lifetime in seconds.
    pub max_duration_secs: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            expire_secs: 86_400,
            max_duration_secs: 259_200,
        }
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Allowed clock difference for signed requests, in seconds.
    pub window_secs: u64,

    /// How long consumed nonces are kept.
    pub nonce_ttl_secs: u64,

    pub admin: SessionLimits,
    pub user: SessionLimits,
    pub proxy: SessionLimits,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            nonce_ttl_secs: 3_600,
            admin: SessionLimits::default(),
            user: SessionLimits::default(),
            proxy: SessionLimits::default(),
        }
    }
}

/// Base64 encoded 64-byte cookie keys. Empty keys are generated at startup,
/// which invalidates existing cookies on restart.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    pub admin_key: String,
    pub user_key: String,
    pub proxy_key: String,
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// `text` or `json`.
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Scheduled task intervals.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Full cache rebuild interval. Zero disables it.
    pub refresh_interval_secs: u64,

    /// Nonce purge interval.
    pub housekeeping_interval_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 300,
            housekeeping_interval_secs: 60,
        }
    }
}

/// What this node serves.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Certificate ids loaded into the SNI index.
    pub certificates: Vec<String>,

    /// Service ids routed by this node.
    pub services: Vec<String>,
}
