//! Records the gateway consumes from its collaborators.
//!
//! Users, services and certificates are owned by the administrative side of
//! the system. The gateway only reads them (and disables users whose active
//! period ran out), so the shapes here carry just what authorization and
//! routing need.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Administrator level required for the admin console.
pub const SUPER_ADMINISTRATOR: &str = "super";

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// A user account as seen by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub username: String,

    /// Public half of the signature credential.
    pub token: String,

    /// Private half of the signature credential.
    pub secret: String,

    /// Argon2 PHC hash for interactive login. Empty disables password login.
    pub password: String,

    pub roles: Vec<String>,

    /// Empty for regular users, `"super"` for console administrators.
    pub administrator: String,

    pub disabled: bool,

    /// Unix seconds after which the account is disabled. Zero means no limit.
    pub active_until: i64,
}

impl User {
    pub fn has_signature_credential(&self) -> bool {
        !self.token.is_empty() && !self.secret.is_empty()
    }

    pub fn is_super(&self) -> bool {
        self.administrator == SUPER_ADMINISTRATOR
    }

    /// True once `active_until` has passed.
    pub fn active_expired(&self, now: i64) -> bool {
        self.active_until != 0 && now >= self.active_until
    }

    pub fn has_any_role(&self, roles: &[String]) -> bool {
        self.roles.iter().any(|r| roles.contains(r))
    }
}

/// One external domain a service answers on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceDomain {
    /// Domain name, optionally with a leading `*.` label.
    pub domain: String,

    /// Host header override sent upstream.
    pub host: Option<String>,
}

impl ServiceDomain {
    pub fn is_wildcard(&self) -> bool {
        self.domain.starts_with("*.")
    }
}

/// One upstream server behind a service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceServer {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub hostname: String,
    pub port: u16,
}

fn default_protocol() -> String {
    "http".to_string()
}

impl ServiceServer {
    /// Base URL of this server without a trailing slash.
    pub fn base_url(&self) -> String {
        if self.hostname.contains(':') {
            format!("{}://[{}]:{}", self.protocol, self.hostname, self.port)
        } else {
            format!("{}://{}:{}", self.protocol, self.hostname, self.port)
        }
    }

    pub fn is_https(&self) -> bool {
        self.protocol == "https"
    }
}

/// A named backend destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub domains: Vec<ServiceDomain>,

    /// Roles allowed through. A user needs at least one of them.
    pub roles: Vec<String>,

    pub servers: Vec<ServiceServer>,
    pub websockets: bool,
    pub http2: bool,
    pub disable_csrf_check: bool,

    /// Scope the proxy cookie to the parent domain so sibling hosts share it.
    pub share_session: bool,

    /// Source networks forwarded without authentication.
    pub whitelist_networks: Vec<IpNet>,

    /// Path globs forwarded without authentication.
    pub whitelist_paths: Vec<String>,

    /// Path glob that ends the proxy session.
    pub logout_path: Option<String>,
}

/// A TLS certificate record as stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CertificateRecord {
    pub id: String,
    pub name: String,

    /// PEM encoded chain, leaf first.
    pub certificate: String,

    /// PEM encoded private key.
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_until_zero_never_expires() {
        let user = User::default();
        assert!(!user.active_expired(i64::MAX));

        let user = User {
            active_until: 100,
            ..Default::default()
        };
        assert!(!user.active_expired(99));
        assert!(user.active_expired(100));
    }

    #[test]
    fn server_base_url_brackets_ipv6() {
        let server = ServiceServer {
            protocol: "https".into(),
            hostname: "::1".into(),
            port: 8443,
        };
        assert_eq!(server.base_url(), "https://[::1]:8443");
    }
}
