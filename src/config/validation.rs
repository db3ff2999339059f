//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (node references existing services and certificates)
//! - Validate service domains, servers and whitelist globs
//! - Canonicalize networks once the config is accepted
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: &GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// A domain may carry a wildcard only as its whole first label.
pub fn valid_domain(domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    let rest = domain.strip_prefix("*.").unwrap_or(domain);
    !rest.is_empty()
        && !rest.contains('*')
        && rest.split('.').all(|label| {
            !label.is_empty()
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("invalid socket address '{}'", config.listener.bind_address),
        ));
    }
    if !matches!(config.listener.protocol.as_str(), "http" | "https") {
        errors.push(ValidationError::new(
            "listener.protocol",
            "must be 'http' or 'https'",
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be > 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }
    if config.auth.window_secs == 0 {
        errors.push(ValidationError::new("auth.window_secs", "must be > 0"));
    }
    if config.auth.nonce_ttl_secs < config.auth.window_secs.saturating_mul(2) {
        errors.push(ValidationError::new(
            "auth.nonce_ttl_secs",
            "must be at least twice auth.window_secs",
        ));
    }
    if config.events.housekeeping_interval_secs == 0 {
        errors.push(ValidationError::new(
            "events.housekeeping_interval_secs",
            "must be > 0",
        ));
    }

    let mut service_ids = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        let at = format!("services[{}]", i);
        if service.id.is_empty() {
            errors.push(ValidationError::new(format!("{}.id", at), "must not be empty"));
        } else if !service_ids.insert(service.id.as_str()) {
            errors.push(ValidationError::new(
                format!("{}.id", at),
                format!("duplicate service id '{}'", service.id),
            ));
        }

        for (j, domain) in service.domains.iter().enumerate() {
            if !valid_domain(&domain.domain) {
                errors.push(ValidationError::new(
                    format!("{}.domains[{}]", at, j),
                    format!(
                        "invalid domain '{}', a wildcard may only be the first label",
                        domain.domain
                    ),
                ));
            }
        }

        for (j, server) in service.servers.iter().enumerate() {
            let field = format!("{}.servers[{}]", at, j);
            if !matches!(server.protocol.as_str(), "http" | "https") {
                errors.push(ValidationError::new(
                    field.clone(),
                    format!("unsupported protocol '{}'", server.protocol),
                ));
            }
            if server.hostname.is_empty() {
                errors.push(ValidationError::new(field.clone(), "hostname must not be empty"));
            }
            if server.port == 0 {
                errors.push(ValidationError::new(field, "port must be > 0"));
            }
        }

        for (j, path) in service.whitelist_paths.iter().chain(service.logout_path.iter()).enumerate() {
            if let Err(e) = glob::Pattern::new(path) {
                errors.push(ValidationError::new(
                    format!("{}.paths[{}]", at, j),
                    format!("invalid glob '{}': {}", path, e),
                ));
            }
        }
    }

    for (i, policy) in config.policies.iter().enumerate() {
        if policy.services.is_empty() && policy.roles.is_empty() {
            errors.push(ValidationError::new(
                format!("policies[{}]", i),
                "must bind to at least one service or role",
            ));
        }
    }

    let cert_ids: HashSet<&str> = config.certificates.iter().map(|c| c.id.as_str()).collect();
    for id in &config.node.certificates {
        if !cert_ids.contains(id.as_str()) {
            errors.push(ValidationError::new(
                "node.certificates",
                format!("unknown certificate '{}'", id),
            ));
        }
    }
    for id in &config.node.services {
        if !service_ids.contains(id.as_str()) {
            errors.push(ValidationError::new(
                "node.services",
                format!("unknown service '{}'", id),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Canonicalize whitelist networks and lowercase domains.
pub fn normalize_config(config: &mut GatewayConfig) {
    for service in &mut config.services {
        for net in &mut service.whitelist_networks {
            *net = net.trunc();
        }
        for domain in &mut service.domains {
            domain.domain = domain.domain.trim_end_matches('.').to_ascii_lowercase();
        }
    }
    for policy in &mut config.policies {
        policy.normalize();
    }
}
