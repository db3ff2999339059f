//! Host matching.
//!
//! # Responsibilities
//! - Match the stripped Host header against service domains
//! - Exact domains first, then wildcard globs
//! - Work out the cookie domain for services that share sessions
//!
//! # Design Decisions
//! - Host matching is case-insensitive; callers pass a lowercased host
//! - Wildcard patterns are tried longest first so the most specific wins
//! - Services without upstream servers are left out and answer 404

use glob::Pattern;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{Service, ServiceDomain};

/// A matched service domain.
#[derive(Debug, Clone)]
pub struct Host {
    pub service: Arc<Service>,
    pub domain: ServiceDomain,
    pub wildcard: bool,
}

impl Host {
    /// Cookie domain for the proxy session when the service shares it
    /// across sibling hosts: the matched domain minus its first label.
    pub fn shared_domain(&self) -> Option<String> {
        if !self.service.share_session {
            return None;
        }
        self.domain
            .domain
            .split_once('.')
            .map(|(_, parent)| parent)
            .filter(|parent| parent.contains('.'))
            .map(str::to_string)
    }
}

/// Immutable host lookup table.
#[derive(Debug, Default)]
pub struct HostTable {
    exact: HashMap<String, Arc<Host>>,
    wildcards: Vec<(Pattern, Arc<Host>)>,
}

impl HostTable {
    pub fn build(services: Vec<Service>) -> Self {
        let mut table = HostTable::default();

        for service in services {
            if service.servers.is_empty() {
                tracing::warn!(
                    service_id = %service.id,
                    service = %service.name,
                    "Service has no servers, not routing it"
                );
                continue;
            }

            let service = Arc::new(service);
            for domain in &service.domains {
                let name = domain.domain.trim_end_matches('.').to_ascii_lowercase();
                if domain.is_wildcard() {
                    match Pattern::new(&name) {
                        Ok(pattern) => table.wildcards.push((
                            pattern,
                            Arc::new(Host {
                                service: service.clone(),
                                domain: domain.clone(),
                                wildcard: true,
                            }),
                        )),
                        Err(e) => tracing::error!(
                            service_id = %service.id,
                            domain = %name,
                            error = %e,
                            "Invalid wildcard domain"
                        ),
                    }
                } else {
                    table.exact.insert(
                        name,
                        Arc::new(Host {
                            service: service.clone(),
                            domain: domain.clone(),
                            wildcard: false,
                        }),
                    );
                }
            }
        }

        table
            .wildcards
            .sort_by(|(a, _), (b, _)| b.as_str().len().cmp(&a.as_str().len()));
        table
    }

    /// Find the service answering on `host`.
    pub fn lookup(&self, host: &str) -> Option<Arc<Host>> {
        if let Some(found) = self.exact.get(host) {
            return Some(found.clone());
        }
        self.wildcards
            .iter()
            .find(|(pattern, _)| pattern.matches(host))
            .map(|(_, found)| found.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.wildcards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceServer;

    fn service(id: &str, domains: &[&str]) -> Service {
        Service {
            id: id.into(),
            name: id.into(),
            domains: domains
                .iter()
                .map(|d| ServiceDomain {
                    domain: d.to_string(),
                    host: None,
                })
                .collect(),
            servers: vec![ServiceServer {
                protocol: "http".into(),
                hostname: "10.0.0.5".into(),
                port: 8080,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn exact_then_wildcard() {
        let table = HostTable::build(vec![
            service("wild", &["*.corp.example.com"]),
            service("exact", &["app.corp.example.com"]),
        ]);

        assert_eq!(table.lookup("app.corp.example.com").unwrap().service.id, "exact");

        let host = table.lookup("wiki.corp.example.com").unwrap();
        assert_eq!(host.service.id, "wild");
        assert!(host.wildcard);

        assert!(table.lookup("corp.example.com").is_none());
        assert!(table.lookup("other.example.com").is_none());
    }

    #[test]
    fn most_specific_wildcard_wins() {
        let table = HostTable::build(vec![
            service("broad", &["*.example.com"]),
            service("narrow", &["*.corp.example.com"]),
        ]);

        assert_eq!(table.lookup("a.corp.example.com").unwrap().service.id, "narrow");
        assert_eq!(table.lookup("a.example.com").unwrap().service.id, "broad");
    }

    #[test]
    fn services_without_servers_are_skipped() {
        let mut empty = service("empty", &["empty.example.com"]);
        empty.servers.clear();
        let table = HostTable::build(vec![empty]);

        assert!(table.is_empty());
        assert!(table.lookup("empty.example.com").is_none());
    }

    #[test]
    fn shared_domain_is_parent_of_match() {
        let mut shared = service("shared", &["*.corp.example.com", "example.com"]);
        shared.share_session = true;
        let table = HostTable::build(vec![shared, service("plain", &["plain.example.com"])]);

        let wild = table.lookup("app.corp.example.com").unwrap();
        assert_eq!(wild.shared_domain().as_deref(), Some("corp.example.com"));

        // No cookie for a bare top-level domain.
        assert_eq!(table.lookup("example.com").unwrap().shared_domain(), None);
        assert_eq!(table.lookup("plain.example.com").unwrap().shared_domain(), None);
    }
}
