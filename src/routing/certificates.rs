//! SNI certificate index.
//!
//! # Responsibilities
//! - Map server names to certificates (exact and wildcard)
//! - Rebuild the index from the certificate store on change
//! - Serve the self-signed fallback when nothing matches
//!
//! # Design Decisions
//! - The index is immutable once built and published with an atomic swap;
//!   handshakes never wait on a rebuild
//! - A certificate that fails to load is logged and skipped, the rest of
//!   the rebuild goes ahead
//! - Wildcard lookup strips leading labels one at a time, so
//!   `a.b.example.com` is served by `*.example.com`

use arc_swap::ArcSwap;
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use x509_parser::extensions::GeneralName;

use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;
use crate::store::CertificateStore;

#[derive(Default)]
struct CertificateIndex {
    domains: HashMap<String, Arc<CertifiedKey>>,
    /// Keyed by the suffix after `*.`.
    wildcards: HashMap<String, Arc<CertifiedKey>>,
}

/// Resolves TLS certificates by server name.
pub struct CertificateRouter {
    store: Arc<dyn CertificateStore>,
    index: ArcSwap<CertificateIndex>,
    fallback: Arc<CertifiedKey>,
}

impl std::fmt::Debug for CertificateRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.index.load();
        f.debug_struct("CertificateRouter")
            .field("domains", &index.domains.len())
            .field("wildcards", &index.wildcards.len())
            .finish()
    }
}

impl CertificateRouter {
    /// Create a router with an empty index.
    pub fn new(store: Arc<dyn CertificateStore>, fallback: Arc<CertifiedKey>) -> Self {
        Self {
            store,
            index: ArcSwap::from_pointee(CertificateIndex::default()),
            fallback,
        }
    }

    /// Certificate for `server_name`. Never fails; unknown or missing names
    /// get the fallback.
    pub fn get_certificate(&self, server_name: Option<&str>) -> Arc<CertifiedKey> {
        let Some(name) = server_name.map(normalize_name).filter(|n| !n.is_empty()) else {
            return self.fallback.clone();
        };

        let index = self.index.load();
        if let Some(key) = index.domains.get(&name) {
            return key.clone();
        }

        let mut rest = name.as_str();
        while let Some((_, parent)) = rest.split_once('.') {
            if let Some(key) = index.wildcards.get(parent) {
                return key.clone();
            }
            rest = parent;
        }

        self.fallback.clone()
    }

    /// Rebuild the index from the certificates with the given ids.
    ///
    /// Returns how many certificates were loaded. A store failure leaves
    /// the current index in place.
    pub async fn update(&self, ids: &[String]) -> GatewayResult<usize> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let records = self.store.get_by_ids(&unique).await?;

        let mut index = CertificateIndex::default();
        let mut loaded = HashSet::new();
        for record in records {
            if loaded.contains(&record.id) {
                continue;
            }

            match certified_key_from_pem(&record.certificate, &record.key) {
                Ok((key, names)) => {
                    let key = Arc::new(key);
                    for name in names {
                        match name.strip_prefix("*.") {
                            Some(suffix) => {
                                index.wildcards.insert(suffix.to_string(), key.clone());
                            }
                            None => {
                                index.domains.insert(name, key.clone());
                            }
                        }
                    }
                    loaded.insert(record.id);
                }
                Err(e) => {
                    tracing::error!(
                        certificate_id = %record.id,
                        certificate_name = %record.name,
                        error = %e,
                        "Failed to load certificate, skipping"
                    );
                }
            }
        }

        tracing::info!(
            certificates = loaded.len(),
            domains = index.domains.len(),
            wildcards = index.wildcards.len(),
            "Certificate index rebuilt"
        );
        metrics::set_certificates_loaded(loaded.len());

        self.index.store(Arc::new(index));
        Ok(loaded.len())
    }
}

impl ResolvesServerCert for CertificateRouter {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.get_certificate(client_hello.server_name()))
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Build a signing key from a PEM chain and key. Also returns the lowercased
/// subject CN and DNS SAN entries of the leaf.
pub fn certified_key_from_pem(
    cert_pem: &str,
    key_pem: &str,
) -> GatewayResult<(CertifiedKey, Vec<String>)> {
    let chain = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()
        .map_err(|e| GatewayError::Parse(format!("certificate pem: {}", e)))?;
    let leaf = chain
        .first()
        .ok_or_else(|| GatewayError::Parse("no certificate in pem".to_string()))?;
    let names = certificate_names(leaf)?;

    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| GatewayError::Parse(format!("key pem: {}", e)))?
        .ok_or_else(|| GatewayError::Parse("no private key in pem".to_string()))?;
    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key)
        .map_err(|e| GatewayError::Parse(format!("private key: {}", e)))?;

    Ok((CertifiedKey::new(chain, signing_key), names))
}

fn certificate_names(der: &CertificateDer<'_>) -> GatewayResult<Vec<String>> {
    let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
        .map_err(|e| GatewayError::Parse(format!("x509: {}", e)))?;

    let mut names = Vec::new();
    for cn in cert.subject().iter_common_name() {
        if let Ok(value) = cn.as_str() {
            names.push(normalize_name(value));
        }
    }
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                names.push(normalize_name(dns));
            }
        }
    }

    names.retain(|n| !n.is_empty());
    names.sort();
    names.dedup();
    Ok(names)
}
