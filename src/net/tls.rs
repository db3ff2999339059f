//! TLS termination.
//!
//! Certificates are chosen per handshake by the certificate router, so the
//! server config is built once and never reloaded.

use axum_server::tls_rustls::RustlsConfig;
use rustls::ServerConfig;
use std::sync::Arc;

use crate::error::{GatewayError, GatewayResult};
use crate::routing::CertificateRouter;

/// Server TLS config resolving certificates through `router`.
pub fn server_config(router: Arc<CertificateRouter>) -> GatewayResult<ServerConfig> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| GatewayError::Unknown(format!("tls protocol versions: {}", e)))?
        .with_no_client_auth()
        .with_cert_resolver(router);
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// `axum-server` acceptor config for the listener.
pub fn rustls_config(router: Arc<CertificateRouter>) -> GatewayResult<RustlsConfig> {
    Ok(RustlsConfig::from_config(Arc::new(server_config(router)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::certificates::certified_key_from_pem;
    use crate::routing::self_cert;
    use crate::store::MemoryStore;

    #[test]
    fn negotiates_h2_and_http1() {
        let (cert, key) = self_cert::generate().unwrap();
        let (fallback, _) = certified_key_from_pem(&cert, &key).unwrap();
        let router = Arc::new(CertificateRouter::new(
            Arc::new(MemoryStore::new()),
            Arc::new(fallback),
        ));

        let config = server_config(router).unwrap();
        assert_eq!(config.alpn_protocols[0], b"h2".to_vec());
        assert_eq!(config.alpn_protocols[1], b"http/1.1".to_vec());
    }
}
