//! Self-signed fallback certificate.
//!
//! Generated once at startup and written next to its key so restarts keep
//! serving the same certificate.

use rustls::sign::CertifiedKey;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::{GatewayError, GatewayResult};
use crate::routing::certificates::certified_key_from_pem;

/// Subject names on the generated certificate.
const SELF_CERT_NAMES: &[&str] = &["localhost", "zero-gateway"];

/// Load the persisted fallback certificate, generating and persisting a new
/// one when either file is missing.
pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> GatewayResult<Arc<CertifiedKey>> {
    if cert_path.exists() && key_path.exists() {
        let cert_pem = fs::read_to_string(cert_path)
            .map_err(|e| GatewayError::Unknown(format!("read self certificate: {}", e)))?;
        let key_pem = fs::read_to_string(key_path)
            .map_err(|e| GatewayError::Unknown(format!("read self key: {}", e)))?;

        match certified_key_from_pem(&cert_pem, &key_pem) {
            Ok((key, _)) => {
                tracing::debug!(path = ?cert_path, "Loaded self-signed certificate");
                return Ok(Arc::new(key));
            }
            Err(e) => {
                tracing::warn!(
                    path = ?cert_path,
                    error = %e,
                    "Stored self-signed certificate is unusable, regenerating"
                );
            }
        }
    }

    let (cert_pem, key_pem) = generate()?;
    persist(cert_path, &cert_pem, key_path, &key_pem)?;
    tracing::info!(path = ?cert_path, "Generated self-signed certificate");

    let (key, _) = certified_key_from_pem(&cert_pem, &key_pem)?;
    Ok(Arc::new(key))
}

/// New self-signed certificate and key, both PEM.
pub fn generate() -> GatewayResult<(String, String)> {
    let names: Vec<String> = SELF_CERT_NAMES.iter().map(|n| n.to_string()).collect();
    let rcgen::CertifiedKey { cert, signing_key } = rcgen::generate_simple_self_signed(names)
        .map_err(|e| GatewayError::Unknown(format!("generate self certificate: {}", e)))?;
    Ok((cert.pem(), signing_key.serialize_pem()))
}

fn persist(cert_path: &Path, cert_pem: &str, key_path: &Path, key_pem: &str) -> GatewayResult<()> {
    for path in [cert_path, key_path] {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| GatewayError::Unknown(format!("create {:?}: {}", parent, e)))?;
        }
    }

    fs::write(cert_path, cert_pem)
        .map_err(|e| GatewayError::Unknown(format!("write self certificate: {}", e)))?;
    fs::write(key_path, key_pem)
        .map_err(|e| GatewayError::Unknown(format!("write self key: {}", e)))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))
            .map_err(|e| GatewayError::Unknown(format!("restrict self key: {}", e)))?;
    }

    Ok(())
}
