//! TLS support for the peer listener and the sibling dialer

use crate::{LinkError, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pemfile::{certs, read_all};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const CERT_FILE: &str = "tls.crt";
pub const KEY_FILE: &str = "tls.key";
pub const CA_FILE: &str = "ca.crt";

/// TLS configuration for the peer listener
#[derive(Clone)]
pub struct TlsServerConfig {
    pub config: Arc<ServerConfig>,
}

impl TlsServerConfig {
    /// Create a TLS configuration from PEM-encoded certificate and private key
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        debug!("Creating TLS configuration from PEM data");

        let certs_vec = load_certificates(cert_pem)?;
        debug!("Loaded {} certificate(s)", certs_vec.len());

        let mut key_reader = BufReader::new(key_pem);
        let keys: Vec<_> = read_all(&mut key_reader)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| LinkError::Tls(format!("Failed to parse private key: {}", e)))?;

        let private_key = keys
            .into_iter()
            .find_map(|item| match item {
                rustls_pemfile::Item::Pkcs8Key(k) => Some(PrivateKeyDer::Pkcs8(k)),
                rustls_pemfile::Item::Pkcs1Key(k) => Some(PrivateKeyDer::Pkcs1(k)),
                rustls_pemfile::Item::Sec1Key(k) => Some(PrivateKeyDer::Sec1(k)),
                _ => None,
            })
            .ok_or_else(|| LinkError::Tls("No private key found in PEM data".to_string()))?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs_vec, private_key)
            .map_err(|e| LinkError::Tls(format!("Failed to create TLS config: {}", e)))?;

        info!("TLS configuration created successfully");
        Ok(Self {
            config: Arc::new(config),
        })
    }
}

/// Client configuration trusting the given CA bundle
pub fn client_config(ca_pem: &[u8]) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(ca_pem)? {
        roots
            .add(cert)
            .map_err(|e| LinkError::Tls(format!("Failed to add CA certificate to root store: {}", e)))?;
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

fn load_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem);
    let certs_vec = certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LinkError::Tls(format!("Failed to parse certificates: {}", e)))?;
    if certs_vec.is_empty() {
        return Err(LinkError::Tls("No certificates found in PEM data".to_string()));
    }
    Ok(certs_vec)
}

/// Certificate and key material read from a certificate directory
pub struct CertificateMaterial {
    /// PEM-encoded certificate chain
    pub cert: Vec<u8>,
    /// PEM-encoded private key
    pub key: Vec<u8>,
    /// PEM-encoded CA bundle, if present
    pub ca: Option<Vec<u8>>,
}

impl CertificateMaterial {
    pub fn new(cert: Vec<u8>, key: Vec<u8>) -> Self {
        Self { cert, key, ca: None }
    }

    /// Read `tls.crt`, `tls.key` and the optional `ca.crt` from `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let read = |name: &str| -> Result<Vec<u8>> {
            let path: PathBuf = dir.join(name);
            std::fs::read(&path)
                .map_err(|e| LinkError::Tls(format!("Failed to read {}: {}", path.display(), e)))
        };
        let mut material = Self::new(read(CERT_FILE)?, read(KEY_FILE)?);
        material.ca = std::fs::read(dir.join(CA_FILE)).ok();
        Ok(material)
    }

    pub fn to_tls_config(&self) -> Result<TlsServerConfig> {
        TlsServerConfig::from_pem(&self.cert, &self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_certificate_is_rejected() {
        let material = CertificateMaterial::new(b"not a cert".to_vec(), b"not a key".to_vec());
        match material.to_tls_config() {
            Err(LinkError::Tls(message)) => assert!(message.contains("No certificates")),
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("garbage accepted"),
        }
    }

    #[test]
    fn test_missing_directory_fails_to_load() {
        let result = CertificateMaterial::load(Path::new("/nonexistent/certs"));
        assert!(matches!(result, Err(LinkError::Tls(_))));
    }

    #[test]
    fn test_empty_ca_bundle_is_rejected() {
        assert!(client_config(b"").is_err());
    }
}
