use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::{certs, private_key};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::verifier::{AcceptAnyServerCert, SelfSignedAwareVerifier};
use crate::TlsError;

/// Crypto provider used for every config built by this crate
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Load certificates from a PEM file
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        TlsError::Certificate(format!("Failed to open cert file {:?}: {}", path, e))
    })?;
    load_certs_from_pem(&content)
}

/// Load a private key from a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        TlsError::Certificate(format!("Failed to open key file {:?}: {}", path, e))
    })?;
    load_private_key_from_pem(&content)
}

/// Load certificates from PEM content string
pub fn load_certs_from_pem(pem_content: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut cursor = Cursor::new(pem_content.as_bytes());
    certs(&mut cursor)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(format!("Failed to parse certificates: {}", e)))
}

/// Load a private key from PEM content string
pub fn load_private_key_from_pem(pem_content: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut cursor = Cursor::new(pem_content.as_bytes());
    private_key(&mut cursor)
        .map_err(|e| TlsError::Certificate(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| TlsError::Certificate("No private key found in PEM content".to_string()))
}

fn add_to_store(
    store: &mut RootCertStore,
    ca_certs: Vec<CertificateDer<'static>>,
) -> Result<(), TlsError> {
    for cert in ca_certs {
        store.add(cert).map_err(|e| {
            TlsError::Certificate(format!("Failed to add CA certificate: {}", e))
        })?;
    }
    Ok(())
}

/// Load a root certificate store from a CA bundle file
pub fn load_root_store(ca_path: &Path) -> Result<RootCertStore, TlsError> {
    let ca_certs = load_certs(ca_path)?;
    if ca_certs.is_empty() {
        return Err(TlsError::Certificate(format!(
            "No certificates found in CA file {:?}",
            ca_path
        )));
    }
    let mut root_store = RootCertStore::empty();
    add_to_store(&mut root_store, ca_certs)?;
    Ok(root_store)
}

/// Load a root certificate store from a directory of CA certificates
///
/// Every regular file is read as PEM; files without a certificate block
/// (hash links to directories, READMEs, keys) are skipped.
pub fn load_root_store_dir(ca_dir: &Path) -> Result<RootCertStore, TlsError> {
    let mut entries = std::fs::read_dir(ca_dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<PathBuf>, _>>()?;
    entries.sort();

    let mut root_store = RootCertStore::empty();
    for path in entries.into_iter().filter(|p| p.is_file()) {
        let ca_certs = match load_certs(&path) {
            Ok(certs) => certs,
            Err(e) => {
                tracing::debug!("Skipping {:?} in CA directory: {}", path, e);
                continue;
            }
        };
        add_to_store(&mut root_store, ca_certs)?;
    }

    if root_store.is_empty() {
        return Err(TlsError::Certificate(format!(
            "No certificates found in CA directory {:?}",
            ca_dir
        )));
    }
    Ok(root_store)
}

/// Trust configuration for an HTTPS client
#[derive(Clone, Debug)]
pub struct ClientTrust {
    /// Verify the peer certificate chain and host name
    pub verify_peer: bool,
    /// Accept a self-signed peer certificate as its own trust anchor
    pub allow_self_signed: bool,
    /// CA bundle file
    pub ca_file: Option<PathBuf>,
    /// Directory of CA certificates
    pub ca_dir: Option<PathBuf>,
}

impl Default for ClientTrust {
    fn default() -> Self {
        Self {
            verify_peer: true,
            allow_self_signed: false,
            ca_file: None,
            ca_dir: None,
        }
    }
}

impl ClientTrust {
    /// Collect the configured trust anchors (empty when none are configured)
    pub fn root_store(&self) -> Result<RootCertStore, TlsError> {
        let mut roots = RootCertStore::empty();
        if let Some(ca_file) = &self.ca_file {
            roots.roots.extend(load_root_store(ca_file)?.roots);
        }
        if let Some(ca_dir) = &self.ca_dir {
            roots.roots.extend(load_root_store_dir(ca_dir)?.roots);
        }
        Ok(roots)
    }
}

/// Build a client TLS config (no client certificate) for the given trust settings
pub fn build_client_config(trust: &ClientTrust) -> Result<ClientConfig, TlsError> {
    let provider = crypto_provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Tls(format!("Failed to select protocol versions: {}", e)))?;

    if !trust.verify_peer {
        tracing::debug!("Peer verification disabled");
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new(provider)))
            .with_no_client_auth());
    }

    let roots = trust.root_store()?;
    tracing::debug!("Client trusts {} CA certificate(s)", roots.len());

    if trust.allow_self_signed {
        let verifier = SelfSignedAwareVerifier::new(roots, provider)?;
        return Ok(builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth());
    }

    Ok(builder.with_root_certificates(roots).with_no_client_auth())
}
