//! Server certificate verifiers for the trust modes a fetch client can ask for

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, DigitallySignedStruct, Error, RootCertStore, SignatureScheme};

use crate::TlsError;

/// Accepts any server certificate. Handshake signatures are still checked.
#[derive(Debug)]
pub struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyServerCert {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// WebPKI verification that also accepts a self-signed end entity
///
/// A certificate the configured roots do not know is retried with itself as
/// the only trust anchor. That succeeds only for a self-signed certificate,
/// and the host name check still applies, so a self-signed certificate for
/// the wrong name is rejected with a name error.
#[derive(Debug)]
pub struct SelfSignedAwareVerifier {
    /// None when no CA material was configured
    roots: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
}

impl SelfSignedAwareVerifier {
    pub fn new(roots: RootCertStore, provider: Arc<CryptoProvider>) -> Result<Self, TlsError> {
        let roots = if roots.is_empty() {
            None
        } else {
            let verifier =
                WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                    .build()
                    .map_err(|e| TlsError::Tls(format!("Failed to build verifier: {}", e)))?;
            Some(verifier)
        };
        Ok(Self { roots, provider })
    }

    fn verify_as_own_anchor(
        &self,
        end_entity: &CertificateDer<'_>,
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        let mut pinned = RootCertStore::empty();
        pinned
            .add(end_entity.clone().into_owned())
            .map_err(|_| Error::InvalidCertificate(CertificateError::UnknownIssuer))?;

        let verifier =
            WebPkiServerVerifier::builder_with_provider(Arc::new(pinned), self.provider.clone())
                .build()
                .map_err(|e| Error::General(format!("Failed to build verifier: {}", e)))?;

        verifier.verify_server_cert(end_entity, &[], server_name, ocsp_response, now)
    }
}

impl ServerCertVerifier for SelfSignedAwareVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, Error> {
        if let Some(roots) = &self.roots {
            match roots.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
            {
                Err(Error::InvalidCertificate(CertificateError::UnknownIssuer)) => {}
                other => return other,
            }
        }

        tracing::debug!("Peer certificate not issued by a known CA, trying it as self-signed");
        self.verify_as_own_anchor(end_entity, server_name, ocsp_response, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto_provider;
    use rcgen::{CertificateParams, KeyPair};

    fn self_signed_der(name: &str) -> CertificateDer<'static> {
        let key = KeyPair::generate().unwrap();
        let params = CertificateParams::new(vec![name.to_string()]).unwrap();
        params.self_signed(&key).unwrap().der().clone()
    }

    fn name(host: &str) -> ServerName<'static> {
        ServerName::try_from(host.to_string()).unwrap()
    }

    #[test]
    fn test_self_signed_accepted_for_matching_name() {
        let verifier = SelfSignedAwareVerifier::new(RootCertStore::empty(), crypto_provider())
            .unwrap();
        let cert = self_signed_der("localhost");

        let result = verifier.verify_server_cert(&cert, &[], &name("localhost"), &[], UnixTime::now());
        assert!(result.is_ok(), "unexpected error: {:?}", result.err());
    }

    #[test]
    fn test_self_signed_rejected_for_other_name() {
        let verifier = SelfSignedAwareVerifier::new(RootCertStore::empty(), crypto_provider())
            .unwrap();
        let cert = self_signed_der("garbage");

        let result = verifier.verify_server_cert(&cert, &[], &name("localhost"), &[], UnixTime::now());
        assert!(matches!(result, Err(Error::InvalidCertificate(_))));
        assert!(!matches!(
            result,
            Err(Error::InvalidCertificate(CertificateError::UnknownIssuer))
        ));
    }

    #[test]
    fn test_accept_any_ignores_name() {
        let verifier = AcceptAnyServerCert::new(crypto_provider());
        let cert = self_signed_der("garbage");

        let result = verifier.verify_server_cert(&cert, &[], &name("localhost"), &[], UnixTime::now());
        assert!(result.is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }
}
