use std::time::Duration;

use certbench_common::TlsError;
use thiserror::Error;

/// Errors surfaced by [`RemoteFetcher`](crate::RemoteFetcher)
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Could not resolve '{host}': {reason}")]
    Resolve { host: String, reason: String },

    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// The peer chain could not be verified against the trusted CAs
    #[error("certificate verify failed: {0}")]
    CertificateVerify(String),

    /// The peer certificate is valid but not for the requested name
    #[error(
        "Peer certificate did not match expected name `{expected}` (presented: {})",
        presented_label(.presented)
    )]
    PeerNameMismatch {
        expected: String,
        presented: Vec<String>,
    },

    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Any other failure while sending the request or reading the response
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

fn presented_label(presented: &[String]) -> String {
    if presented.is_empty() {
        "unknown".to_string()
    } else {
        presented.join(", ")
    }
}

impl TransportError {
    /// True when the failure comes from certificate trust or name checks
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            Self::CertificateVerify(_) | Self::PeerNameMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let verify = TransportError::CertificateVerify("UnknownIssuer".to_string());
        assert_eq!(verify.to_string(), "certificate verify failed: UnknownIssuer");
        assert!(verify.is_verification_failure());

        let name = TransportError::PeerNameMismatch {
            expected: "localhost".to_string(),
            presented: vec!["DnsName(\"garbage\")".to_string()],
        };
        assert!(name.to_string().contains("expected name `localhost`"));
        assert!(name.to_string().contains("garbage"));
        assert!(name.is_verification_failure());

        let timeout = TransportError::Timeout(Duration::from_secs(1));
        assert!(!timeout.is_verification_failure());
    }
}
