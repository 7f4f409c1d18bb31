//! HTTPS GET client with the SSL options a package manager exposes

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;
use rustls::CertificateError;

use certbench_common::{build_client_config, ClientTrust};

use crate::error::TransportError;
use crate::response::FetchResponse;

/// Certificate trust options for a fetch
#[derive(Clone, Debug)]
pub struct SslOptions {
    /// Verify the peer chain and name (default true)
    pub verify_peer: bool,
    /// Accept a self-signed peer certificate that matches the name
    pub allow_self_signed: bool,
    /// CA bundle file
    pub cafile: Option<PathBuf>,
    /// Directory of CA certificates
    pub capath: Option<PathBuf>,
    /// Name to verify instead of the URL host
    pub peer_name: Option<String>,
}

impl Default for SslOptions {
    fn default() -> Self {
        Self {
            verify_peer: true,
            allow_self_signed: false,
            cafile: None,
            capath: None,
            peer_name: None,
        }
    }
}

impl SslOptions {
    fn trust(&self) -> ClientTrust {
        ClientTrust {
            verify_peer: self.verify_peer,
            allow_self_signed: self.allow_self_signed,
            ca_file: self.cafile.clone(),
            ca_dir: self.capath.clone(),
        }
    }
}

/// Options for a [`RemoteFetcher`]
#[derive(Clone, Debug)]
pub struct FetchOptions {
    pub ssl: SslOptions,
    /// Fixed addresses for host names, bypassing DNS
    pub resolve: Vec<(String, SocketAddr)>,
    /// Limit for connect, handshake and read together
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            ssl: SslOptions::default(),
            resolve: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl FetchOptions {
    pub fn with_ssl(ssl: SslOptions) -> Self {
        Self {
            ssl,
            ..Self::default()
        }
    }

    /// Connect to `addr` whenever `host` is requested
    pub fn resolve(mut self, host: impl Into<String>, addr: SocketAddr) -> Self {
        self.resolve.push((host.into(), addr));
        self
    }
}

fn parse_target(url: &str) -> Result<Url, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let target = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    if target.scheme() != "https" {
        return Err(invalid("only https URLs are supported"));
    }
    if target.host().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(target)
}

/// Host of `url` as the certificate must name it (IPv6 without brackets)
fn host_name(url: &Url) -> String {
    url.host_str()
        .unwrap_or_default()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string()
}

/// Find the rustls error behind a request failure
///
/// The TLS stream reports rustls errors wrapped in an `io::Error`, whose
/// `source()` skips the wrapped value, so each `io::Error` is opened too.
fn find_tls_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a rustls::Error> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(tls) = e.downcast_ref::<rustls::Error>() {
            return Some(tls);
        }
        if let Some(tls) = e
            .downcast_ref::<std::io::Error>()
            .and_then(|io| io.get_ref())
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        {
            return Some(tls);
        }
        current = e.source();
    }
    None
}

/// Messages of `err` and its sources, joined
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        parts.push(e.to_string());
        current = e.source();
    }
    parts.join(": ")
}

/// Map a handshake failure to a transport error
fn classify_tls_error(tls: &rustls::Error, expected: &str) -> TransportError {
    match tls {
        rustls::Error::InvalidCertificate(CertificateError::NotValidForName) => {
            TransportError::PeerNameMismatch {
                expected: expected.to_string(),
                presented: Vec::new(),
            }
        }
        rustls::Error::InvalidCertificate(CertificateError::NotValidForNameContext {
            presented,
            ..
        }) => TransportError::PeerNameMismatch {
            expected: expected.to_string(),
            presented: presented.clone(),
        },
        rustls::Error::InvalidCertificate(other) => {
            TransportError::CertificateVerify(format!("{:?}", other))
        }
        other => TransportError::Handshake(other.to_string()),
    }
}

/// Build a client that speaks TLS with `tls` and pins `resolve` overrides
fn build_client(
    tls: rustls::ClientConfig,
    timeout: Duration,
    resolve: &[(String, SocketAddr)],
) -> Result<reqwest::Client, TransportError> {
    // Each override replaces the previous one for a host, so group first
    let mut overrides: BTreeMap<String, Vec<SocketAddr>> = BTreeMap::new();
    for (host, addr) in resolve {
        overrides
            .entry(host.to_ascii_lowercase())
            .or_default()
            .push(*addr);
    }

    let mut builder = reqwest::Client::builder()
        .use_preconfigured_tls(tls)
        .timeout(timeout)
        .no_proxy()
        .http1_only()
        .user_agent("certbench");
    for (host, addrs) in &overrides {
        builder = builder.resolve_to_addrs(host, addrs);
    }
    builder.build().map_err(TransportError::Http)
}

/// HTTPS client used to fetch remote files
#[derive(Clone)]
pub struct RemoteFetcher {
    client: reqwest::Client,
    tls: rustls::ClientConfig,
    options: FetchOptions,
}

impl RemoteFetcher {
    pub fn new(options: FetchOptions) -> Result<Self, TransportError> {
        let tls = build_client_config(&options.ssl.trust())?;
        let client = build_client(tls.clone(), options.timeout, &options.resolve)?;
        Ok(Self {
            client,
            tls,
            options,
        })
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }

    /// GET `url`, failing on transport and TLS errors (not on HTTP status)
    pub async fn get(&self, url: &str) -> Result<FetchResponse, TransportError> {
        let target = parse_target(url)?;
        let host = host_name(&target);
        let expected = self
            .options
            .ssl
            .peer_name
            .clone()
            .unwrap_or_else(|| host.clone());

        let (client, request_url) = if expected.eq_ignore_ascii_case(&host) {
            (self.client.clone(), target)
        } else {
            self.client_for_peer_name(url, &target, &expected).await?
        };

        let response = client
            .get(request_url)
            .send()
            .await
            .map_err(|e| self.classify(e, url, &expected))?;
        let response = FetchResponse::read(response)
            .await
            .map_err(|e| self.classify(e, url, &expected))?;
        tracing::debug!("GET {} -> {}", url, response.status);
        Ok(response)
    }

    /// GET `url` and return the body as text
    pub async fn get_contents(&self, url: &str) -> Result<String, TransportError> {
        Ok(self.get(url).await?.text())
    }

    /// Connect to the addresses of the URL host while verifying `peer_name`
    ///
    /// The request is sent to `peer_name` itself, pinned to the addresses the
    /// URL host resolves to, so the handshake checks the overridden name.
    async fn client_for_peer_name(
        &self,
        url: &str,
        target: &Url,
        peer_name: &str,
    ) -> Result<(reqwest::Client, Url), TransportError> {
        let port = target.port_or_known_default().unwrap_or(443);
        let addrs = self.addresses(target, port).await?;

        let mut rewritten = target.clone();
        rewritten
            .set_host(Some(peer_name))
            .map_err(|e| TransportError::InvalidUrl {
                url: url.to_string(),
                reason: format!("invalid peer name '{}': {}", peer_name, e),
            })?;
        tracing::debug!(
            "Verifying {} as '{}' via {:?}",
            host_name(target),
            peer_name,
            addrs
        );

        let mut resolve: Vec<(String, SocketAddr)> = self
            .options
            .resolve
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case(peer_name))
            .cloned()
            .collect();
        resolve.extend(addrs.into_iter().map(|addr| (peer_name.to_string(), addr)));

        let client = build_client(self.tls.clone(), self.options.timeout, &resolve)?;
        Ok((client, rewritten))
    }

    async fn addresses(&self, target: &Url, port: u16) -> Result<Vec<SocketAddr>, TransportError> {
        let domain = host_name(target);
        if let Ok(ip) = domain.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }
        let domain = domain.as_str();

        let fixed: Vec<SocketAddr> = self
            .options
            .resolve
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(domain))
            .map(|(_, addr)| SocketAddr::new(addr.ip(), port))
            .collect();
        if !fixed.is_empty() {
            return Ok(fixed);
        }

        let resolved: Vec<SocketAddr> = tokio::net::lookup_host((domain, port))
            .await
            .map_err(|e| TransportError::Resolve {
                host: domain.to_string(),
                reason: e.to_string(),
            })?
            .collect();
        if resolved.is_empty() {
            return Err(TransportError::Resolve {
                host: domain.to_string(),
                reason: "no addresses".to_string(),
            });
        }
        Ok(resolved)
    }

    fn classify(&self, err: reqwest::Error, url: &str, expected: &str) -> TransportError {
        // TLS failures also count as connect errors, so look for them first
        if let Some(tls) = find_tls_error(&err) {
            return classify_tls_error(tls, expected);
        }
        if err.is_timeout() {
            TransportError::Timeout(self.options.timeout)
        } else if err.is_connect() {
            TransportError::Connect {
                url: url.to_string(),
                reason: error_chain(&err),
            }
        } else {
            TransportError::Http(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::io::ErrorKind;

    /// Error with a source, standing in for the client's wrapping layers
    #[derive(Debug)]
    struct Wrapped(std::io::Error);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "client error")
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    fn wrapped_tls(err: rustls::Error) -> Wrapped {
        Wrapped(std::io::Error::new(ErrorKind::InvalidData, err))
    }

    #[test]
    fn test_parse_target() {
        let target = parse_target("https://localhost:61234").unwrap();
        assert_eq!(host_name(&target), "localhost");
        assert_eq!(target.port(), Some(61234));
        assert_eq!(target.path(), "/");

        let target = parse_target("https://WWW.127.0.0.1.nip.io/packages.json?x=1").unwrap();
        assert_eq!(host_name(&target), "www.127.0.0.1.nip.io");
        assert_eq!(target.port_or_known_default(), Some(443));
        assert_eq!(target.query(), Some("x=1"));

        assert_eq!(host_name(&parse_target("https://[::1]:8443/").unwrap()), "::1");
    }

    #[test]
    fn test_parse_target_rejects_non_https() {
        assert!(matches!(
            parse_target("http://localhost:80/"),
            Err(TransportError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_target("not a url"),
            Err(TransportError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_find_tls_error_through_io_error() {
        let plain = Wrapped(std::io::Error::new(ErrorKind::ConnectionReset, "reset"));
        assert!(find_tls_error(&plain).is_none());

        let wrapped = wrapped_tls(rustls::Error::InvalidCertificate(
            CertificateError::UnknownIssuer,
        ));
        assert!(matches!(
            find_tls_error(&wrapped),
            Some(rustls::Error::InvalidCertificate(
                CertificateError::UnknownIssuer
            ))
        ));
        assert_eq!(error_chain(&plain), "client error: reset");
    }

    #[test]
    fn test_classify_certificate_errors() {
        let err = classify_tls_error(
            &rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer),
            "localhost",
        );
        assert!(matches!(err, TransportError::CertificateVerify(_)));
        assert!(err.to_string().starts_with("certificate verify failed"));

        let err = classify_tls_error(
            &rustls::Error::InvalidCertificate(CertificateError::NotValidForName),
            "localhost",
        );
        assert!(matches!(err, TransportError::PeerNameMismatch { .. }));

        let err = classify_tls_error(&rustls::Error::DecryptError, "localhost");
        assert!(matches!(err, TransportError::Handshake(_)));
        assert!(!err.is_verification_failure());
    }

    #[tokio::test]
    async fn test_resolve_override_wins() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let fetcher =
            RemoteFetcher::new(FetchOptions::default().resolve("Example.Test", addr)).unwrap();
        let target = parse_target("https://example.test:8443/").unwrap();
        let addrs = fetcher.addresses(&target, 8443).await.unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8443".parse::<SocketAddr>().unwrap()]);

        let target = parse_target("https://[::1]:8443/").unwrap();
        let addrs = fetcher.addresses(&target, 8443).await.unwrap();
        assert_eq!(addrs, vec!["[::1]:8443".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_build_client_with_both_loopback_overrides() {
        let tls = build_client_config(&ClientTrust::default()).unwrap();
        let resolve = vec![
            ("localhost".to_string(), "127.0.0.1:0".parse().unwrap()),
            ("LOCALHOST".to_string(), "[::1]:0".parse().unwrap()),
        ];
        assert!(build_client(tls, Duration::from_secs(1), &resolve).is_ok());
    }
}
