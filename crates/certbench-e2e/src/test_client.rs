//! Fetch client pinned to the loopback interface
//!
//! Server hosts such as `www.127.0.0.1.nip.io` are mapped to loopback
//! addresses directly, so no test depends on external DNS.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use certbench_fetch::{FetchOptions, FetchResponse, RemoteFetcher, SslOptions, TransportError};

/// A fetcher that always connects to loopback for one host
pub struct TestClient {
    fetcher: RemoteFetcher,
}

impl TestClient {
    pub fn new(host: &str, ssl: SslOptions) -> Result<Self, TransportError> {
        let options = FetchOptions::with_ssl(ssl)
            .resolve(host, SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .resolve(host, SocketAddr::from((Ipv6Addr::LOCALHOST, 0)));
        Ok(Self {
            fetcher: RemoteFetcher::new(options)?,
        })
    }

    pub async fn get(&self, url: &str) -> Result<FetchResponse, TransportError> {
        self.fetcher.get(url).await
    }
}
