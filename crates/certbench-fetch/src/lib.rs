//! HTTPS fetch client with configurable certificate trust
//!
//! [`RemoteFetcher`] performs a single `GET` over TLS and reports trust
//! failures as distinct [`TransportError`] variants, so callers can tell a
//! name mismatch apart from an unknown issuer.

mod client;
mod error;
mod response;

pub use client::{FetchOptions, RemoteFetcher, SslOptions};
pub use error::TransportError;
pub use response::FetchResponse;
