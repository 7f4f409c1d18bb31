//! Certificate fixtures for TLS trust scenarios
//!
//! Generates a self-contained tree of PEM files: self-signed certificates,
//! a root CA with a trusted and an untrusted intermediate, leaf certificates
//! for `localhost` and a SAN certificate for `127.0.0.1.nip.io`, and the CA
//! bundle/directory a client uses to trust them.

pub mod certificates;
mod error;
pub mod layout;

pub use certificates::{
    FixtureSet, IntermediateFixtures, PemPair, GARBAGE_CN, LOCALHOST_CN, NIP_IO_ALT, NIP_IO_CN,
};
pub use error::FixtureError;
pub use layout::{ensure, FixtureLayout, Intermediate};
