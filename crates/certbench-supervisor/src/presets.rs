//! Ready-made server configurations for the certificate trust scenarios
//!
//! Each preset only picks fixture paths (and a host); the returned builder
//! can be adjusted further before it is built.

use std::fmt;
use std::str::FromStr;

use certbench_fixtures::{FixtureLayout, GARBAGE_CN, LOCALHOST_CN, NIP_IO_CN};

pub use certbench_fixtures::Intermediate;

use crate::config::{ServerConfig, ServerConfigBuilder};
use crate::error::SupervisorError;

/// Self-signed certificate matching `localhost`
pub fn self_signed_localhost(layout: &FixtureLayout) -> ServerConfigBuilder {
    ServerConfig::builder(
        layout.self_signed_cert(LOCALHOST_CN),
        layout.self_signed_key(LOCALHOST_CN),
    )
}

/// Self-signed certificate whose common name is `garbage`
pub fn self_signed_garbage(layout: &FixtureLayout) -> ServerConfigBuilder {
    ServerConfig::builder(
        layout.self_signed_cert(GARBAGE_CN),
        layout.self_signed_key(GARBAGE_CN),
    )
}

/// `localhost` leaf issued by `intermediate`, optionally serving the intermediate
pub fn signed_localhost(
    layout: &FixtureLayout,
    intermediate: Intermediate,
    chain: bool,
) -> ServerConfigBuilder {
    let builder = ServerConfig::builder(
        layout.leaf_cert(intermediate, LOCALHOST_CN),
        layout.leaf_key(intermediate, LOCALHOST_CN),
    );
    if chain {
        builder.ca(layout.intermediate_cert(intermediate))
    } else {
        builder
    }
}

/// SAN leaf for `127.0.0.1.nip.io`, served under `{subdomain}.127.0.0.1.nip.io`
///
/// An empty or absent subdomain uses the bare common name as host.
pub fn signed_nip_io(
    layout: &FixtureLayout,
    subdomain: Option<&str>,
    intermediate: Intermediate,
    chain: bool,
) -> ServerConfigBuilder {
    let host = match subdomain {
        Some(sub) if !sub.is_empty() => format!("{}.{}", sub, NIP_IO_CN),
        _ => NIP_IO_CN.to_string(),
    };

    let builder = ServerConfig::builder(
        layout.leaf_cert(intermediate, NIP_IO_CN),
        layout.leaf_key(intermediate, NIP_IO_CN),
    )
    .host(host);
    if chain {
        builder.ca(layout.intermediate_cert(intermediate))
    } else {
        builder
    }
}

/// Named preset, as selected on the command line or in settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    SelfSignedLocalhost,
    SelfSignedGarbage,
    SignedLocalhost,
    SignedLocalhostChain,
    UntrustedLocalhost,
    UntrustedLocalhostChain,
    NipIo,
}

impl Scenario {
    pub const ALL: [Scenario; 7] = [
        Scenario::SelfSignedLocalhost,
        Scenario::SelfSignedGarbage,
        Scenario::SignedLocalhost,
        Scenario::SignedLocalhostChain,
        Scenario::UntrustedLocalhost,
        Scenario::UntrustedLocalhostChain,
        Scenario::NipIo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Scenario::SelfSignedLocalhost => "self-signed-localhost",
            Scenario::SelfSignedGarbage => "self-signed-garbage",
            Scenario::SignedLocalhost => "signed-localhost",
            Scenario::SignedLocalhostChain => "signed-localhost-chain",
            Scenario::UntrustedLocalhost => "untrusted-localhost",
            Scenario::UntrustedLocalhostChain => "untrusted-localhost-chain",
            Scenario::NipIo => "nip-io",
        }
    }

    /// Builder for this scenario over the given fixture tree
    pub fn builder(self, layout: &FixtureLayout) -> ServerConfigBuilder {
        match self {
            Scenario::SelfSignedLocalhost => self_signed_localhost(layout),
            Scenario::SelfSignedGarbage => self_signed_garbage(layout),
            Scenario::SignedLocalhost => signed_localhost(layout, Intermediate::Trusted, false),
            Scenario::SignedLocalhostChain => signed_localhost(layout, Intermediate::Trusted, true),
            Scenario::UntrustedLocalhost => {
                signed_localhost(layout, Intermediate::Untrusted, false)
            }
            Scenario::UntrustedLocalhostChain => {
                signed_localhost(layout, Intermediate::Untrusted, true)
            }
            Scenario::NipIo => signed_nip_io(layout, None, Intermediate::Trusted, false),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Scenario::ALL.iter().map(|s| s.name()).collect();
                SupervisorError::settings(
                    "scenario",
                    format!("unknown scenario '{}', expected one of: {}", s, names.join(", ")),
                )
            })
    }
}
