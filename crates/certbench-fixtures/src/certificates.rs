//! Fixture certificate generation using rcgen
//!
//! Produces every certificate the TLS scenarios need at runtime instead of
//! shipping pre-generated PEM files.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType,
};

use crate::error::FixtureError;
use crate::layout::Intermediate;

/// Common name of the localhost leaf certificates
pub const LOCALHOST_CN: &str = "localhost";
/// Common name of the self-signed certificate that matches no test host
pub const GARBAGE_CN: &str = "garbage";
/// Common name of the SAN leaf certificates
pub const NIP_IO_CN: &str = "127.0.0.1.nip.io";
/// Additional subject alternative name carried by the SAN leaf certificates
pub const NIP_IO_ALT: &str = "www.127.0.0.1.nip.io";

/// A certificate and its private key, both PEM encoded
#[derive(Clone, Debug)]
pub struct PemPair {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Material issued by one intermediate authority
#[derive(Clone, Debug)]
pub struct IntermediateFixtures {
    pub intermediate: Intermediate,
    /// Intermediate CA certificate PEM
    pub cert_pem: String,
    /// Leaf for `localhost`
    pub localhost: PemPair,
    /// Leaf for `127.0.0.1.nip.io` with a `www.` alternative name
    pub nip_io: PemPair,
}

/// Every certificate used by the TLS scenarios
#[derive(Clone, Debug)]
pub struct FixtureSet {
    pub self_signed_localhost: PemPair,
    pub self_signed_garbage: PemPair,
    /// Root CA certificate PEM
    pub root_cert_pem: String,
    /// Issued by an intermediate the client trusts directly
    pub trusted: IntermediateFixtures,
    /// Issued by an intermediate the client only reaches through the root
    pub untrusted: IntermediateFixtures,
}

fn distinguished_name(cn: &str, org: Option<&str>) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    if let Some(org) = org {
        dn.push(DnType::OrganizationName, org);
    }
    dn
}

fn ca_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(cn, Some("certbench fixtures"));
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    params
}

fn leaf_params(cn: &str, alt_names: &[&str]) -> Result<CertificateParams, FixtureError> {
    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(cn, None);
    params.subject_alt_names = std::iter::once(cn)
        .chain(alt_names.iter().copied())
        .map(|name| -> Result<SanType, rcgen::Error> { Ok(SanType::DnsName(name.try_into()?)) })
        .collect::<Result<Vec<_>, _>>()?;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];
    Ok(params)
}

/// Self-signed server certificate whose CN and only SAN are `cn`
fn self_signed(cn: &str) -> Result<PemPair, FixtureError> {
    let key = KeyPair::generate()?;
    let cert = leaf_params(cn, &[])?.self_signed(&key)?;
    Ok(PemPair {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

fn signed_leaf(
    cn: &str,
    alt_names: &[&str],
    issuer: &Issuer<'_, KeyPair>,
) -> Result<PemPair, FixtureError> {
    let key = KeyPair::generate()?;
    let cert = leaf_params(cn, alt_names)?.signed_by(&key, issuer)?;
    Ok(PemPair {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

fn intermediate(
    which: Intermediate,
    root: &Issuer<'_, KeyPair>,
) -> Result<IntermediateFixtures, FixtureError> {
    let key = KeyPair::generate()?;
    let params = ca_params(&format!("certbench {} intermediate", which.dir_name()));
    let cert = params.signed_by(&key, root)?;
    let issuer = Issuer::new(params, key);

    Ok(IntermediateFixtures {
        intermediate: which,
        cert_pem: cert.pem(),
        localhost: signed_leaf(LOCALHOST_CN, &[], &issuer)?,
        nip_io: signed_leaf(NIP_IO_CN, &[NIP_IO_ALT], &issuer)?,
    })
}

impl FixtureSet {
    /// Generate a fresh set of fixtures
    ///
    /// Creates:
    /// - self-signed certificates for `localhost` and `garbage`
    /// - a root CA
    /// - two intermediates signed by the root, each issuing a `localhost`
    ///   leaf and a SAN leaf for `127.0.0.1.nip.io`
    pub fn generate() -> Result<Self, FixtureError> {
        let root_key = KeyPair::generate()?;
        let root_params = ca_params("certbench Root CA");
        let root_cert = root_params.clone().self_signed(&root_key)?;
        // Issuer takes ownership of the root key
        let root = Issuer::new(root_params, root_key);

        Ok(Self {
            self_signed_localhost: self_signed(LOCALHOST_CN)?,
            self_signed_garbage: self_signed(GARBAGE_CN)?,
            root_cert_pem: root_cert.pem(),
            trusted: intermediate(Intermediate::Trusted, &root)?,
            untrusted: intermediate(Intermediate::Untrusted, &root)?,
        })
    }

    pub fn intermediate(&self, which: Intermediate) -> &IntermediateFixtures {
        match which {
            Intermediate::Trusted => &self.trusted,
            Intermediate::Untrusted => &self.untrusted,
        }
    }

    /// CA bundle a client uses to trust the root and the trusted intermediate
    pub fn cafile_pem(&self) -> String {
        format!("{}{}", self.root_cert_pem, self.trusted.cert_pem)
    }
}
