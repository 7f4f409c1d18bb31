//! On-disk layout of the fixture tree
//!
//! ```text
//! self-signed-localhost-cert.pem / self-signed-localhost-key.pem
//! self-signed-garbage-cert.pem / self-signed-garbage-key.pem
//! ca/root.cert.pem
//! ca/cafile.pem
//! ca/cadir/{root,i1-trusted}.cert.pem
//! ca/<intermediate>/certs/{intermediate,localhost,127.0.0.1.nip.io}.cert.pem
//! ca/<intermediate>/private/{localhost,127.0.0.1.nip.io}.key.pem
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::certificates::{FixtureSet, PemPair, GARBAGE_CN, LOCALHOST_CN, NIP_IO_CN};
use crate::error::FixtureError;

/// Intermediate authority a signed leaf comes from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intermediate {
    /// Part of the client's CA bundle
    Trusted,
    /// Signed by the root but not in the client's CA bundle
    Untrusted,
}

impl Intermediate {
    pub fn dir_name(self) -> &'static str {
        match self {
            Intermediate::Trusted => "i1-trusted",
            Intermediate::Untrusted => "i2-untrusted",
        }
    }
}

/// Paths inside a fixture tree rooted at `root`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixtureLayout {
    root: PathBuf,
}

impl FixtureLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn self_signed_cert(&self, cn: &str) -> PathBuf {
        self.root.join(format!("self-signed-{}-cert.pem", cn))
    }

    pub fn self_signed_key(&self, cn: &str) -> PathBuf {
        self.root.join(format!("self-signed-{}-key.pem", cn))
    }

    pub fn ca_dir(&self) -> PathBuf {
        self.root.join("ca")
    }

    pub fn root_cert(&self) -> PathBuf {
        self.ca_dir().join("root.cert.pem")
    }

    /// CA bundle holding the root and the trusted intermediate
    pub fn cafile(&self) -> PathBuf {
        self.ca_dir().join("cafile.pem")
    }

    /// Directory holding the root and the trusted intermediate as separate files
    pub fn cadir(&self) -> PathBuf {
        self.ca_dir().join("cadir")
    }

    pub fn intermediate_dir(&self, which: Intermediate) -> PathBuf {
        self.ca_dir().join(which.dir_name())
    }

    pub fn intermediate_cert(&self, which: Intermediate) -> PathBuf {
        self.intermediate_dir(which)
            .join("certs")
            .join("intermediate.cert.pem")
    }

    pub fn leaf_cert(&self, which: Intermediate, cn: &str) -> PathBuf {
        self.intermediate_dir(which)
            .join("certs")
            .join(format!("{}.cert.pem", cn))
    }

    pub fn leaf_key(&self, which: Intermediate, cn: &str) -> PathBuf {
        self.intermediate_dir(which)
            .join("private")
            .join(format!("{}.key.pem", cn))
    }

    /// Files whose presence marks a fully written tree
    fn required_files(&self) -> Vec<PathBuf> {
        let mut files = vec![
            self.self_signed_cert(LOCALHOST_CN),
            self.self_signed_key(LOCALHOST_CN),
            self.self_signed_cert(GARBAGE_CN),
            self.self_signed_key(GARBAGE_CN),
            self.root_cert(),
            self.cafile(),
        ];
        for which in [Intermediate::Trusted, Intermediate::Untrusted] {
            files.push(self.intermediate_cert(which));
            for cn in [LOCALHOST_CN, NIP_IO_CN] {
                files.push(self.leaf_cert(which, cn));
                files.push(self.leaf_key(which, cn));
            }
        }
        files
    }

    pub fn is_complete(&self) -> bool {
        self.cadir().is_dir() && self.required_files().iter().all(|p| p.is_file())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), FixtureError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| FixtureError::write(parent, e))?;
    }
    fs::write(path, contents).map_err(|e| FixtureError::write(path, e))
}

fn write_pair(cert: &Path, key: &Path, pair: &PemPair) -> Result<(), FixtureError> {
    write_file(cert, &pair.cert_pem)?;
    write_file(key, &pair.key_pem)
}

impl FixtureSet {
    /// Write the fixture tree below `root`, replacing existing files
    pub fn write_to(&self, root: impl Into<PathBuf>) -> Result<FixtureLayout, FixtureError> {
        let layout = FixtureLayout::new(root);

        write_pair(
            &layout.self_signed_cert(LOCALHOST_CN),
            &layout.self_signed_key(LOCALHOST_CN),
            &self.self_signed_localhost,
        )?;
        write_pair(
            &layout.self_signed_cert(GARBAGE_CN),
            &layout.self_signed_key(GARBAGE_CN),
            &self.self_signed_garbage,
        )?;

        write_file(&layout.root_cert(), &self.root_cert_pem)?;
        write_file(&layout.cafile(), &self.cafile_pem())?;
        write_file(&layout.cadir().join("root.cert.pem"), &self.root_cert_pem)?;
        write_file(
            &layout
                .cadir()
                .join(format!("{}.cert.pem", Intermediate::Trusted.dir_name())),
            &self.trusted.cert_pem,
        )?;

        for fixtures in [&self.trusted, &self.untrusted] {
            let which = fixtures.intermediate;
            write_file(&layout.intermediate_cert(which), &fixtures.cert_pem)?;
            write_pair(
                &layout.leaf_cert(which, LOCALHOST_CN),
                &layout.leaf_key(which, LOCALHOST_CN),
                &fixtures.localhost,
            )?;
            write_pair(
                &layout.leaf_cert(which, NIP_IO_CN),
                &layout.leaf_key(which, NIP_IO_CN),
                &fixtures.nip_io,
            )?;
        }

        tracing::info!("Wrote certificate fixtures to {}", layout.root().display());
        Ok(layout)
    }
}

/// Generate and write fixtures below `root` unless a complete tree is already there
pub fn ensure(root: impl Into<PathBuf>) -> Result<FixtureLayout, FixtureError> {
    let layout = FixtureLayout::new(root);
    if layout.is_complete() {
        tracing::debug!("Reusing fixtures in {}", layout.root().display());
        return Ok(layout);
    }
    FixtureSet::generate()?.write_to(layout.root)
}
