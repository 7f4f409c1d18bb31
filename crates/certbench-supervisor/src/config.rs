//! Server configuration and its builder
//!
//! A [`ServerConfig`] is immutable; everything configurable is set on a
//! [`ServerConfigBuilder`] before the supervisor is created.

use std::ffi::OsString;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;

use crate::error::SupervisorError;

/// Ports picked when none is configured
pub const PORT_RANGE: RangeInclusive<u16> = 61001..=65535;

/// Host used in the returned URL unless overridden
pub const DEFAULT_HOST: &str = "localhost";

/// Cipher order, Mozilla intermediate compatibility
pub const DEFAULT_CIPHERS: &str = "ECDHE-RSA-AES128-GCM-SHA256:ECDHE-ECDSA-AES128-GCM-SHA256:\
ECDHE-RSA-AES256-GCM-SHA384:ECDHE-ECDSA-AES256-GCM-SHA384:DHE-RSA-AES128-GCM-SHA256:\
DHE-DSS-AES128-GCM-SHA256:kEDH+AESGCM:ECDHE-RSA-AES128-SHA256:ECDHE-ECDSA-AES128-SHA256:\
ECDHE-RSA-AES128-SHA:ECDHE-ECDSA-AES128-SHA:ECDHE-RSA-AES256-SHA384:ECDHE-ECDSA-AES256-SHA384:\
ECDHE-RSA-AES256-SHA:ECDHE-ECDSA-AES256-SHA:DHE-RSA-AES128-SHA256:DHE-RSA-AES128-SHA:\
DHE-DSS-AES128-SHA256:DHE-RSA-AES256-SHA256:DHE-DSS-AES256-SHA:DHE-RSA-AES256-SHA:\
ECDHE-RSA-DES-CBC3-SHA:ECDHE-ECDSA-DES-CBC3-SHA:AES128-GCM-SHA256:AES256-GCM-SHA384:\
AES128-SHA256:AES256-SHA256:AES128-SHA:AES256-SHA:AES:CAMELLIA:DES-CBC3-SHA:!aNULL:!eNULL:\
!EXPORT:!DES:!RC4:!MD5:!PSK:!aECDH:!EDH-DSS-DES-CBC3-SHA:!EDH-RSA-DES-CBC3-SHA:\
!KRB5-DES-CBC3-SHA";

/// Colon-joined OpenSSL cipher list
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherList(String);

impl CipherList {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CipherList {
    fn default() -> Self {
        Self(DEFAULT_CIPHERS.to_string())
    }
}

impl From<&str> for CipherList {
    fn from(list: &str) -> Self {
        Self(list.to_string())
    }
}

impl From<String> for CipherList {
    fn from(list: String) -> Self {
        Self(list)
    }
}

impl From<Vec<String>> for CipherList {
    fn from(names: Vec<String>) -> Self {
        Self(names.join(":"))
    }
}

impl From<&[&str]> for CipherList {
    fn from(names: &[&str]) -> Self {
        Self(names.join(":"))
    }
}

impl<const N: usize> From<[&str; N]> for CipherList {
    fn from(names: [&str; N]) -> Self {
        Self(names.join(":"))
    }
}

/// How CA material is handed to the server
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaSource {
    /// Single bundle file (`-CAfile`)
    File(PathBuf),
    /// Directory of CA certificates (`-CAdir`)
    Dir(PathBuf),
}

/// Program that terminates TLS, plus the arguments that precede the server flags
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerBinary {
    pub program: OsString,
    pub prefix_args: Vec<OsString>,
}

impl Default for ServerBinary {
    fn default() -> Self {
        Self {
            program: "openssl".into(),
            prefix_args: vec!["s_server".into()],
        }
    }
}

/// Condition under which a spawned server counts as ready
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Readiness {
    /// The process is running
    #[default]
    ProcessRunning,
    /// The process is running and the port accepts TCP connections on loopback
    Accepting,
}

impl FromStr for Readiness {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "process" | "running" => Ok(Self::ProcessRunning),
            "accepting" | "accept" | "tcp" => Ok(Self::Accepting),
            other => Err(SupervisorError::settings(
                "readiness",
                format!("unknown readiness '{}', expected 'process' or 'accepting'", other),
            )),
        }
    }
}

/// Bounded readiness polling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before the first poll, lets the process begin initializing
    pub initial_delay: Duration,
    /// Delay between polls
    pub interval: Duration,
    /// Polls before giving up
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            interval: Duration::from_micros(100),
            max_attempts: 200,
        }
    }
}

impl PollPolicy {
    /// Policy suited to [`Readiness::Accepting`], where binding the port takes a while
    pub fn accepting() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            interval: Duration::from_millis(10),
            max_attempts: 300,
        }
    }

    /// Upper bound on the time spent sleeping while waiting for readiness
    pub fn budget(&self) -> Duration {
        self.initial_delay + self.interval * self.max_attempts
    }
}

/// Immutable configuration of one TLS test server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    host: String,
    port: u16,
    certificate_path: PathBuf,
    key_path: PathBuf,
    ca: Option<CaSource>,
    responses_dir: Option<PathBuf>,
    ciphers: CipherList,
    binary: ServerBinary,
    readiness: Readiness,
    poll: PollPolicy,
}

impl ServerConfig {
    /// Start building a config for the given PEM certificate and private key
    pub fn builder(
        certificate_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> ServerConfigBuilder {
        ServerConfigBuilder::new(certificate_path, key_path)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn certificate_path(&self) -> &Path {
        &self.certificate_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn ca(&self) -> Option<&CaSource> {
        self.ca.as_ref()
    }

    pub fn responses_dir(&self) -> Option<&Path> {
        self.responses_dir.as_deref()
    }

    pub fn ciphers(&self) -> &CipherList {
        &self.ciphers
    }

    pub fn binary(&self) -> &ServerBinary {
        &self.binary
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn poll(&self) -> &PollPolicy {
        &self.poll
    }

    /// Base URL clients connect to
    pub fn url(&self) -> String {
        format!("https://{}:{}", self.host, self.port)
    }
}

/// Fluent builder for [`ServerConfig`]
#[derive(Clone, Debug)]
pub struct ServerConfigBuilder {
    host: String,
    port: Option<u16>,
    certificate_path: PathBuf,
    key_path: PathBuf,
    ca_path: Option<PathBuf>,
    responses_dir: Option<PathBuf>,
    ciphers: CipherList,
    binary: ServerBinary,
    readiness: Readiness,
    poll: Option<PollPolicy>,
}

impl ServerConfigBuilder {
    pub fn new(certificate_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: None,
            certificate_path: certificate_path.into(),
            key_path: key_path.into(),
            ca_path: None,
            responses_dir: None,
            ciphers: CipherList::default(),
            binary: ServerBinary::default(),
            readiness: Readiness::default(),
            poll: None,
        }
    }

    /// Set hostname used in URLs
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Port number to be used by the server
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set path to certificate(s) used for validating clients and building the chain
    ///
    /// A directory is passed as `-CAdir`, a file as `-CAfile`. Anything else
    /// is ignored when the config is built.
    pub fn ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(path.into());
        self
    }

    /// Set directory that contains HTTP responses
    pub fn responses(mut self, dir: impl Into<PathBuf>) -> Result<Self, SupervisorError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(SupervisorError::invalid_configuration(
                dir,
                "responses path is not an existing directory",
            ));
        }
        self.responses_dir = Some(dir);
        Ok(self)
    }

    /// Set ciphers to be used by the server
    pub fn ciphers(mut self, ciphers: impl Into<CipherList>) -> Self {
        self.ciphers = ciphers.into();
        self
    }

    /// Replace the program that runs the server
    pub fn binary(mut self, binary: ServerBinary) -> Self {
        self.binary = binary;
        self
    }

    /// Replace only the program, keeping the `s_server` prefix argument
    pub fn openssl(mut self, program: impl Into<OsString>) -> Self {
        self.binary.program = program.into();
        self
    }

    pub fn readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn poll(mut self, poll: PollPolicy) -> Self {
        self.poll = Some(poll);
        self
    }

    /// Freeze the configuration, picking a random port if none was set
    pub fn build(self) -> ServerConfig {
        let port = self
            .port
            .unwrap_or_else(|| rand::thread_rng().gen_range(PORT_RANGE));

        let ca = match self.ca_path {
            Some(path) if path.is_dir() => Some(CaSource::Dir(path)),
            Some(path) if path.is_file() => Some(CaSource::File(path)),
            Some(path) => {
                tracing::warn!("Ignoring CA path {:?}: not a file or directory", path);
                None
            }
            None => None,
        };

        let poll = self.poll.unwrap_or(match self.readiness {
            Readiness::ProcessRunning => PollPolicy::default(),
            Readiness::Accepting => PollPolicy::accepting(),
        });

        ServerConfig {
            host: self.host,
            port,
            certificate_path: self.certificate_path,
            key_path: self.key_path,
            ca,
            responses_dir: self.responses_dir,
            ciphers: self.ciphers,
            binary: self.binary,
            readiness: self.readiness,
            poll,
        }
    }
}
