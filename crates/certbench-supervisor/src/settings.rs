//! Harness settings with environment variable priority
//!
//! Settings are resolved in this order (first found wins):
//! 1. Environment variables (CERTBENCH_*)
//! 2. Settings file (certbench.toml)
//! 3. Default values

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::config::{PollPolicy, Readiness, ServerConfigBuilder};
use crate::error::SupervisorError;

/// Environment variable prefix
const ENV_PREFIX: &str = "CERTBENCH";

/// Default settings file name
pub const DEFAULT_SETTINGS_FILE: &str = "certbench.toml";

/// Harness settings (parsed from TOML, can be overridden by env)
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct HarnessSettings {
    /// OpenSSL binary used to run `s_server`
    pub openssl: Option<String>,

    /// Directory holding (or receiving) the certificate fixtures
    pub fixtures_dir: Option<String>,

    /// Host used in server URLs
    pub host: Option<String>,

    /// "process" or "accepting"
    pub readiness: Option<String>,

    /// Delay before the first readiness poll
    pub poll_initial_delay_ms: Option<u64>,

    /// Delay between readiness polls
    pub poll_interval_us: Option<u64>,

    /// Readiness polls before giving up
    pub poll_max_attempts: Option<u32>,
}

/// Resolved settings with defaults applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub openssl: PathBuf,
    pub fixtures_dir: PathBuf,
    pub host: Option<String>,
    pub readiness: Readiness,
    pub poll: PollPolicy,
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{}_{}", ENV_PREFIX, name)).ok()
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>, SupervisorError>
where
    T::Err: std::fmt::Display,
{
    get_env(name)
        .map(|value| {
            value.parse::<T>().map_err(|e| {
                SupervisorError::settings(format!("{}_{}", ENV_PREFIX, name), e.to_string())
            })
        })
        .transpose()
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Fixtures directory used when none is configured
pub fn default_fixtures_dir() -> PathBuf {
    env::temp_dir().join("certbench-fixtures")
}

impl HarnessSettings {
    /// Load settings from a TOML file (optional)
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match Self::from_toml_str(&content) {
                    Ok(settings) => {
                        tracing::info!("Loaded settings from {}", path.display());
                        return settings;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                }
            }
        }
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SupervisorError> {
        toml::from_str(content).map_err(|e| SupervisorError::settings("file", e.to_string()))
    }

    /// Resolve settings from environment variables first, then the file
    pub fn resolve(self) -> Result<ResolvedSettings, SupervisorError> {
        let openssl = get_env("OPENSSL")
            .or(self.openssl)
            .map(|p| expand_path(&p))
            .unwrap_or_else(|| PathBuf::from("openssl"));

        let fixtures_dir = get_env("FIXTURES_DIR")
            .or(self.fixtures_dir)
            .map(|p| expand_path(&p))
            .unwrap_or_else(default_fixtures_dir);

        let host = get_env("HOST").or(self.host);

        let readiness = match get_env("READINESS").or(self.readiness) {
            Some(value) => value.parse()?,
            None => Readiness::default(),
        };

        let defaults = match readiness {
            Readiness::ProcessRunning => PollPolicy::default(),
            Readiness::Accepting => PollPolicy::accepting(),
        };
        let initial_delay = parse_env::<u64>("POLL_INITIAL_DELAY_MS")?
            .or(self.poll_initial_delay_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_delay);
        let interval = parse_env::<u64>("POLL_INTERVAL_US")?
            .or(self.poll_interval_us)
            .map(Duration::from_micros)
            .unwrap_or(defaults.interval);
        let max_attempts = parse_env::<u32>("POLL_MAX_ATTEMPTS")?
            .or(self.poll_max_attempts)
            .unwrap_or(defaults.max_attempts);

        if max_attempts == 0 {
            return Err(SupervisorError::settings(
                "poll_max_attempts",
                "must be at least 1",
            ));
        }

        Ok(ResolvedSettings {
            openssl,
            fixtures_dir,
            host,
            readiness,
            poll: PollPolicy {
                initial_delay,
                interval,
                max_attempts,
            },
        })
    }

    /// Load the settings file and resolve with environment variable overrides
    pub fn load_and_resolve(path: impl AsRef<Path>) -> Result<ResolvedSettings, SupervisorError> {
        Self::load(path).resolve()
    }
}

impl ResolvedSettings {
    /// Apply binary, host, readiness and polling settings to a builder
    pub fn apply(&self, builder: ServerConfigBuilder) -> ServerConfigBuilder {
        let builder = builder
            .openssl(self.openssl.as_os_str())
            .readiness(self.readiness)
            .poll(self.poll);
        match &self.host {
            Some(host) => builder.host(host.clone()),
            None => builder,
        }
    }
}
