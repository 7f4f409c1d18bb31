//! Test harness for E2E tests
//!
//! Resolves harness settings, prepares the shared fixture tree once per test
//! binary and starts `openssl s_server` instances that wait until the port
//! accepts connections.

use std::process::{Command, Stdio};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use parking_lot::Mutex;

use certbench_fetch::{FetchResponse, SslOptions, TransportError};
use certbench_fixtures::FixtureLayout;
use certbench_supervisor::{
    HarnessSettings, ResolvedSettings, ServerConfigBuilder, TlsServerSupervisor,
    DEFAULT_SETTINGS_FILE,
};

use crate::test_client::TestClient;

/// Fixture tree shared by all tests in a binary
static FIXTURES: Mutex<Option<FixtureLayout>> = Mutex::new(None);

/// Whether the configured openssl binary can be executed
static OPENSSL_AVAILABLE: OnceLock<bool> = OnceLock::new();

/// Initialize tracing for tests
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            "certbench_e2e=debug,certbench_supervisor=debug,certbench_fetch=debug,certbench_common=debug",
        )
        .with_test_writer()
        .try_init();
}

fn openssl_available(settings: &ResolvedSettings) -> bool {
    *OPENSSL_AVAILABLE.get_or_init(|| {
        let available = Command::new(&settings.openssl)
            .arg("version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        if !available {
            tracing::warn!(
                "`{} version` failed, skipping tests that need s_server",
                settings.openssl.display()
            );
        }
        available
    })
}

fn shared_fixtures(settings: &ResolvedSettings) -> Result<FixtureLayout> {
    let mut guard = FIXTURES.lock();
    if let Some(layout) = guard.as_ref() {
        return Ok(layout.clone());
    }
    let layout = certbench_fixtures::ensure(&settings.fixtures_dir).with_context(|| {
        format!(
            "Failed to prepare fixtures in {}",
            settings.fixtures_dir.display()
        )
    })?;
    *guard = Some(layout.clone());
    Ok(layout)
}

/// Entry point for tests that need a real TLS server
pub struct Harness {
    settings: ResolvedSettings,
    layout: FixtureLayout,
}

impl Harness {
    /// Prepare settings and fixtures, or `None` when openssl is unavailable
    ///
    /// Tests wait for the port to accept connections unless
    /// `CERTBENCH_READINESS` says otherwise.
    pub fn new() -> Option<Self> {
        init_test();

        let settings = HarnessSettings {
            readiness: Some("accepting".to_string()),
            ..HarnessSettings::load(DEFAULT_SETTINGS_FILE)
        };
        let settings = match settings.resolve() {
            Ok(settings) => settings,
            Err(e) => panic!("Invalid harness settings: {}", e),
        };

        if !openssl_available(&settings) {
            return None;
        }

        let layout = match shared_fixtures(&settings) {
            Ok(layout) => layout,
            Err(e) => panic!("{:#}", e),
        };
        Some(Self { settings, layout })
    }

    pub fn layout(&self) -> &FixtureLayout {
        &self.layout
    }

    pub fn settings(&self) -> &ResolvedSettings {
        &self.settings
    }

    /// Apply harness settings to `builder` and start the server
    pub fn start(&self, builder: ServerConfigBuilder) -> Result<TestServer> {
        let config = self.settings.apply(builder).build();
        let host = config.host().to_string();
        let mut supervisor = TlsServerSupervisor::new(config);
        let url = supervisor.start().context("Failed to start s_server")?;
        tracing::info!("Test server up at {}", url);
        Ok(TestServer {
            supervisor,
            url,
            host,
        })
    }
}

/// A running s_server instance, killed when dropped
pub struct TestServer {
    pub supervisor: TlsServerSupervisor,
    /// URL returned by `start`
    pub url: String,
    /// Host the URL names
    pub host: String,
}

impl TestServer {
    /// GET `path` with the given trust options
    pub async fn get_path(
        &self,
        path: &str,
        ssl: SslOptions,
    ) -> Result<FetchResponse, TransportError> {
        TestClient::new(&self.host, ssl)?
            .get(&format!("{}{}", self.url, path))
            .await
    }

    /// GET the server root with the given trust options and return the body
    pub async fn get_contents(&self, ssl: SslOptions) -> Result<String, TransportError> {
        Ok(self.get_path("/", ssl).await?.text())
    }
}
