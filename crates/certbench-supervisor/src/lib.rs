//! Supervisor for an external TLS test server
//!
//! Starts `openssl s_server` with a chosen certificate, key, CA chain and
//! cipher list, waits until it is ready, and guarantees the process is gone
//! once the supervisor is stopped or dropped.
//!
//! # Example
//!
//! ```rust,ignore
//! use certbench_supervisor::{presets, TlsServerSupervisor};
//!
//! let layout = certbench_fixtures::ensure("/tmp/certbench-fixtures")?;
//! let config = presets::self_signed_localhost(&layout).build();
//!
//! let mut server = TlsServerSupervisor::new(config);
//! let url = server.start()?;
//! // ... issue requests against `url` ...
//! server.stop();
//! ```

mod command;
mod config;
mod error;
pub mod presets;
mod settings;
mod supervisor;

pub use command::{describe_exit, server_args, CommandLine};
pub use config::{
    CaSource, CipherList, PollPolicy, Readiness, ServerBinary, ServerConfig, ServerConfigBuilder,
    DEFAULT_CIPHERS, DEFAULT_HOST, PORT_RANGE,
};
pub use error::SupervisorError;
pub use presets::{Intermediate, Scenario};
pub use settings::{default_fixtures_dir, HarnessSettings, ResolvedSettings, DEFAULT_SETTINGS_FILE};
pub use supervisor::{ServerState, TlsServerSupervisor};
