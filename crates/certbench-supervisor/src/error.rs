use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::supervisor::ServerState;

/// Errors raised while configuring or starting a TLS test server
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A configured path is unusable (raised before anything is spawned)
    #[error("Invalid configuration for '{path}': {reason}")]
    InvalidConfiguration { path: PathBuf, reason: String },

    /// A harness setting could not be parsed
    #[error("Invalid setting '{key}': {reason}")]
    Settings { key: String, reason: String },

    /// The server process exited (or never ran) before it became ready
    #[error(
        "Process exited unexpectedly with {}[{}]\n\n{}\n\n{}",
        exit_code_label(.exit_code),
        .exit_text,
        .command_line,
        .stderr
    )]
    ServerStartupFailed {
        exit_code: Option<i32>,
        exit_text: String,
        command_line: String,
        stderr: String,
    },

    /// The server process stayed alive but never became ready; it has been killed
    #[error("Server was not ready after {waited:?}: {command_line}")]
    ServerStartupTimeout {
        command_line: String,
        waited: Duration,
    },

    /// `start()` was called on a supervisor that already left `NotStarted`
    #[error("Server cannot be started twice (state: {state})")]
    AlreadyStarted { state: ServerState },
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "-".to_string(), |c| c.to_string())
}

impl SupervisorError {
    /// Create an invalid configuration error
    pub fn invalid_configuration(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a settings error
    pub fn settings(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Settings {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// True for the two errors `start()` reports for a failed startup
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            Self::ServerStartupFailed { .. } | Self::ServerStartupTimeout { .. }
        )
    }
}
