//! Lifecycle of one external TLS server process
//!
//! A [`TlsServerSupervisor`] spawns the server described by its
//! [`ServerConfig`], polls until the process is ready (or fails fast), and
//! kills it on [`stop`](TlsServerSupervisor::stop) or when dropped.

use std::fmt;
use std::io::Read;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::process::{Child, ChildStderr, ExitStatus};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::command::{describe_exit, CommandLine};
use crate::config::{Readiness, ServerConfig};
use crate::error::SupervisorError;

/// Lifecycle of a supervised server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Starting,
    Running,
    /// Terminal: stopped after running
    Stopped,
    /// Terminal: the process never became ready
    Failed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::NotStarted => "not started",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopped => "stopped",
            ServerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Longest wait for stderr to close after the server exited
const STDERR_DRAIN_LIMIT: Duration = Duration::from_millis(500);

/// Collects a child's stderr on a background thread so the pipe never fills
#[derive(Debug)]
struct StderrCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl StderrCapture {
    fn spawn(stderr: Option<ChildStderr>) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reader = stderr.map(|mut stderr| {
            let buffer = buffer.clone();
            thread::spawn(move || {
                let mut chunk = [0u8; 4096];
                loop {
                    match stderr.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => buffer.lock().extend_from_slice(&chunk[..n]),
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            tracing::debug!("Stopped reading server stderr: {}", e);
                            break;
                        }
                    }
                }
            })
        });
        Self { buffer, reader }
    }

    /// Wait up to `limit` for the pipe to close and return what was written
    ///
    /// Descendants of the server may keep the pipe open; the reader is then
    /// left running and only the output collected so far is returned.
    fn finish(mut self, limit: Duration) -> String {
        if let Some(reader) = self.reader.take() {
            let deadline = Instant::now() + limit;
            while !reader.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if reader.is_finished() {
                let _ = reader.join();
            } else {
                tracing::debug!("Server stderr still open after {:?}, not waiting", limit);
            }
        }
        let buffer = self.buffer.lock();
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// The spawned process and what is needed to diagnose it
#[derive(Debug)]
struct ServerProcess {
    child: Child,
    command_line: CommandLine,
    stderr: StderrCapture,
}

impl ServerProcess {
    /// Exit status if the process has terminated
    fn exit_status(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("Failed to query server process {}: {}", self.child.id(), e);
                None
            }
        }
    }

    /// Kill without grace period and reap
    fn kill(&mut self) {
        let pid = self.child.id();
        if let Err(e) = self.child.kill() {
            tracing::debug!("Kill of server process {} failed: {}", pid, e);
        }
        match self.child.wait() {
            Ok(status) => tracing::debug!("Server process {} ended: {}", pid, status),
            Err(e) => tracing::warn!("Failed to reap server process {}: {}", pid, e),
        }
    }

    fn into_startup_failed(self, status: ExitStatus) -> SupervisorError {
        SupervisorError::ServerStartupFailed {
            exit_code: status.code(),
            exit_text: describe_exit(&status),
            command_line: self.command_line.to_string(),
            stderr: self.stderr.finish(STDERR_DRAIN_LIMIT),
        }
    }
}

/// Supervisor owning at most one TLS server process
///
/// Cloning yields a supervisor for the same config in `NotStarted`; the
/// process handle is never shared.
#[derive(Debug)]
pub struct TlsServerSupervisor {
    config: ServerConfig,
    state: ServerState,
    process: Option<ServerProcess>,
}

impl TlsServerSupervisor {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            state: ServerState::NotStarted,
            process: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Base URL clients connect to
    pub fn url(&self) -> String {
        self.config.url()
    }

    /// OS process id while a process is held
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.child.id())
    }

    /// True while the held process has not terminated
    pub fn is_running(&mut self) -> bool {
        match self.process.as_mut() {
            Some(process) => process.exit_status().is_none(),
            None => false,
        }
    }

    /// Spawn the server and block until it is ready
    ///
    /// Returns the base URL (`https://{host}:{port}`). The server keeps
    /// running after this returns, until [`stop`](Self::stop) or drop.
    pub fn start(&mut self) -> Result<String, SupervisorError> {
        if self.state != ServerState::NotStarted {
            return Err(SupervisorError::AlreadyStarted { state: self.state });
        }
        self.state = ServerState::Starting;

        let command_line = CommandLine::for_config(&self.config);
        tracing::info!(
            "Starting TLS server on port {} ({})",
            self.config.port(),
            self.config.url()
        );
        tracing::debug!("Command: {}", command_line);

        let mut child = match command_line.to_command(&self.config).spawn() {
            Ok(child) => child,
            Err(e) => {
                self.state = ServerState::Failed;
                return Err(SupervisorError::ServerStartupFailed {
                    exit_code: None,
                    exit_text: format!("Failed to spawn: {}", e),
                    command_line: command_line.to_string(),
                    stderr: String::new(),
                });
            }
        };

        let stderr = StderrCapture::spawn(child.stderr.take());
        let process = ServerProcess {
            child,
            command_line,
            stderr,
        };

        match self.wait_until_ready(process) {
            Ok(process) => {
                tracing::info!("TLS server ready (pid {})", process.child.id());
                self.process = Some(process);
                self.state = ServerState::Running;
                Ok(self.url())
            }
            Err(e) => {
                tracing::warn!("TLS server failed to start: {}", e);
                self.state = ServerState::Failed;
                Err(e)
            }
        }
    }

    fn wait_until_ready(
        &self,
        mut process: ServerProcess,
    ) -> Result<ServerProcess, SupervisorError> {
        let poll = *self.config.poll();

        // Give the process a chance to start
        thread::sleep(poll.initial_delay);

        for attempt in 1..=poll.max_attempts {
            if let Some(status) = process.exit_status() {
                return Err(process.into_startup_failed(status));
            }
            if self.is_ready(poll.interval) {
                tracing::debug!("Server ready after {} poll(s)", attempt);
                return Ok(process);
            }
            thread::sleep(poll.interval);
        }

        if let Some(status) = process.exit_status() {
            return Err(process.into_startup_failed(status));
        }

        tracing::warn!(
            "Server alive but not ready after {:?}, killing it",
            poll.budget()
        );
        process.kill();
        Err(SupervisorError::ServerStartupTimeout {
            command_line: process.command_line.to_string(),
            waited: poll.budget(),
        })
    }

    /// Readiness check for a process known to be running
    fn is_ready(&self, connect_timeout: Duration) -> bool {
        match self.config.readiness() {
            Readiness::ProcessRunning => true,
            Readiness::Accepting => {
                let timeout = connect_timeout.max(Duration::from_millis(1));
                let port = self.config.port();
                [
                    SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
                    SocketAddr::from((Ipv6Addr::LOCALHOST, port)),
                ]
                .iter()
                .any(|addr| TcpStream::connect_timeout(addr, timeout).is_ok())
            }
        }
    }

    /// Kill the server if one is running. Safe to call any number of times.
    pub fn stop(&mut self) {
        if let Some(mut process) = self.process.take() {
            tracing::info!("Stopping TLS server (pid {})", process.child.id());
            process.kill();
            self.state = ServerState::Stopped;
        }
    }
}

impl Clone for TlsServerSupervisor {
    fn clone(&self) -> Self {
        Self::new(self.config.clone())
    }
}

impl Drop for TlsServerSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}
