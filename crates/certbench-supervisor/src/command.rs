//! Translation of a [`ServerConfig`] into an `openssl s_server` invocation

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::process::{Command, ExitStatus, Stdio};

use crate::config::{CaSource, ServerConfig};

/// Server flags derived from the config, in the order the server expects them
pub fn server_args(config: &ServerConfig) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();

    if config.responses_dir().is_some() {
        args.push("-HTTP".into());
    } else {
        args.push("-www".into());
    }

    match config.ca() {
        Some(CaSource::Dir(dir)) => {
            args.push("-CAdir".into());
            args.push(dir.into());
        }
        Some(CaSource::File(file)) => {
            args.push("-CAfile".into());
            args.push(file.into());
        }
        None => {}
    }

    args.push("-serverpref".into());
    args.push("-accept".into());
    args.push(config.port().to_string().into());
    args.push("-cert".into());
    args.push(config.certificate_path().into());
    args.push("-key".into());
    args.push(config.key_path().into());
    args.push("-cipher".into());
    args.push(config.ciphers().as_str().into());

    args
}

/// Printable form of the command that was run, used in diagnostics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine(Vec<OsString>);

impl CommandLine {
    pub fn for_config(config: &ServerConfig) -> Self {
        let binary = config.binary();
        let mut parts = vec![binary.program.clone()];
        parts.extend(binary.prefix_args.iter().cloned());
        parts.extend(server_args(config));
        Self(parts)
    }

    pub fn program(&self) -> &OsStr {
        &self.0[0]
    }

    pub fn args(&self) -> &[OsString] {
        &self.0[1..]
    }

    /// Build the process to spawn
    ///
    /// The program is executed directly, without a wrapping shell, so a kill
    /// reaches the server itself. Stdin stays an open pipe for the lifetime of
    /// the child, stdout is discarded, stderr is captured.
    pub fn to_command(&self, config: &ServerConfig) -> Command {
        let mut command = Command::new(self.program());
        command
            .args(self.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = config.responses_dir() {
            command.current_dir(dir);
        }
        command
    }
}

fn quote(arg: &OsStr) -> String {
    let arg = arg.to_string_lossy();
    format!("'{}'", arg.replace('\'', "'\\''"))
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quoted: Vec<String> = self.0.iter().map(|part| quote(part)).collect();
        f.write_str(&quoted.join(" "))
    }
}

/// Human readable description of how a process ended
pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return exit_code_text(code).to_string();
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Terminated by signal {} ({})", signal, signal_text(signal));
        }
    }

    "Unknown error".to_string()
}

fn exit_code_text(code: i32) -> &'static str {
    match code {
        0 => "OK",
        1 => "General error",
        2 => "Misuse of shell builtins",
        126 => "Invoked command cannot execute",
        127 => "Command not found",
        128 => "Invalid exit argument",
        129..=159 => "Terminated by signal",
        _ => "Unknown error",
    }
}

#[cfg(unix)]
fn signal_text(signal: i32) -> &'static str {
    match signal {
        1 => "Hangup",
        2 => "Interrupt",
        3 => "Quit and dump core",
        4 => "Illegal instruction",
        6 => "Abort",
        9 => "Kill",
        11 => "Segmentation violation",
        13 => "Broken pipe",
        14 => "Timer signal",
        15 => "Termination",
        _ => "Unknown signal",
    }
}
