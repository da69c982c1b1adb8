// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(bringup::config::error),
        help("Check bringup.yaml and that the scratch directory is writable")
    )]
    Config(String),

    #[error("Cannot resolve server installation: {0}")]
    #[diagnostic(
        code(bringup::provision::resolution),
        help("Check network access to the download URL and that the install root is writable")
    )]
    Resolution(String),

    #[error("Data directory initialization failed: {reason}{}", format_diagnostics(.diagnostics))]
    #[diagnostic(
        code(bringup::initialize::failed),
        help("Inspect the init error log in the scratch directory. A half-initialized data directory must be removed by hand")
    )]
    Initialization { reason: String, diagnostics: String },

    #[error("Failed to launch server: {0}")]
    #[diagnostic(
        code(bringup::launch::failed),
        help("Check that the server binary exists and is executable")
    )]
    Launch(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Probe(#[from] ProbeFailure),

    #[error("Bootstrap failed: {0}")]
    #[diagnostic(
        code(bringup::bootstrap::failed),
        help("The server is running; connect with `bringup status` and check the error log")
    )]
    Bootstrap(String),

    #[error("Credentials error: {0}")]
    #[diagnostic(code(bringup::credentials::error))]
    Credentials(String),

    #[error("Invalid statement: {0}")]
    InvalidStatement(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: u32, reason: String },
}

/// Failure modes of the readiness probe.
#[derive(Error, Diagnostic, Debug)]
pub enum ProbeFailure {
    #[error("Server process exited{}{}", .exit_code.map(|c| format!(" with code {}", c)).unwrap_or_default(), format_diagnostics(.diagnostics))]
    #[diagnostic(
        code(bringup::probe::process_exited),
        help("The server died during startup. The log tails above usually name the cause")
    )]
    ProcessExited {
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("Server did not signal readiness after {attempts} attempts")]
    #[diagnostic(
        code(bringup::probe::timeout),
        help("Constrained hosts start slowly. Raise probe.max_attempts in bringup.yaml")
    )]
    Timeout { attempts: u32 },

    #[error("Connection refused after ready signal ({attempts} attempts): {last_error}")]
    #[diagnostic(
        code(bringup::probe::connection_refused),
        help("The socket exists but queries fail. Check root authentication and the error log")
    )]
    ConnectionRefused { attempts: u32, last_error: String },
}

pub type Result<T> = std::result::Result<T, Error>;

fn format_diagnostics(diagnostics: &str) -> String {
    if diagnostics.trim().is_empty() {
        String::new()
    } else {
        format!("\n\n{}", diagnostics.trim_end())
    }
}

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::Config(_) => Some("Validate your config with: bringup doctor".to_string()),
            Error::Resolution(_) => Some(
                "Pre-seed the install root with an extracted archive, or use --source system"
                    .to_string(),
            ),
            Error::Initialization { .. } => Some(
                "Remove the data directory if it was left half-initialized, then rerun `bringup up`"
                    .to_string(),
            ),
            Error::Launch(_) => Some("Check the server binary with: bringup doctor".to_string()),
            Error::Probe(ProbeFailure::ProcessExited { .. }) => {
                Some("See the full server log with: bringup logs error".to_string())
            }
            Error::Probe(ProbeFailure::Timeout { attempts }) => Some(format!(
                "The server did not create its socket within {} polls. Increase probe.max_attempts",
                attempts
            )),
            Error::Probe(ProbeFailure::ConnectionRefused { .. }) => Some(
                "Check whether the root password in the credentials file matches the server"
                    .to_string(),
            ),
            Error::Bootstrap(_) => Some(
                "Bootstrap statements are idempotent; fix the cause and rerun `bringup up`"
                    .to_string(),
            ),
            Error::Interrupted => None,
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Validates and converts a u32 PID to nix::unistd::Pid safely.
/// Returns Err for PID 0 (process group), PID 1 (init), or values > i32::MAX.
pub fn validate_pid(pid: u32) -> Result<nix::unistd::Pid> {
    if pid == 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: "PID 0 refers to the process group, not a process".to_string(),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: "refusing to signal PID 1 (init)".to_string(),
        });
    }
    if pid > i32::MAX as u32 {
        return Err(Error::InvalidPid {
            pid,
            reason: "exceeds i32::MAX, cannot convert safely".to_string(),
        });
    }
    Ok(nix::unistd::Pid::from_raw(pid as i32))
}

/// Same as validate_pid but allows PID 1 for read-only existence checks.
pub fn validate_pid_for_check(pid: u32) -> Option<nix::unistd::Pid> {
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(nix::unistd::Pid::from_raw(pid as i32))
}
