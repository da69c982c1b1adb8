//! One-time data directory initialization.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::provision::ServerInstallation;
use crate::service::log_tail::{format_tails, DIAGNOSTIC_TAIL_LINES};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Name of the system schema directory that marks an initialized data dir.
const SYSTEM_SCHEMA_MARKER: &str = "mysql";

const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDirectory {
    pub path: PathBuf,
    pub initialized: bool,
    /// Initialized by this invocation; root then has an empty password.
    pub freshly_initialized: bool,
}

/// What is already on disk at a data directory path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirState {
    Missing,
    Empty,
    Initialized,
    /// Non-empty but without the system schema. Never touched.
    Unrecognized,
}

pub fn inspect(data_dir: &Path) -> Result<DataDirState> {
    if data_dir.join(SYSTEM_SCHEMA_MARKER).is_dir() {
        return Ok(DataDirState::Initialized);
    }
    match std::fs::read_dir(data_dir) {
        Ok(mut entries) => Ok(if entries.next().is_some() {
            DataDirState::Unrecognized
        } else {
            DataDirState::Empty
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DataDirState::Missing),
        Err(e) => Err(Error::Initialization {
            reason: format!("cannot read data directory {}: {}", data_dir.display(), e),
            diagnostics: String::new(),
        }),
    }
}

pub struct Initializer<'a> {
    config: &'a Config,
    cancel: CancellationToken,
}

impl<'a> Initializer<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort a running initialization (and kill the server) when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Initialize `data_dir` unless it already holds data. Never re-initializes.
    #[tracing::instrument(skip(self, installation), fields(data_dir = %data_dir.display()))]
    pub async fn initialize(
        &self,
        installation: &ServerInstallation,
        data_dir: &Path,
    ) -> Result<DataDirectory> {
        match inspect(data_dir)? {
            DataDirState::Initialized => {
                tracing::info!("Data directory already initialized");
                return Ok(DataDirectory {
                    path: data_dir.to_path_buf(),
                    initialized: true,
                    freshly_initialized: false,
                });
            }
            DataDirState::Unrecognized => {
                tracing::warn!(
                    "Data directory {} is not empty but has no '{}' schema; treating it as initialized",
                    data_dir.display(),
                    SYSTEM_SCHEMA_MARKER
                );
                return Ok(DataDirectory {
                    path: data_dir.to_path_buf(),
                    initialized: true,
                    freshly_initialized: false,
                });
            }
            DataDirState::Missing | DataDirState::Empty => {}
        }

        self.run_initialize(installation, data_dir).await?;

        if inspect(data_dir)? != DataDirState::Initialized {
            return Err(Error::Initialization {
                reason: format!(
                    "server exited successfully but {} has no '{}' schema",
                    data_dir.display(),
                    SYSTEM_SCHEMA_MARKER
                ),
                diagnostics: self.init_log_tail(),
            });
        }

        tracing::info!("Data directory initialized");
        Ok(DataDirectory {
            path: data_dir.to_path_buf(),
            initialized: true,
            freshly_initialized: true,
        })
    }

    fn args(&self, installation: &ServerInstallation, data_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "--initialize-insecure".to_string(),
            format!("--basedir={}", installation.binary_root.display()),
            format!("--datadir={}", data_dir.display()),
            format!("--log-error={}", self.config.init_error_log().display()),
        ];
        if nix::unistd::Uid::effective().is_root() {
            args.push(format!("--user={}", self.config.server.run_as_user));
        }
        args
    }

    async fn run_initialize(&self, installation: &ServerInstallation, data_dir: &Path) -> Result<()> {
        // mysqld requires an absent or empty data directory; its parent must exist.
        if let Some(parent) = data_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&self.config.scratch_dir)?;

        let timeout = self.config.get_init_timeout()?;
        let args = self.args(installation, data_dir);
        tracing::debug!(?args, "Running {}", installation.server_binary.display());

        let mut child = Command::new(&installation.server_binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Initialization {
                reason: format!(
                    "cannot execute {}: {}",
                    installation.server_binary.display(),
                    e
                ),
                diagnostics: String::new(),
            })?;

        // Drained separately so output written before a timeout is kept.
        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status?),
            _ = tokio::time::sleep(timeout) => Waited::TimedOut,
            _ = self.cancel.cancelled() => Waited::Cancelled,
        };
        let status = match waited {
            Waited::Exited(status) => Some(status),
            Waited::TimedOut => {
                kill_group(&mut child).await;
                None
            }
            Waited::Cancelled => {
                kill_group(&mut child).await;
                return Err(Error::Interrupted);
            }
        };

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;
        let reason = match status {
            Some(status) if status.success() => return Ok(()),
            Some(status) => match status.code() {
                Some(code) => format!("server exited with code {}", code),
                None => "server was killed by a signal".to_string(),
            },
            None => format!("timed out after {:?}", timeout),
        };

        let mut diagnostics = Vec::new();
        for (label, bytes) in [("stdout", &stdout), ("stderr", &stderr)] {
            let text = String::from_utf8_lossy(bytes);
            let text = text.trim();
            if !text.is_empty() {
                diagnostics.push(format!("--- {} ---\n{}", label, text));
            }
        }
        let log_tail = self.init_log_tail();
        if !log_tail.is_empty() {
            diagnostics.push(log_tail);
        }

        Err(Error::Initialization {
            reason,
            diagnostics: diagnostics.join("\n"),
        })
    }

    fn init_log_tail(&self) -> String {
        format_tails(
            &[("init error log", self.config.init_error_log().as_path())],
            DIAGNOSTIC_TAIL_LINES,
        )
    }
}

enum Waited {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        // A read error keeps whatever arrived before it.
        let _ = pipe.read_to_end(&mut buf).await;
    }
    buf
}

/// Output of a drain task; gives up on pipes a stray grandchild keeps open.
async fn collect(task: JoinHandle<Vec<u8>>) -> Vec<u8> {
    match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, task).await {
        Ok(Ok(bytes)) => bytes,
        _ => Vec::new(),
    }
}

/// SIGKILL the whole process group, then reap the child.
async fn kill_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    if let Err(e) = child.kill().await {
        tracing::debug!("Reaping initialization process: {}", e);
    }
}
