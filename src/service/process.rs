use super::log_tail::{format_tails, DIAGNOSTIC_TAIL_LINES};
use crate::error::{validate_pid, validate_pid_for_check, Error, Result};
use chrono::{DateTime, Utc};
use nix::sys::signal::{self, killpg, Signal};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_WAIT: Duration = Duration::from_secs(2);

/// A spawned (or re-attached) server process.
///
/// Liveness is never cached: every [`is_alive`](Self::is_alive) call asks the
/// OS, through the child handle when we own one, otherwise through the PID.
#[derive(Debug)]
pub struct ServerProcess {
    pid: u32,
    child: Option<Child>,
    exit_code: Option<i32>,
    exited: bool,
    started_at: DateTime<Utc>,
    stdout_log: PathBuf,
    stderr_log: PathBuf,
}

impl ServerProcess {
    /// Spawn `program` in its own process group with stdin closed and
    /// stdout/stderr appended to the given log files. Returns immediately.
    pub fn spawn(
        program: &Path,
        args: &[String],
        stdout_log: &Path,
        stderr_log: &Path,
    ) -> Result<Self> {
        let open_log = |path: &Path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::Launch(format!("cannot open log {}: {}", path.display(), e)))
        };
        let stdout = open_log(stdout_log)?;
        let stderr = open_log(stderr_log)?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(false) // the server outlives the controller when detached
            .process_group(0)
            .spawn()
            .map_err(|e| Error::Launch(format!("cannot execute {}: {}", program.display(), e)))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::Launch(format!("{} exited before reporting a PID", program.display())))?;

        tracing::debug!(pid, program = %program.display(), ?args, "Spawned server process");

        Ok(Self {
            pid,
            child: Some(child),
            exit_code: None,
            exited: false,
            started_at: Utc::now(),
            stdout_log: stdout_log.to_path_buf(),
            stderr_log: stderr_log.to_path_buf(),
        })
    }

    /// Track a server started by an earlier invocation, known only by PID.
    pub fn attach(pid: u32, started_at: DateTime<Utc>, stdout_log: &Path, stderr_log: &Path) -> Self {
        Self {
            pid,
            child: None,
            exit_code: None,
            exited: false,
            started_at,
            stdout_log: stdout_log.to_path_buf(),
            stderr_log: stderr_log.to_path_buf(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }


    /// Exit code once the process has been reaped; `None` while running or
    /// when it died from a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_alive(&mut self) -> bool {
        if self.exited {
            return false;
        }
        if let Some(child) = self.child.as_mut() {
            // try_wait reaps zombies, so an exited child is seen as dead.
            return match child.try_wait() {
                Ok(Some(status)) => {
                    self.mark_exited(status.code());
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    tracing::warn!(pid = self.pid, "Error checking server process: {}", e);
                    false
                }
            };
        }
        pid_is_alive(self.pid)
    }

    fn mark_exited(&mut self, code: Option<i32>) {
        self.exited = true;
        self.exit_code = code;
    }

    /// Wait for the process to exit. Without a child handle this polls the PID.
    pub async fn wait(&mut self) -> Result<Option<i32>> {
        if self.exited {
            return Ok(self.exit_code);
        }
        if let Some(child) = self.child.as_mut() {
            let status = child.wait().await?;
            self.mark_exited(status.code());
            return Ok(self.exit_code);
        }
        while pid_is_alive(self.pid) {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        self.mark_exited(None);
        Ok(None)
    }

    /// SIGTERM the process group, wait up to `grace`, then SIGKILL.
    #[tracing::instrument(skip(self), fields(pid = self.pid))]
    pub async fn terminate(&mut self, grace: Duration) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }
        let pid = validate_pid(self.pid)?;

        if send_signal(pid, Signal::SIGTERM).is_err() {
            // Raced with exit.
            self.is_alive();
            return Ok(());
        }

        if !self.wait_for_exit(grace).await {
            tracing::warn!(
                "Server did not exit after SIGTERM (grace period: {:?}), sending SIGKILL",
                grace
            );
            let _ = send_signal(pid, Signal::SIGKILL);
            if !self.wait_for_exit(KILL_WAIT).await {
                return Err(Error::Launch(format!(
                    "server process {} survived SIGKILL",
                    self.pid
                )));
            }
        }
        tracing::info!("Server process stopped");
        Ok(())
    }

    async fn wait_for_exit(&mut self, limit: Duration) -> bool {
        if let Some(child) = self.child.as_mut() {
            return match tokio::time::timeout(limit, child.wait()).await {
                Ok(Ok(status)) => {
                    self.mark_exited(status.code());
                    true
                }
                Ok(Err(e)) => {
                    tracing::warn!("Error waiting for server process: {}", e);
                    !self.is_alive()
                }
                Err(_) => false,
            };
        }
        let polls = (limit.as_millis() / STOP_POLL_INTERVAL.as_millis()).max(1);
        for _ in 0..polls {
            if !pid_is_alive(self.pid) {
                self.mark_exited(None);
                return true;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        if pid_is_alive(self.pid) {
            false
        } else {
            self.mark_exited(None);
            true
        }
    }

    /// Release the child handle without stopping the server. Returns the PID.
    pub fn detach(mut self) -> u32 {
        self.child.take();
        self.pid
    }

    /// Tails of stdout, stderr and the server error log, for failure reports.
    pub fn log_tails(&self, error_log: &Path) -> String {
        format_tails(
            &[
                ("stdout", self.stdout_log.as_path()),
                ("stderr", self.stderr_log.as_path()),
                ("error log", error_log),
            ],
            DIAGNOSTIC_TAIL_LINES,
        )
    }
}

/// Signal the whole group, falling back to the single process.
fn send_signal(pid: nix::unistd::Pid, sig: Signal) -> nix::Result<()> {
    killpg(pid, sig).or_else(|_| signal::kill(pid, sig))
}

/// Whether a PID names a running (not zombie or stopped) process.
pub fn pid_is_alive(pid: u32) -> bool {
    let Some(nix_pid) = validate_pid_for_check(pid) else {
        return false;
    };
    if signal::kill(nix_pid, None).is_err() {
        return false;
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            if let Some(line) = status.lines().find(|l| l.starts_with("State:")) {
                // "State:\tZ (zombie)"
                match line.chars().skip("State:".len()).find(|c| c.is_alphabetic()) {
                    Some('Z' | 'T' | 'X' | 'x') => return false,
                    Some(_) => return true,
                    None => {}
                }
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs(dir: &Path) -> (PathBuf, PathBuf) {
        (dir.join("out.log"), dir.join("err.log"))
    }

    #[tokio::test]
    async fn exited_child_is_not_alive_and_keeps_code() {
        let dir = tempfile::tempdir().unwrap();
        let (out, err) = logs(dir.path());
        let mut process = ServerProcess::spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), "echo boom >&2; exit 3".to_string()],
            &out,
            &err,
        )
        .unwrap();

        assert_eq!(process.wait().await.unwrap(), Some(3));
        assert!(!process.is_alive());
        assert_eq!(process.exit_code(), Some(3));
        assert!(process.log_tails(&dir.path().join("none.log")).contains("boom"));
    }

    #[tokio::test]
    async fn terminate_stops_running_child() {
        let dir = tempfile::tempdir().unwrap();
        let (out, err) = logs(dir.path());
        let mut process = ServerProcess::spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), "exec sleep 30".to_string()],
            &out,
            &err,
        )
        .unwrap();
        assert!(process.is_alive());

        process.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn terminate_escalates_to_sigkill() {
        let dir = tempfile::tempdir().unwrap();
        let (out, err) = logs(dir.path());
        let mut process = ServerProcess::spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), "trap '' TERM; while true; do sleep 0.1; done".to_string()],
            &out,
            &err,
        )
        .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        process.terminate(Duration::from_millis(300)).await.unwrap();
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn attached_process_is_stopped_by_pid() {
        let dir = tempfile::tempdir().unwrap();
        let (out, err) = logs(dir.path());
        let spawned = ServerProcess::spawn(
            Path::new("/bin/sh"),
            &["-c".to_string(), "exec sleep 30".to_string()],
            &out,
            &err,
        )
        .unwrap();
        let pid = spawned.detach();

        let mut attached = ServerProcess::attach(pid, Utc::now(), &out, &err);
        assert!(attached.is_alive());
        attached.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(!attached.is_alive());
        assert_eq!(attached.wait().await.unwrap(), None);
    }

    #[tokio::test]
    async fn spawn_failure_is_launch_error() {
        let dir = tempfile::tempdir().unwrap();
        let (out, err) = logs(dir.path());
        let result = ServerProcess::spawn(Path::new("/nonexistent/mysqld"), &[], &out, &err);
        assert!(matches!(result, Err(Error::Launch(_))));
    }

    #[test]
    fn pid_liveness() {
        assert!(pid_is_alive(std::process::id()));
        assert!(!pid_is_alive(0));
        assert!(!pid_is_alive(4_194_303));
    }
}
