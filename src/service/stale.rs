//! Detection and cleanup of servers left running by an earlier invocation.
//!
//! A candidate is only signalled after its command line has been read back
//! and confirmed to be a `mysqld` serving this data directory.

use super::process::pid_is_alive;
use crate::error::validate_pid;
use nix::sys::signal::{self, killpg, Signal};
use nix::unistd::getpgid;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Identifies the servers that belong to one bring-up.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub pid_file: PathBuf,
    pub data_dir: PathBuf,
    pub defaults_file: PathBuf,
}

impl ServerIdentity {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            pid_file: config.pid_file(),
            data_dir: config.data_dir.clone(),
            defaults_file: config.defaults_file.clone(),
        }
    }

    /// Whether a command line is a `mysqld` naming our data dir or defaults file.
    pub fn matches(&self, cmdline: &[String]) -> bool {
        is_mysqld(cmdline) && self.names_us(cmdline)
    }

    fn names_us(&self, cmdline: &[String]) -> bool {
        let datadir = format!("--datadir={}", self.data_dir.display());
        let defaults = format!("--defaults-file={}", self.defaults_file.display());
        cmdline.iter().any(|arg| *arg == datadir || *arg == defaults)
    }
}

/// The first two argv entries cover both a direct exec and `sh mysqld ...`.
fn is_mysqld(cmdline: &[String]) -> bool {
    cmdline.iter().take(2).any(|arg| {
        Path::new(arg)
            .file_name()
            .map(|name| name.to_string_lossy().starts_with("mysqld"))
            .unwrap_or(false)
    })
}

/// PID recorded in a server pid file, if readable.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn read_cmdline(pid: u32) -> Option<Vec<String>> {
    let raw = std::fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
    if raw.is_empty() {
        return None;
    }
    Some(
        raw.split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part).into_owned())
            .collect(),
    )
}

/// Running servers that belong to `identity`, excluding this process.
///
/// The pid file is consulted first; the `/proc` scan covers servers whose pid
/// file was removed or never written.
pub fn find_stale_servers(identity: &ServerIdentity) -> Vec<u32> {
    let own_pid = std::process::id();
    let mut found = Vec::new();

    if let Some(pid) = read_pid_file(&identity.pid_file) {
        // The pid file names a mysqld by construction, so only require it to be
        // a mysqld; its argv need not repeat our paths.
        if pid != own_pid
            && pid_is_alive(pid)
            && read_cmdline(pid).map(|c| is_mysqld(&c)).unwrap_or(false)
        {
            found.push(pid);
        }
    }

    if let Ok(entries) = std::fs::read_dir("/proc") {
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            if pid == own_pid || found.contains(&pid) {
                continue;
            }
            if let Some(cmdline) = read_cmdline(pid) {
                if identity.matches(&cmdline) && pid_is_alive(pid) {
                    found.push(pid);
                }
            }
        }
    }

    found
}

/// SIGTERM each stale server, wait up to `grace`, then SIGKILL survivors.
/// Returns how many were signalled. Failures are logged, never returned.
pub async fn terminate_stale(identity: &ServerIdentity, grace: Duration) -> usize {
    let pids = find_stale_servers(identity);
    let mut signalled = 0;

    for pid in pids {
        let nix_pid = match validate_pid(pid) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Skipping stale server: {}", e);
                continue;
            }
        };

        // Re-verify right before signalling; the PID may have been reused.
        let still_ours = read_cmdline(pid)
            .map(|c| is_mysqld(&c))
            .unwrap_or(false);
        if !still_ours {
            continue;
        }

        tracing::info!(pid, "Stopping stale server for {}", identity.data_dir.display());

        let is_group_leader = getpgid(Some(nix_pid)).ok() == Some(nix_pid);
        let send = |sig: Signal| -> bool {
            if is_group_leader {
                killpg(nix_pid, sig).is_ok()
            } else {
                signal::kill(nix_pid, sig).is_ok()
            }
        };

        if !send(Signal::SIGTERM) {
            continue;
        }
        signalled += 1;

        if !wait_gone(pid, grace).await {
            tracing::warn!(pid, "Stale server ignored SIGTERM, sending SIGKILL");
            let _ = send(Signal::SIGKILL);
            wait_gone(pid, Duration::from_secs(2)).await;
        }
    }

    signalled
}

async fn wait_gone(pid: u32, limit: Duration) -> bool {
    let step = Duration::from_millis(100);
    let mut waited = Duration::ZERO;
    while waited < limit {
        if !pid_is_alive(pid) {
            return true;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    !pid_is_alive(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ServerIdentity {
        ServerIdentity {
            pid_file: PathBuf::from("/run/db/mysql.pid"),
            data_dir: PathBuf::from("/srv/mysql_data"),
            defaults_file: PathBuf::from("/srv/my.cnf"),
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn matches_server_by_defaults_file() {
        let id = identity();
        assert!(id.matches(&args(&["/opt/mysql/bin/mysqld", "--defaults-file=/srv/my.cnf"])));
        assert!(id.matches(&args(&["bash", "/tmp/stub/mysqld", "--defaults-file=/srv/my.cnf"])));
    }

    #[test]
    fn matches_initializer_by_datadir() {
        let id = identity();
        assert!(id.matches(&args(&[
            "mysqld",
            "--initialize-insecure",
            "--datadir=/srv/mysql_data"
        ])));
    }

    #[test]
    fn ignores_other_servers_and_programs() {
        let id = identity();
        assert!(!id.matches(&args(&["mysqld", "--defaults-file=/etc/other.cnf"])));
        assert!(!id.matches(&args(&["vim", "--datadir=/srv/mysql_data"])));
        assert!(!id.matches(&args(&["mysqld", "--datadir=/srv/mysql_data_2"])));
    }

    #[test]
    fn pid_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mysql.pid");
        assert_eq!(read_pid_file(&path), None);
        std::fs::write(&path, "4242\n").unwrap();
        assert_eq!(read_pid_file(&path), Some(4242));
        std::fs::write(&path, "garbage").unwrap();
        assert_eq!(read_pid_file(&path), None);
    }

    #[tokio::test]
    async fn nothing_to_terminate_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let id = ServerIdentity {
            pid_file: dir.path().join("mysql.pid"),
            data_dir: dir.path().join("data"),
            defaults_file: dir.path().join("my.cnf"),
        };
        assert_eq!(terminate_stale(&id, Duration::from_millis(100)).await, 0);
    }
}
