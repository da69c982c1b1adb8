use super::stale::{terminate_stale, ServerIdentity};
use super::ServerProcess;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::provision::ServerInstallation;
use std::path::Path;

/// Starts the server against the rendered defaults file.
pub struct Launcher<'a> {
    config: &'a Config,
}

impl<'a> Launcher<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Stop any stale server for this data directory, clear its leftovers and
    /// spawn a fresh one. Does not wait for readiness.
    #[tracing::instrument(skip_all, fields(data_dir = %self.config.data_dir.display()))]
    pub async fn start(&self, installation: &ServerInstallation) -> Result<ServerProcess> {
        let grace = self.config.get_shutdown_grace()?;
        let identity = ServerIdentity::from_config(self.config);
        let stopped = terminate_stale(&identity, grace).await;
        if stopped > 0 {
            tracing::info!("Stopped {} stale server(s)", stopped);
        }

        let socket = self.config.socket_path();
        let socket_lock = socket.with_extension("sock.lock");
        for leftover in [socket.as_path(), socket_lock.as_path(), self.config.pid_file().as_path()] {
            remove_leftover(leftover)?;
        }

        let mut args = vec![format!(
            "--defaults-file={}",
            self.config.defaults_file.display()
        )];
        if nix::unistd::Uid::effective().is_root() {
            args.push(format!("--user={}", self.config.server.run_as_user));
        }

        let process = ServerProcess::spawn(
            &installation.server_binary,
            &args,
            &self.config.stdout_log(),
            &self.config.stderr_log(),
        )?;
        tracing::info!(pid = process.pid(), "Server launched");
        Ok(process)
    }
}

fn remove_leftover(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("Removed stale {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Launch(format!(
            "cannot remove stale {}: {}",
            path.display(),
            e
        ))),
    }
}
