use chrono::{DateTime, Utc};
use service_bringup::output::UserOutput;
use service_bringup::service::stale::{find_stale_servers, read_pid_file, terminate_stale, ServerIdentity};
use service_bringup::service::{pid_is_alive, ServerProcess};
use service_bringup::Config;

/// Stop the server named by the pid file, then any other server still running
/// against this config's data directory.
pub async fn run_stop(config: &Config, out: &dyn UserOutput) -> anyhow::Result<()> {
    let grace = config.get_shutdown_grace()?;
    let identity = ServerIdentity::from_config(config);
    let mut stopped = 0;

    let pid_file = config.pid_file();
    if let Some(pid) = read_pid_file(&pid_file).filter(|pid| pid_is_alive(*pid)) {
        if find_stale_servers(&identity).contains(&pid) {
            let started_at: DateTime<Utc> = std::fs::metadata(&pid_file)
                .and_then(|m| m.modified())
                .map(DateTime::from)
                .unwrap_or_else(|_| Utc::now());
            let mut process =
                ServerProcess::attach(pid, started_at, &config.stdout_log(), &config.stderr_log());
            out.status(&format!(
                "Stopping server (PID {}, up since {})...",
                pid,
                process.started_at().format("%Y-%m-%d %H:%M:%S UTC")
            ));
            process.terminate(grace).await?;
            stopped += 1;
        } else {
            out.warning(&format!(
                "{} names PID {}, which is not our server; leaving it alone",
                pid_file.display(),
                pid
            ));
        }
    }

    let others = find_stale_servers(&identity);
    for pid in &others {
        out.status(&format!("Stopping server (PID {})...", pid));
    }
    stopped += terminate_stale(&identity, grace).await;

    let survivors = find_stale_servers(&identity);
    if !survivors.is_empty() {
        anyhow::bail!(
            "server(s) still running after stop: {}",
            survivors
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    if stopped == 0 {
        out.status("No server running.");
    } else {
        out.success(&format!("Stopped {} server(s)", stopped));
    }
    Ok(())
}
