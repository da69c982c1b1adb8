use service_bringup::output::UserOutput;
use service_bringup::{Bringup, BringupReport, Config};
use tokio_util::sync::CancellationToken;

pub async fn run_up(
    config: &Config,
    foreground: bool,
    cancel: CancellationToken,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let report = Bringup::new(config, out, cancel.clone()).run().await?;
    print_summary(config, &report, out);

    let BringupReport { mut process, .. } = report;
    if !foreground {
        let pid = process.detach();
        tracing::debug!(pid, "Leaving server running in the background");
        out.status("Server left running. Stop it with `bringup stop`.");
        return Ok(());
    }

    out.status("Running in foreground. Press Ctrl-C to stop the server.");
    tokio::select! {
        exited = process.wait() => {
            let code = exited?;
            out.warning(&format!(
                "Server exited on its own (exit code {})",
                code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".to_string())
            ));
            out.status(&process.log_tails(&config.error_log()));
            anyhow::bail!("server exited unexpectedly");
        }
        _ = cancel.cancelled() => {
            out.blank();
            out.status(&format!("Stopping server (PID {})...", process.pid()));
            process.terminate(config.get_shutdown_grace()?).await?;
            out.success("Server stopped");
        }
    }
    Ok(())
}

fn print_summary(config: &Config, report: &BringupReport, out: &dyn UserOutput) {
    let creds = &report.credentials;
    out.blank();
    out.success(&format!(
        "MySQL {} is ready (PID {}, ready {:.1}s after {})",
        report.installation.version,
        report.process.pid(),
        report.probe.elapsed.as_secs_f64(),
        report.process.started_at().format("%H:%M:%S UTC")
    ));
    out.status(&format!(
        "  Host:        {}:{}",
        report.connection.host, report.connection.port
    ));
    out.status(&format!(
        "  Socket:      {}",
        report.connection.socket.display()
    ));
    out.status(&format!("  Database:    {}", creds.database_name));
    out.status(&format!("  User:        {}", creds.app_user));
    out.status(&format!(
        "  Credentials: {}",
        config.credentials_file.display()
    ));
    out.status(&format!(
        "  Data dir:    {}",
        report.data_dir.path.display()
    ));
    out.blank();
}
