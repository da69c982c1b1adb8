use service_bringup::client::{MysqlCli, SqlClient, Statement};
use service_bringup::output::UserOutput;
use service_bringup::provision::Provisioner;
use service_bringup::readiness::ProbeSettings;
use service_bringup::service::pid_is_alive;
use service_bringup::service::stale::read_pid_file;
use service_bringup::Config;

pub async fn run_status(config: &Config, json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let pid = read_pid_file(&config.pid_file());
    let alive = pid.map(pid_is_alive).unwrap_or(false);
    let socket = config.socket_path();
    let socket_present = socket.exists();

    // Only ask the server when there is something to ask.
    let query = if alive && socket_present {
        Some(query_ready(config).await)
    } else {
        None
    };

    if json {
        let status = serde_json::json!({
            "pid": pid,
            "running": alive,
            "socket": socket.display().to_string(),
            "socket_present": socket_present,
            "accepting_queries": query.as_ref().map(|q| q.is_ok()),
            "query_error": query.as_ref().and_then(|q| q.as_ref().err()),
            "port": config.server.port,
            "data_dir": config.data_dir.display().to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    match (pid, alive) {
        (Some(pid), true) => out.success(&format!("Server running (PID {})", pid)),
        (Some(pid), false) => out.warning(&format!("Server not running (stale pid file names {})", pid)),
        (None, _) => out.status("Server not running"),
    }
    out.status(&format!(
        "  Socket:   {} ({})",
        socket.display(),
        if socket_present { "present" } else { "missing" }
    ));
    out.status(&format!("  Port:     {}", config.server.port));
    out.status(&format!("  Data dir: {}", config.data_dir.display()));
    match query {
        Some(Ok(())) => out.status("  Queries:  accepted"),
        Some(Err(e)) => out.warning(&format!("  Queries:  failing ({})", e)),
        None => {}
    }
    Ok(())
}

async fn query_ready(config: &Config) -> Result<(), String> {
    let client_binary = Provisioner::new(config)
        .installed_client()
        .ok_or_else(|| "no mysql client found".to_string())?;
    let timeout = ProbeSettings::from_config(&config.probe)
        .map(|s| s.query_timeout)
        .unwrap_or(ProbeSettings::default().query_timeout);

    let mut client = MysqlCli::new(client_binary, config.socket_path(), timeout);
    let auth_file = config.client_auth_file();
    if auth_file.exists() {
        client = client.with_auth_file(auth_file);
    }
    match client.execute(&[Statement::Ping]).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_access_denied() => Err(format!(
            "access denied for root; {} may not match the server",
            config.credentials_file.display()
        )),
        Err(e) => Err(e.to_string()),
    }
}
