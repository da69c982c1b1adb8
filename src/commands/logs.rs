use crate::cli::LogKind;
use service_bringup::output::UserOutput;
use service_bringup::service::log_tail::read_tail;
use service_bringup::Config;

pub fn run_logs(
    config: &Config,
    kind: LogKind,
    lines: usize,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let path = match kind {
        LogKind::Error => config.error_log(),
        LogKind::Stdout => config.stdout_log(),
        LogKind::Stderr => config.stderr_log(),
        LogKind::Init => config.init_error_log(),
    };
    if !path.exists() {
        out.status(&format!("No log at {}", path.display()));
        return Ok(());
    }

    for line in read_tail(&path, lines)? {
        println!("{}", line);
    }
    Ok(())
}
