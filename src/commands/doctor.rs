use service_bringup::output::UserOutput;
use service_bringup::sysinfo::{format_bytes, HostReport};
use service_bringup::Config;

pub async fn run_doctor(config: &Config, out: &dyn UserOutput) -> anyhow::Result<()> {
    out.status("Checking host requirements...\n");

    let report = HostReport::collect(&config.install_root);

    out.progress("Host: ");
    out.finish_progress(report.hostname.as_deref().unwrap_or("unknown"));
    out.progress("Architecture: ");
    out.finish_progress(report.arch);
    out.progress("Available memory: ");
    out.finish_progress(
        &report
            .available_memory
            .map(format_bytes)
            .unwrap_or_else(|| "unknown".to_string()),
    );
    out.progress(&format!("Free disk ({}): ", config.install_root.display()));
    out.finish_progress(
        &report
            .free_disk
            .map(format_bytes)
            .unwrap_or_else(|| "unknown".to_string()),
    );
    out.progress("System mysqld: ");
    out.finish_progress(report.mysqld_on_path.as_deref().unwrap_or("not found (optional)"));

    out.progress("Running as root: ");
    if nix::unistd::Uid::effective().is_root() {
        out.finish_progress(&format!(
            "yes (server will run as '{}')",
            config.server.run_as_user
        ));
    } else {
        out.finish_progress("no");
    }

    let problems = report.problems();
    out.blank();
    if problems.is_empty() {
        out.success("All checks passed");
        return Ok(());
    }
    for problem in &problems {
        out.warning(&format!("  - {}", problem));
    }
    anyhow::bail!("{} check(s) failed", problems.len())
}
