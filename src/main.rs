mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use service_bringup::output::{CliOutput, QuietOutput, UserOutput};
use service_bringup::{Error as BringupError, Parser as ConfigParser};
use tokio_util::sync::CancellationToken;

/// Exit code for a run stopped by SIGINT, as shells report it.
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        if let Some(bringup_error) = e.downcast_ref::<BringupError>() {
            if matches!(bringup_error, BringupError::Interrupted) {
                eprintln!("interrupted");
                std::process::exit(EXIT_INTERRUPTED);
            }
            eprintln!("Error: {}", bringup_error.with_suggestion());
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let out: &dyn UserOutput = if cli.quiet { &QuietOutput } else { &CliOutput };
    let mut config = ConfigParser::new().load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Up { foreground, source } => {
            if let Some(source) = source {
                config.source = source;
            }
            let cancel = CancellationToken::new();
            spawn_interrupt_listener(cancel.clone());
            commands::run_up(&config, foreground, cancel, out).await
        }
        Commands::Stop => commands::run_stop(&config, out).await,
        Commands::Status { json } => {
            let out: &dyn UserOutput = if json { &QuietOutput } else { out };
            commands::run_status(&config, json, out).await
        }
        Commands::Logs { log, lines } => commands::run_logs(&config, log, lines, out),
        Commands::Credentials { show_passwords } => {
            commands::run_credentials(&config, show_passwords, out)
        }
        Commands::Doctor => commands::run_doctor(&config, out).await,
    }
}

/// Cancel `token` on the first Ctrl-C; a second one exits immediately.
fn spawn_interrupt_listener(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::info!("Interrupt received, stopping");
        token.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(EXIT_INTERRUPTED);
        }
    });
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
