use clap::{Parser, Subcommand, ValueEnum};
use service_bringup::InstallSource;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bringup")]
#[command(about = "Provision, start and bootstrap a MySQL server without root access")]
pub struct Cli {
    /// Config file path (defaults to bringup.yaml in this or a parent directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Suppress progress output; errors are still printed
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision, initialize, start and bootstrap the server
    Up {
        /// Stay attached and stop the server on Ctrl-C
        #[arg(short, long)]
        foreground: bool,

        /// Where server binaries come from (archive, system, apt)
        #[arg(long, value_name = "SOURCE")]
        source: Option<InstallSource>,
    },
    /// Stop a server started by `up`
    Stop,
    /// Show whether the server is running and accepting queries
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show server logs
    Logs {
        /// Which log to show
        #[arg(value_enum, default_value = "error")]
        log: LogKind,

        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
    /// Print the persisted connection settings (passwords masked)
    Credentials {
        /// Include passwords in the output
        #[arg(long)]
        show_passwords: bool,
    },
    /// Check host requirements
    Doctor,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogKind {
    /// Server error log
    Error,
    /// Captured stdout of the server process
    Stdout,
    /// Captured stderr of the server process
    Stderr,
    /// Error log of data directory initialization
    Init,
}
