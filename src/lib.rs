//! # Service Bring-Up
//!
//! Brings a MySQL server up on a host where the invoking user has no root
//! access, and leaves behind a database, an application account and a
//! credentials file the application can read.
//!
//! ## Stages
//!
//! 1. **Provision** server binaries (release archive, system install or apt)
//! 2. **Initialize** the data directory, once
//! 3. **Render** the server's defaults file
//! 4. **Launch** the server as a detached process group
//! 5. **Probe** until the socket exists and a query succeeds
//! 6. **Bootstrap** the database, account and grants, then secure root
//!
//! Every stage is idempotent, so rerunning after a failure picks up where the
//! previous run stopped.
//!
//! ```no_run
//! use service_bringup::{output::QuietOutput, Bringup, Parser};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), service_bringup::Error> {
//! let config = Parser::new().load_or_default(None)?;
//! let report = Bringup::new(&config, &QuietOutput, CancellationToken::new())
//!     .run()
//!     .await?;
//! println!("server running as PID {}", report.process.pid());
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod client;
pub mod config;
pub mod configurator;
pub mod credentials;
pub mod error;
pub mod initializer;
pub mod output;
pub mod pipeline;
pub mod provision;
pub mod readiness;
pub mod service;
pub mod sysinfo;

pub use config::{Config, InstallSource, Parser};
pub use error::{Error, ProbeFailure, Result};
pub use pipeline::{Bringup, BringupReport};
