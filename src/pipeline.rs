//! The bring-up pipeline: provision, initialize, configure, launch, probe,
//! bootstrap. Each stage gates the next; nothing is retried here.

use crate::bootstrap::{bootstrap, verify};
use crate::client::{write_auth_file, MysqlCli};
use crate::config::Config;
use crate::configurator::{self, ConfigParams};
use crate::credentials::{BootstrapCredentials, ConnectionInfo, CredentialStore};
use crate::error::{Error, ProbeFailure, Result};
use crate::initializer::{DataDirectory, Initializer};
use crate::output::UserOutput;
use crate::provision::{Provisioner, ServerInstallation};
use crate::readiness::{ProbeReport, ProbeSettings, ReadinessProber};
use crate::service::{Launcher, ServerProcess};
use tokio_util::sync::CancellationToken;

const STAGES: usize = 6;

/// Everything a successful bring-up produced. The server is still running.
#[derive(Debug)]
pub struct BringupReport {
    pub installation: ServerInstallation,
    pub data_dir: DataDirectory,
    pub process: ServerProcess,
    pub probe: ProbeReport,
    pub credentials: BootstrapCredentials,
    pub connection: ConnectionInfo,
    pub databases: Vec<String>,
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

pub struct Bringup<'a> {
    config: &'a Config,
    out: &'a dyn UserOutput,
    cancel: CancellationToken,
    env: fn(&str) -> Option<String>,
}

impl<'a> Bringup<'a> {
    pub fn new(config: &'a Config, out: &'a dyn UserOutput, cancel: CancellationToken) -> Self {
        Self {
            config,
            out,
            cancel,
            env: process_env,
        }
    }

    /// Replace the environment lookup used for `DB_*` overrides.
    pub fn with_env(mut self, env: fn(&str) -> Option<String>) -> Self {
        self.env = env;
        self
    }

    fn finish<T>(&self, result: Result<T>, label: impl Fn(&T) -> String) -> Result<T> {
        match &result {
            Ok(value) => self.out.finish_progress(&label(value)),
            Err(_) => self.out.finish_progress("failed"),
        }
        result
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    #[tracing::instrument(skip_all, fields(data_dir = %self.config.data_dir.display()))]
    pub async fn run(&self) -> Result<BringupReport> {
        let config = self.config;
        config.validate()?;

        let store = CredentialStore::new(&config.credentials_file);
        let connection = ConnectionInfo::from_config(config);
        let env = self.env;
        let resolved = store.resolve(config, &env)?;
        let mut creds = store.persist(&resolved, &connection)?;

        self.check_cancelled()?;
        self.out.stage(1, STAGES, "Provisioning server binaries");
        let provisioned = Provisioner::new(config)
            .with_cancel(self.cancel.clone())
            .provision()
            .await;
        let installation = self.finish(provisioned, |i| {
            if i.already_present {
                format!("{} (cached)", i.version)
            } else {
                format!("{} (installed)", i.version)
            }
        })?;

        configurator::prepare_scratch_dir(&config.scratch_dir)?;

        self.check_cancelled()?;
        self.out.stage(2, STAGES, "Initializing data directory");
        let data_dir = self.finish(
            Initializer::new(config)
                .with_cancel(self.cancel.clone())
                .initialize(&installation, &config.data_dir)
                .await,
            |d| (if d.freshly_initialized { "initialized" } else { "already initialized" }).to_string(),
        )?;
        if data_dir.freshly_initialized && creds.root_secured {
            // A new data directory has a passwordless root again.
            tracing::warn!("Data directory was recreated; root will be secured again");
            creds.root_secured = false;
            creds = store.persist(&creds, &connection)?;
        }

        self.check_cancelled()?;
        self.out.stage(3, STAGES, "Rendering server config");
        let changed = self.finish(
            configurator::render(&ConfigParams::from_config(config, &installation))
                .and_then(|rendered| configurator::write(&rendered, &config.defaults_file)),
            |changed| (if *changed { "written" } else { "unchanged" }).to_string(),
        )?;
        tracing::debug!(changed, "Server config at {}", config.defaults_file.display());

        let settings = ProbeSettings::from_config(&config.probe)?;
        let mut client = MysqlCli::new(
            &installation.client_binary,
            config.socket_path(),
            settings.query_timeout,
        );
        let auth_file = config.client_auth_file();
        if creds.root_secured {
            write_auth_file(&auth_file, &creds.root_password)?;
            client = client.with_auth_file(&auth_file);
        } else if auth_file.exists() {
            std::fs::remove_file(&auth_file)?;
        }

        self.check_cancelled()?;
        self.out.stage(4, STAGES, "Starting server");
        let mut process = self.finish(Launcher::new(config).start(&installation).await, |p| {
            format!("PID {}", p.pid())
        })?;

        self.out.stage(5, STAGES, "Waiting for server readiness");
        let probed = ReadinessProber::new(
            settings,
            config.socket_path(),
            config.error_log(),
            &client,
            self.cancel.clone(),
        )
        .probe(&mut process)
        .await;
        let probe = match probed {
            Ok(report) => {
                self.out.finish_progress(&format!("ready in {:.1}s", report.elapsed.as_secs_f64()));
                report
            }
            Err(e) => {
                self.out.finish_progress("failed");
                self.stop_after_failed_probe(&mut process, &e).await;
                return Err(e);
            }
        };

        self.out.stage(6, STAGES, "Creating database and user");
        let secure_root = !creds.root_secured;
        let applied = bootstrap(&client, &creds, secure_root).await;
        self.finish(applied, |_| "done".to_string())?;
        if secure_root {
            creds.root_secured = true;
            creds = store.persist(&creds, &connection)?;
            write_auth_file(&auth_file, &creds.root_password)?;
            client = client.with_auth_file(&auth_file);
        }

        let databases = verify(&client, &creds).await?;

        // Interrupted during bootstrap: stop the server and fail the run.
        if let Err(e) = self.check_cancelled() {
            self.stop_server(&mut process).await;
            return Err(e);
        }

        Ok(BringupReport {
            installation,
            data_dir,
            process,
            probe,
            credentials: creds,
            connection,
            databases,
        })
    }

    /// A server that never became ready (or whose bring-up was interrupted)
    /// is stopped; one that exited on its own needs nothing.
    async fn stop_after_failed_probe(&self, process: &mut ServerProcess, error: &Error) {
        let should_stop = matches!(
            error,
            Error::Interrupted
                | Error::Probe(ProbeFailure::Timeout { .. })
                | Error::Probe(ProbeFailure::ConnectionRefused { .. })
        );
        if should_stop {
            self.stop_server(process).await;
        }
    }

    async fn stop_server(&self, process: &mut ServerProcess) {
        let grace = self.config.get_shutdown_grace().unwrap_or_default();
        self.out
            .status(&format!("Stopping server (PID {})...", process.pid()));
        if let Err(e) = process.terminate(grace).await {
            tracing::warn!("Failed to stop server (PID {}): {}", process.pid(), e);
        }
    }
}
