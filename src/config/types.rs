use super::{duration_field, expand_tilde};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_VERSION: &str = "8.0.35";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Where the server binaries come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstallSource {
    /// Download and extract the generic Linux tarball into the install root.
    #[default]
    Archive,
    /// Use a `mysqld` already on PATH.
    System,
    /// Install the distribution package with apt-get, then use it as `System`.
    Apt,
}

impl std::str::FromStr for InstallSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "archive" => Ok(InstallSource::Archive),
            "system" => Ok(InstallSource::System),
            "apt" => Ok(InstallSource::Apt),
            other => Err(format!(
                "Invalid source '{}'. Valid sources: archive, system, apt",
                other
            )),
        }
    }
}

impl std::fmt::Display for InstallSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallSource::Archive => write!(f, "archive"),
            InstallSource::System => write!(f, "system"),
            InstallSource::Apt => write!(f, "apt"),
        }
    }
}

/// Controller configuration, loaded once from `bringup.yaml` (every field optional)
/// and passed explicitly to each stage.
///
/// ```yaml
/// version: "8.0.35"
/// install_root: ~/mysql
/// data_dir: ~/mysql_data
/// scratch_dir: ~/mysql_tmp
/// server:
///   port: 3306
///   max_connections: 50
/// probe:
///   max_attempts: 120
///   poll_interval: "1s"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Server version to provision.
    pub version: String,
    pub source: InstallSource,
    /// Directory holding downloaded archives and extracted installations.
    pub install_root: PathBuf,
    pub data_dir: PathBuf,
    /// Process-owned directory for socket, pid file, logs and client auth file.
    pub scratch_dir: PathBuf,
    /// Rendered server configuration (`--defaults-file`).
    pub defaults_file: PathBuf,
    /// Key=value credentials artifact read by the application.
    pub credentials_file: PathBuf,
    pub download: DownloadConfig,
    pub server: ServerSettings,
    pub probe: ProbeConfig,
    pub database: DatabaseConfig,
    /// Bound on `mysqld --initialize-insecure` (e.g. "120s").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_timeout: Option<String>,
    /// SIGTERM-to-SIGKILL grace period when stopping a server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_grace: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            version: DEFAULT_VERSION.to_string(),
            source: InstallSource::default(),
            install_root: home.join("mysql"),
            data_dir: home.join("mysql_data"),
            scratch_dir: home.join("mysql_tmp"),
            defaults_file: home.join("my.cnf"),
            credentials_file: PathBuf::from(".mysql_credentials"),
            download: DownloadConfig::default(),
            server: ServerSettings::default(),
            probe: ProbeConfig::default(),
            database: DatabaseConfig::default(),
            init_timeout: None,
            shutdown_grace: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadConfig {
    /// URL template; `{version}`, `{series}` and `{file}` are substituted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Expected SHA-256 of the archive (hex).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Overridable values rendered into the server's defaults file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub port: u16,
    pub bind_address: String,
    pub max_connections: u32,
    pub key_buffer_size: String,
    pub max_allowed_packet: String,
    pub thread_stack: String,
    pub thread_cache_size: u32,
    /// Passed as `--user` only when the controller runs as root.
    pub run_as_user: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            max_connections: 50,
            key_buffer_size: "16M".to_string(),
            max_allowed_packet: "16M".to_string(),
            thread_stack: "192K".to_string(),
            thread_cache_size: 8,
            run_as_user: "mysql".to_string(),
        }
    }
}

/// Readiness probe bounds. Durations are strings ("1s", "500ms").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    pub poll_interval: Option<String>,
    pub max_attempts: u32,
    pub settle_delay: Option<String>,
    pub query_retries: u32,
    pub query_backoff: Option<String>,
    /// Per-invocation bound on the client binary.
    pub query_timeout: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            poll_interval: None,
            max_attempts: 90,
            settle_delay: None,
            query_retries: 6,
            query_backoff: None,
            query_timeout: None,
        }
    }
}

/// Names used when no credentials artifact exists yet; the environment
/// (`DB_NAME`, `DB_USER`) overrides these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub name: Option<String>,
    pub user: Option<String>,
}

impl Config {
    /// Expand `~` and anchor relative paths at `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        for path in [
            &mut self.install_root,
            &mut self.data_dir,
            &mut self.scratch_dir,
            &mut self.defaults_file,
            &mut self.credentials_file,
        ] {
            let expanded = expand_tilde(path.as_path());
            *path = if expanded.is_absolute() {
                expanded
            } else {
                base_dir.join(expanded)
            };
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.scratch_dir.join("mysql.sock")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.scratch_dir.join("mysql.pid")
    }

    pub fn error_log(&self) -> PathBuf {
        self.scratch_dir.join("mysql_error.log")
    }

    pub fn init_error_log(&self) -> PathBuf {
        self.scratch_dir.join("init_error.log")
    }

    pub fn stdout_log(&self) -> PathBuf {
        self.scratch_dir.join("mysqld.stdout.log")
    }

    pub fn stderr_log(&self) -> PathBuf {
        self.scratch_dir.join("mysqld.stderr.log")
    }

    /// Option file carrying the root password for the client binary.
    pub fn client_auth_file(&self) -> PathBuf {
        self.scratch_dir.join("client.cnf")
    }

    pub fn get_init_timeout(&self) -> Result<Duration> {
        duration_field(self.init_timeout.as_deref(), "init_timeout", DEFAULT_INIT_TIMEOUT)
    }

    pub fn get_shutdown_grace(&self) -> Result<Duration> {
        duration_field(
            self.shutdown_grace.as_deref(),
            "shutdown_grace",
            DEFAULT_SHUTDOWN_GRACE,
        )
    }

    pub fn get_download_timeout(&self) -> Result<Duration> {
        duration_field(
            self.download.timeout.as_deref(),
            "download.timeout",
            DEFAULT_DOWNLOAD_TIMEOUT,
        )
    }

    /// Check cross-field invariants before any stage runs.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(Error::Config("version must not be empty".to_string()));
        }
        if self.server.port == 0 {
            return Err(Error::Config("server.port must be non-zero".to_string()));
        }
        if self.probe.max_attempts == 0 {
            return Err(Error::Config("probe.max_attempts must be at least 1".to_string()));
        }
        if self.probe.query_retries == 0 {
            return Err(Error::Config("probe.query_retries must be at least 1".to_string()));
        }
        if self.scratch_dir == self.data_dir
            || self.scratch_dir.starts_with(&self.data_dir)
            || self.data_dir.starts_with(&self.scratch_dir)
        {
            return Err(Error::Config(format!(
                "scratch_dir '{}' and data_dir '{}' must be separate directories",
                self.scratch_dir.display(),
                self.data_dir.display()
            )));
        }
        if let Some(ref digest) = self.download.sha256 {
            if digest.len() != 64 || hex::decode(digest).is_err() {
                return Err(Error::Config(format!(
                    "download.sha256 '{}' is not a 64-character hex digest",
                    digest
                )));
            }
        }

        self.get_init_timeout()?;
        self.get_shutdown_grace()?;
        self.get_download_timeout()?;
        crate::readiness::ProbeSettings::from_config(&self.probe)?;
        Ok(())
    }
}
