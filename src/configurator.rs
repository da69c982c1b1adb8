//! Rendering the server's defaults file.
//!
//! [`render`] is pure: it validates parameters into a [`RuntimeConfig`], whose
//! [`to_ini`](RuntimeConfig::to_ini) output depends on nothing but its fields.
//! [`write`] is the only function that touches the filesystem.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::provision::ServerInstallation;
use std::fmt::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Inputs to [`render`], typically built with [`ConfigParams::from_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigParams {
    pub basedir: PathBuf,
    pub data_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub error_log: PathBuf,
    pub port: u16,
    pub bind_address: String,
    pub max_connections: u32,
    pub key_buffer_size: String,
    pub max_allowed_packet: String,
    pub thread_stack: String,
    pub thread_cache_size: u32,
}

impl ConfigParams {
    pub fn from_config(config: &Config, installation: &ServerInstallation) -> Self {
        let server = &config.server;
        Self {
            basedir: installation.binary_root.clone(),
            data_dir: config.data_dir.clone(),
            scratch_dir: config.scratch_dir.clone(),
            socket_path: config.socket_path(),
            pid_file: config.pid_file(),
            error_log: config.error_log(),
            port: server.port,
            bind_address: server.bind_address.clone(),
            max_connections: server.max_connections,
            key_buffer_size: server.key_buffer_size.clone(),
            max_allowed_packet: server.max_allowed_packet.clone(),
            thread_stack: server.thread_stack.clone(),
            thread_cache_size: server.thread_cache_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_connections: u32,
    pub key_buffer_size: String,
    pub max_allowed_packet: String,
    pub thread_stack: String,
    pub thread_cache_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub error_log: PathBuf,
}

/// Validated server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub basedir: PathBuf,
    pub data_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub socket_path: PathBuf,
    pub pid_file: PathBuf,
    pub port: u16,
    pub bind_address: String,
    pub resource_limits: ResourceLimits,
    pub log_paths: LogPaths,
}

fn check_text(field: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.contains(['\n', '\r', '\0']) {
        return Err(Error::Config(format!(
            "{} must be a non-empty single line, got {:?}",
            field, value
        )));
    }
    Ok(())
}

fn check_path(field: &str, path: &Path) -> Result<()> {
    check_text(field, &path.to_string_lossy())?;
    if !path.is_absolute() {
        return Err(Error::Config(format!(
            "{} must be an absolute path, got {}",
            field,
            path.display()
        )));
    }
    Ok(())
}

/// Sizes are digits with an optional K, M or G suffix ("16M").
fn check_size(field: &str, value: &str) -> Result<()> {
    let digits = value.strip_suffix(['K', 'M', 'G', 'k', 'm', 'g']).unwrap_or(value);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Config(format!(
            "{} must be a size like \"16M\", got {:?}",
            field, value
        )));
    }
    Ok(())
}

fn check_in_scratch(field: &str, path: &Path, scratch_dir: &Path) -> Result<()> {
    if path == scratch_dir || !path.starts_with(scratch_dir) {
        return Err(Error::Config(format!(
            "{} {} must live in the scratch directory {}",
            field,
            path.display(),
            scratch_dir.display()
        )));
    }
    Ok(())
}

/// Validate `params` into a [`RuntimeConfig`].
pub fn render(params: &ConfigParams) -> Result<RuntimeConfig> {
    for (field, path) in [
        ("basedir", &params.basedir),
        ("data_dir", &params.data_dir),
        ("scratch_dir", &params.scratch_dir),
        ("socket", &params.socket_path),
        ("pid_file", &params.pid_file),
        ("error_log", &params.error_log),
    ] {
        check_path(field, path)?;
    }
    check_text("bind_address", &params.bind_address)?;
    if params.bind_address.contains(char::is_whitespace) {
        return Err(Error::Config(format!(
            "bind_address must not contain whitespace, got {:?}",
            params.bind_address
        )));
    }
    for (field, value) in [
        ("key_buffer_size", &params.key_buffer_size),
        ("max_allowed_packet", &params.max_allowed_packet),
        ("thread_stack", &params.thread_stack),
    ] {
        check_size(field, value)?;
    }
    if params.port == 0 {
        return Err(Error::Config("port must be non-zero".to_string()));
    }

    if params.scratch_dir.starts_with(&params.data_dir)
        || params.data_dir.starts_with(&params.scratch_dir)
    {
        return Err(Error::Config(format!(
            "scratch directory {} must be separate from the data directory {}",
            params.scratch_dir.display(),
            params.data_dir.display()
        )));
    }
    for (field, path) in [
        ("socket", &params.socket_path),
        ("pid_file", &params.pid_file),
        ("error_log", &params.error_log),
    ] {
        check_in_scratch(field, path, &params.scratch_dir)?;
    }

    Ok(RuntimeConfig {
        basedir: params.basedir.clone(),
        data_dir: params.data_dir.clone(),
        scratch_dir: params.scratch_dir.clone(),
        socket_path: params.socket_path.clone(),
        pid_file: params.pid_file.clone(),
        port: params.port,
        bind_address: params.bind_address.clone(),
        resource_limits: ResourceLimits {
            max_connections: params.max_connections,
            key_buffer_size: params.key_buffer_size.to_uppercase(),
            max_allowed_packet: params.max_allowed_packet.to_uppercase(),
            thread_stack: params.thread_stack.to_uppercase(),
            thread_cache_size: params.thread_cache_size,
        },
        log_paths: LogPaths {
            error_log: params.error_log.clone(),
        },
    })
}

impl RuntimeConfig {
    pub fn to_ini(&self) -> String {
        let limits = &self.resource_limits;
        let socket = self.socket_path.display();
        let mut ini = String::new();

        // Writing to a String cannot fail.
        let _ = writeln!(ini, "# Generated by bringup; edits are overwritten on the next run.");
        let _ = writeln!(ini, "[mysqld]");
        let _ = writeln!(ini, "basedir={}", self.basedir.display());
        let _ = writeln!(ini, "datadir={}", self.data_dir.display());
        let _ = writeln!(ini, "socket={}", socket);
        let _ = writeln!(ini, "pid-file={}", self.pid_file.display());
        let _ = writeln!(ini, "port={}", self.port);
        let _ = writeln!(ini, "bind-address={}", self.bind_address);
        let _ = writeln!(ini, "tmpdir={}", self.scratch_dir.display());
        let _ = writeln!(ini, "max_connections={}", limits.max_connections);
        let _ = writeln!(ini, "key_buffer_size={}", limits.key_buffer_size);
        let _ = writeln!(ini, "max_allowed_packet={}", limits.max_allowed_packet);
        let _ = writeln!(ini, "thread_stack={}", limits.thread_stack);
        let _ = writeln!(ini, "thread_cache_size={}", limits.thread_cache_size);
        let _ = writeln!(ini, "log-error={}", self.log_paths.error_log.display());
        let _ = writeln!(ini, "skip-name-resolve");
        let _ = writeln!(ini);
        let _ = writeln!(ini, "[client]");
        let _ = writeln!(ini, "socket={}", socket);
        let _ = writeln!(ini, "port={}", self.port);
        let _ = writeln!(ini);
        let _ = writeln!(ini, "[mysql]");
        let _ = writeln!(ini, "socket={}", socket);
        ini
    }
}

/// Write the rendered file, creating parent directories. Returns whether the
/// content on disk changed.
pub fn write(config: &RuntimeConfig, path: &Path) -> Result<bool> {
    let content = config.to_ini();
    let io_err = |e: std::io::Error| {
        Error::Config(format!("cannot write server config {}: {}", path.display(), e))
    };

    if let Ok(existing) = std::fs::read_to_string(path) {
        if existing == content {
            tracing::debug!("{} is up to date", path.display());
            return Ok(false);
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, &content).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    tracing::info!("Wrote server config {}", path.display());
    Ok(true)
}

/// Create the scratch directory, readable only by the current user.
pub fn prepare_scratch_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| {
        Error::Config(format!(
            "cannot create scratch directory {}: {}",
            path.display(),
            e
        ))
    })?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).map_err(|e| {
        Error::Config(format!(
            "cannot restrict scratch directory {}: {}",
            path.display(),
            e
        ))
    })
}
