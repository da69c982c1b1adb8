//! Acquiring server binaries: cached or downloaded release archives, or an
//! installation already on the host.

mod archive;
mod download;
mod platform;

pub use archive::extract_archive;
pub use download::{download, verify_file};
pub use platform::{ArchiveSpec, DEFAULT_URL_TEMPLATE};

use crate::config::{Config, InstallSource};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// A resolved set of server binaries. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInstallation {
    /// Base directory passed to the server as `basedir`.
    pub binary_root: PathBuf,
    pub version: String,
    /// True when nothing had to be downloaded or extracted.
    pub already_present: bool,
    pub server_binary: PathBuf,
    pub client_binary: PathBuf,
    pub admin_binary: PathBuf,
}

impl ServerInstallation {
    /// Installation laid out as a release archive: `<root>/bin/{mysqld,mysql,mysqladmin}`.
    pub fn from_release_dir(root: &Path, version: &str, already_present: bool) -> Result<Self> {
        let bin = root.join("bin");
        let server_binary = bin.join("mysqld");
        if !server_binary.is_file() {
            return Err(Error::Resolution(format!(
                "{} has no bin/mysqld",
                root.display()
            )));
        }
        Ok(Self {
            binary_root: root.to_path_buf(),
            version: version.to_string(),
            already_present,
            server_binary,
            client_binary: bin.join("mysql"),
            admin_binary: bin.join("mysqladmin"),
        })
    }
}

pub struct Provisioner<'a> {
    config: &'a Config,
    cancel: CancellationToken,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve an installation from the configured source.
    pub async fn provision(&self) -> Result<ServerInstallation> {
        match self.config.source {
            InstallSource::Archive => {
                self.acquire(&self.config.version, &self.config.install_root)
                    .await
            }
            InstallSource::System => locate_system().await,
            InstallSource::Apt => {
                install_with_apt().await?;
                locate_system().await
            }
        }
    }

    /// Client binary of an existing installation. Never downloads or installs.
    pub fn installed_client(&self) -> Option<PathBuf> {
        match self.config.source {
            InstallSource::Archive => {
                let spec = ArchiveSpec::for_host(&self.config.version).ok()?;
                let client = self
                    .config
                    .install_root
                    .join(spec.dir_name())
                    .join("bin")
                    .join("mysql");
                client.is_file().then_some(client)
            }
            InstallSource::System | InstallSource::Apt => which::which("mysql").ok(),
        }
    }

    /// Return the release for `version` under `install_root`, downloading and
    /// extracting it only when it is not already there.
    #[tracing::instrument(skip(self))]
    pub async fn acquire(&self, version: &str, install_root: &Path) -> Result<ServerInstallation> {
        ensure_writable(install_root)?;
        let spec = ArchiveSpec::for_host(version)?;

        let expected = install_root.join(spec.dir_name());
        if expected.join("bin").join("mysqld").is_file() {
            tracing::info!("Using cached installation at {}", expected.display());
            return ServerInstallation::from_release_dir(&expected, version, true);
        }

        let archive = install_root.join(spec.file_name());
        let digest = self.config.download.sha256.as_deref();
        if archive.is_file() {
            tracing::info!("Reusing downloaded archive {}", archive.display());
            if let Some(expected) = digest {
                verify_file(&archive, expected)?;
            }
        } else {
            let url = spec.url(self.config.download.url.as_deref())?;
            tracing::info!("Downloading {}", url);
            download(
                &url,
                &archive,
                self.config.get_download_timeout()?,
                digest,
                &self.cancel,
            )
            .await?;
        }

        let staging = install_root.join(format!(".extract-{}", spec.dir_name()));
        let extracted = {
            let archive = archive.clone();
            let staging = staging.clone();
            tokio::task::spawn_blocking(move || {
                let _ = std::fs::remove_dir_all(&staging);
                extract_archive(&archive, &staging)
            })
            .await
            .map_err(|e| Error::Resolution(format!("extraction task failed: {}", e)))?
        };
        if let Err(e) = extracted {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }
        promote_staging(&staging, install_root)?;

        let root = resolve_release_dir(install_root, &spec.dir_name())?;
        ServerInstallation::from_release_dir(&root, version, false)
    }
}

fn ensure_writable(install_root: &Path) -> Result<()> {
    std::fs::create_dir_all(install_root).map_err(|e| {
        Error::Resolution(format!(
            "cannot create install root {}: {}",
            install_root.display(),
            e
        ))
    })?;
    let probe = install_root.join(".write-test");
    std::fs::write(&probe, b"")
        .and_then(|_| std::fs::remove_file(&probe))
        .map_err(|e| {
            Error::Resolution(format!(
                "install root {} is not writable: {}",
                install_root.display(),
                e
            ))
        })
}

/// Move the extracted top-level entries out of the staging directory.
fn promote_staging(staging: &Path, install_root: &Path) -> Result<()> {
    for entry in std::fs::read_dir(staging)? {
        let entry = entry?;
        let target = install_root.join(entry.file_name());
        if target.exists() {
            if target.is_dir() {
                std::fs::remove_dir_all(&target)?;
            } else {
                std::fs::remove_file(&target)?;
            }
        }
        std::fs::rename(entry.path(), &target).map_err(|e| {
            Error::Resolution(format!("cannot move {} into place: {}", target.display(), e))
        })?;
    }
    std::fs::remove_dir_all(staging)?;
    Ok(())
}

/// The expected directory, otherwise the most recently modified one.
fn resolve_release_dir(install_root: &Path, expected: &str) -> Result<PathBuf> {
    let preferred = install_root.join(expected);
    if preferred.is_dir() {
        return Ok(preferred);
    }

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(install_root)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_dir() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, entry.path()));
        }
    }

    match newest {
        Some((_, dir)) => {
            tracing::warn!(
                "Archive did not contain {}, using {}",
                expected,
                dir.display()
            );
            Ok(dir)
        }
        None => Err(Error::Resolution(format!(
            "no installation directory found in {}",
            install_root.display()
        ))),
    }
}

/// Substitute binaries already on PATH.
async fn locate_system() -> Result<ServerInstallation> {
    let find = |name: &str| {
        which::which(name)
            .map_err(|_| Error::Resolution(format!("'{}' not found on PATH", name)))
    };
    let server_binary = find("mysqld")?;
    let client_binary = find("mysql")?;
    let admin_binary = which::which("mysqladmin")
        .unwrap_or_else(|_| client_binary.with_file_name("mysqladmin"));

    // /usr/sbin/mysqld -> /usr
    let binary_root = server_binary
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/usr"));

    let output = Command::new(&server_binary)
        .arg("--version")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::Resolution(format!("cannot run {}: {}", server_binary.display(), e)))?;
    let version = parse_server_version(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
        Error::Resolution(format!(
            "cannot parse version from '{} --version'",
            server_binary.display()
        ))
    })?;

    tracing::info!(version, "Using system server {}", server_binary.display());
    Ok(ServerInstallation {
        binary_root,
        version,
        already_present: true,
        server_binary,
        client_binary,
        admin_binary,
    })
}

/// "mysqld  Ver 8.0.35-0ubuntu0.22.04.1 for Linux on x86_64" -> "8.0.35"
fn parse_server_version(output: &str) -> Option<String> {
    let mut words = output.split_whitespace();
    words.find(|w| *w == "Ver")?;
    let raw = words.next()?;
    let version: String = raw
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let version = version.trim_end_matches('.');
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

async fn install_with_apt() -> Result<()> {
    for args in [
        &["update"][..],
        &["install", "-y", "mysql-server"][..],
    ] {
        tracing::info!("Running apt-get {}", args.join(" "));
        let output = Command::new("apt-get")
            .args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Resolution(format!("cannot run apt-get: {}", e)))?;
        if !output.status.success() {
            return Err(Error::Resolution(format!(
                "apt-get {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
    }
    Ok(())
}
