//! Bootstrap credentials and the key=value artifact the application reads.
//!
//! Values are resolved once, persisted immediately, and from then on the
//! artifact is authoritative: passwords are never regenerated, and the
//! environment cannot silently change a persisted value.

use crate::client::{Identifier, Secret};
use crate::config::Config;
use crate::error::{Error, Result};
use fs2::FileExt;
use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

pub const DEFAULT_DATABASE_NAME: &str = "myapp_db";
pub const DEFAULT_APP_USER: &str = "appuser";
const PASSWORD_LEN: usize = 24;

const KEY_HOST: &str = "DB_HOST";
const KEY_PORT: &str = "DB_PORT";
const KEY_SOCKET: &str = "DB_SOCKET";
const KEY_NAME: &str = "DB_NAME";
const KEY_USER: &str = "DB_USER";
const KEY_PASSWORD: &str = "DB_PASSWORD";
const KEY_ROOT_PASSWORD: &str = "MYSQL_ROOT_PASSWORD";
const KEY_ROOT_SECURED: &str = "MYSQL_ROOT_SECURED";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapCredentials {
    pub database_name: Identifier,
    pub app_user: Identifier,
    pub app_password: Secret,
    pub root_password: Secret,
    /// Whether root has been given `root_password`. False right after a fresh
    /// initialization, when root has no password.
    pub root_secured: bool,
}

/// Where the application connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub socket: PathBuf,
}

impl ConnectionInfo {
    pub fn from_config(config: &Config) -> Self {
        let bind = config.server.bind_address.as_str();
        // A wildcard bind is not a connectable address.
        let host = match bind {
            "0.0.0.0" | "::" | "*" => "127.0.0.1".to_string(),
            other => other.to_string(),
        };
        Self {
            host,
            port: config.server.port,
            socket: config.socket_path(),
        }
    }
}

/// Random alphanumeric password from a CSPRNG (ChaCha12 via `thread_rng`).
pub fn generate_password() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..PASSWORD_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// The credentials artifact on disk.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed artifact, or `None` when it does not exist yet.
    pub fn load(&self) -> Result<Option<HashMap<String, String>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        parse_artifact(&self.path).map(Some)
    }

    /// Resolve credentials from the artifact, then `env`, then config, then
    /// defaults. Nothing is written.
    pub fn resolve(
        &self,
        config: &Config,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<BootstrapCredentials> {
        let persisted = self.load()?.unwrap_or_default();

        let pick = |key: &str, fallback: Option<&str>| -> Option<String> {
            let from_env = env(key).filter(|v| !v.is_empty());
            match persisted.get(key).filter(|v| !v.is_empty()) {
                Some(stored) => {
                    if matches!(from_env, Some(ref v) if v != stored) {
                        tracing::warn!(
                            "Ignoring {} from the environment; {} already records a different value",
                            key,
                            self.path.display()
                        );
                    }
                    Some(stored.clone())
                }
                None => from_env.or_else(|| fallback.map(str::to_string)),
            }
        };

        let database_name = pick(
            KEY_NAME,
            Some(config.database.name.as_deref().unwrap_or(DEFAULT_DATABASE_NAME)),
        )
        .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string());
        let app_user = pick(
            KEY_USER,
            Some(config.database.user.as_deref().unwrap_or(DEFAULT_APP_USER)),
        )
        .unwrap_or_else(|| DEFAULT_APP_USER.to_string());
        let app_password = pick(KEY_PASSWORD, None).unwrap_or_else(generate_password);
        let root_password = pick(KEY_ROOT_PASSWORD, None).unwrap_or_else(generate_password);
        let root_secured = persisted
            .get(KEY_ROOT_SECURED)
            .map(|v| v == "true")
            .unwrap_or(false);

        let ident = |field: &str, value: &str| {
            Identifier::new(value).map_err(|e| Error::Credentials(format!("{}: {}", field, e)))
        };
        Ok(BootstrapCredentials {
            database_name: ident(KEY_NAME, &database_name)?,
            app_user: ident(KEY_USER, &app_user)?,
            app_password: Secret::new(app_password),
            root_password: Secret::new(root_password),
            root_secured,
        })
    }

    /// Write the artifact under an exclusive lock.
    ///
    /// Passwords already on disk (possibly written by a concurrent run) win
    /// over `creds`; the merged credentials are returned and must be used from
    /// here on.
    pub fn persist(
        &self,
        creds: &BootstrapCredentials,
        connection: &ConnectionInfo,
    ) -> Result<BootstrapCredentials> {
        let err = |what: &str, e: std::io::Error| {
            Error::Credentials(format!("cannot {} {}: {}", what, self.path.display(), e))
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| err("create directory for", e))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .mode(0o600)
            .open(&self.path)
            .map_err(|e| err("open", e))?;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(|e| err("restrict", e))?;
        file.lock_exclusive().map_err(|e| err("lock", e))?;

        // Re-read under the lock.
        let existing = if file.metadata().map_err(|e| err("stat", e))?.len() > 0 {
            parse_artifact(&self.path)?
        } else {
            HashMap::new()
        };
        let kept = |key: &str, ours: &Secret| -> Secret {
            match existing.get(key).filter(|v| !v.is_empty()) {
                Some(stored) if stored != ours.expose() => {
                    tracing::warn!("{} was persisted concurrently; keeping the stored value", key);
                    Secret::new(stored.clone())
                }
                _ => ours.clone(),
            }
        };
        let merged = BootstrapCredentials {
            database_name: creds.database_name.clone(),
            app_user: creds.app_user.clone(),
            app_password: kept(KEY_PASSWORD, &creds.app_password),
            root_password: kept(KEY_ROOT_PASSWORD, &creds.root_password),
            root_secured: creds.root_secured,
        };

        let content = render_artifact(&merged, connection);
        file.set_len(0).map_err(|e| err("truncate", e))?;
        file.seek(SeekFrom::Start(0)).map_err(|e| err("rewind", e))?;
        file.write_all(content.as_bytes()).map_err(|e| err("write", e))?;
        file.sync_all().map_err(|e| err("sync", e))?;
        file.unlock().map_err(|e| err("unlock", e))?;

        tracing::debug!("Persisted credentials to {}", self.path.display());
        Ok(merged)
    }
}

fn parse_artifact(path: &Path) -> Result<HashMap<String, String>> {
    let iter = dotenvy::from_path_iter(path).map_err(|e| {
        Error::Credentials(format!("cannot read {}: {}", path.display(), e))
    })?;
    iter.map(|item| {
        item.map_err(|e| Error::Credentials(format!("cannot parse {}: {}", path.display(), e)))
    })
    .collect()
}

fn quote_value(value: &str) -> String {
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || "._-/:".contains(c)) {
        value.to_string()
    } else if !value.contains('\'') {
        format!("'{}'", value)
    } else {
        let escaped = value
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('$', "\\$");
        format!("\"{}\"", escaped)
    }
}

fn render_artifact(creds: &BootstrapCredentials, connection: &ConnectionInfo) -> String {
    let entries = [
        (KEY_HOST, connection.host.clone()),
        (KEY_PORT, connection.port.to_string()),
        (KEY_SOCKET, connection.socket.display().to_string()),
        (KEY_NAME, creds.database_name.to_string()),
        (KEY_USER, creds.app_user.to_string()),
        (KEY_PASSWORD, creds.app_password.expose().to_string()),
        (KEY_ROOT_PASSWORD, creds.root_password.expose().to_string()),
        (KEY_ROOT_SECURED, creds.root_secured.to_string()),
    ];
    let mut out = String::from("# Generated by bringup. Contains secrets; do not commit.\n");
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(&quote_value(&value));
        out.push('\n');
    }
    out
}
