use super::Config;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAMES: [&str; 2] = ["bringup.yaml", "bringup.yml"];

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find a config file starting from the current directory.
    ///
    /// Unlike most tools the file is optional: `Ok(None)` means "run with defaults".
    pub fn find_config_file(&self) -> Result<Option<PathBuf>> {
        let current_dir = std::env::current_dir()?;
        Ok(Self::find_config_in_dir(&current_dir))
    }

    pub fn find_config_in_dir(dir: &Path) -> Option<PathBuf> {
        for ancestor in dir.ancestors() {
            for name in CONFIG_FILE_NAMES {
                let candidate = ancestor.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Load config from a file and anchor its relative paths at the file's directory.
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let mut config = self.parse_config(&content)?;
        let base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        config.resolve_paths(&base_dir);
        Ok(config)
    }

    /// Load the explicit config, the discovered one, or defaults anchored at the cwd.
    pub fn load_or_default(&self, explicit: Option<&Path>) -> Result<Config> {
        if let Some(path) = explicit {
            return self.load_config(path);
        }
        match self.find_config_file()? {
            Some(path) => {
                tracing::debug!("Using config file {}", path.display());
                self.load_config(path)
            }
            None => {
                tracing::debug!("No bringup.yaml found, using defaults");
                let mut config = Config::default();
                config.resolve_paths(&std::env::current_dir()?);
                Ok(config)
            }
        }
    }

    /// Parse config from YAML string
    pub fn parse_config(&self, content: &str) -> Result<Config> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse bringup.yaml: {}", e)))?;

        Ok(config)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstallSource;

    #[test]
    fn test_parse_partial_config_keeps_defaults() {
        let yaml = r#"
version: "8.0.36"
source: system
server:
  port: 3307
probe:
  max_attempts: 120
  poll_interval: "2s"
database:
  name: shop
"#;

        let config = Parser::new().parse_config(yaml).unwrap();

        assert_eq!(config.version, "8.0.36");
        assert_eq!(config.source, InstallSource::System);
        assert_eq!(config.server.port, 3307);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.server.max_connections, 50);
        assert_eq!(config.probe.max_attempts, 120);
        assert_eq!(config.probe.query_retries, 6);
        assert_eq!(config.database.name.as_deref(), Some("shop"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = Parser::new().parse_config("datadir: /tmp/x\n").unwrap_err();
        assert!(err.to_string().contains("datadir"), "got: {}", err);
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let config = Parser::new().parse_config("\n").unwrap();
        assert_eq!(config.version, crate::config::DEFAULT_VERSION);
    }

    #[test]
    fn test_load_anchors_relative_paths_at_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bringup.yaml");
        fs::write(&path, "data_dir: state/data\nscratch_dir: state/tmp\n").unwrap();

        let config = Parser::new().load_config(&path).unwrap();
        assert_eq!(config.data_dir, dir.path().join("state/data"));
        assert_eq!(config.scratch_dir, dir.path().join("state/tmp"));
    }

    #[test]
    fn test_find_config_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bringup.yml"), "").unwrap();
        let nested = dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();

        let found = Parser::find_config_in_dir(&nested).unwrap();
        assert_eq!(found, dir.path().join("bringup.yml"));
    }
}
