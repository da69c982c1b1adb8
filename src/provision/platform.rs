use crate::error::{Error, Result};
use url::Url;

pub const DEFAULT_URL_TEMPLATE: &str =
    "https://dev.mysql.com/get/Downloads/MySQL-{series}/{file}";

const GLIBC_TAG: &str = "glibc2.28";

/// Names of the generic Linux release archive for one version and architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSpec {
    version: String,
    arch: &'static str,
}

impl ArchiveSpec {
    pub fn for_host(version: &str) -> Result<Self> {
        Self::new(version, std::env::consts::ARCH)
    }

    pub fn new(version: &str, arch: &str) -> Result<Self> {
        let arch = match arch {
            "x86_64" => "x86_64",
            "aarch64" => "aarch64",
            other => {
                return Err(Error::Resolution(format!(
                    "no release archive for architecture '{}' (supported: x86_64, aarch64)",
                    other
                )))
            }
        };
        let parts: Vec<&str> = version.split('.').collect();
        if parts.len() < 2
            || parts
                .iter()
                .any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
        {
            return Err(Error::Resolution(format!(
                "version '{}' is not of the form <major>.<minor>.<patch>",
                version
            )));
        }
        Ok(Self {
            version: version.to_string(),
            arch,
        })
    }

    /// Release series used in the download path, e.g. "8.0".
    pub fn series(&self) -> String {
        self.version.split('.').take(2).collect::<Vec<_>>().join(".")
    }

    /// Top-level directory inside the archive.
    pub fn dir_name(&self) -> String {
        format!("mysql-{}-linux-{}-{}", self.version, GLIBC_TAG, self.arch)
    }

    pub fn file_name(&self) -> String {
        format!("{}.tar.xz", self.dir_name())
    }

    /// Expand a URL template (`{version}`, `{series}`, `{file}`).
    pub fn url(&self, template: Option<&str>) -> Result<Url> {
        let raw = template
            .unwrap_or(DEFAULT_URL_TEMPLATE)
            .replace("{version}", &self.version)
            .replace("{series}", &self.series())
            .replace("{file}", &self.file_name());
        let url = Url::parse(&raw)
            .map_err(|e| Error::Resolution(format!("invalid download URL '{}': {}", raw, e)))?;
        match url.scheme() {
            "https" | "http" | "file" => Ok(url),
            other => Err(Error::Resolution(format!(
                "unsupported download scheme '{}' in {}",
                other, url
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url_matches_release_layout() {
        let spec = ArchiveSpec::new("8.0.35", "x86_64").unwrap();
        assert_eq!(spec.series(), "8.0");
        assert_eq!(spec.dir_name(), "mysql-8.0.35-linux-glibc2.28-x86_64");
        assert_eq!(
            spec.url(None).unwrap().as_str(),
            "https://dev.mysql.com/get/Downloads/MySQL-8.0/mysql-8.0.35-linux-glibc2.28-x86_64.tar.xz"
        );
    }

    #[test]
    fn template_placeholders_are_substituted() {
        let spec = ArchiveSpec::new("8.4.2", "aarch64").unwrap();
        let url = spec
            .url(Some("https://mirror.example.com/{series}/{version}/{file}"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://mirror.example.com/8.4/8.4.2/mysql-8.4.2-linux-glibc2.28-aarch64.tar.xz"
        );
    }

    #[test]
    fn unsupported_inputs_are_resolution_errors() {
        assert!(matches!(ArchiveSpec::new("8.0.35", "riscv64"), Err(Error::Resolution(_))));
        assert!(matches!(ArchiveSpec::new("latest", "x86_64"), Err(Error::Resolution(_))));
        let spec = ArchiveSpec::new("8.0.35", "x86_64").unwrap();
        assert!(spec.url(Some("ftp://host/{file}")).is_err());
    }
}
