//! Host checks run by `bringup doctor`.

use serde::Serialize;
use std::path::Path;

pub const MIN_AVAILABLE_MEMORY: u64 = 1024 * 1024 * 1024;
pub const MIN_FREE_DISK: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    pub hostname: Option<String>,
    pub arch: &'static str,
    pub available_memory: Option<u64>,
    pub free_disk: Option<u64>,
    pub mysqld_on_path: Option<String>,
}

impl HostReport {
    /// Gather facts about the host. `disk_path` is checked for free space; the
    /// nearest existing ancestor is used when it doesn't exist yet.
    pub fn collect(disk_path: &Path) -> Self {
        Self {
            hostname: nix::unistd::gethostname()
                .ok()
                .map(|h| h.to_string_lossy().into_owned()),
            arch: std::env::consts::ARCH,
            available_memory: std::fs::read_to_string("/proc/meminfo")
                .ok()
                .and_then(|m| parse_mem_available(&m)),
            free_disk: free_disk_bytes(disk_path),
            mysqld_on_path: which::which("mysqld")
                .ok()
                .map(|p| p.display().to_string()),
        }
    }

    /// Human-readable problems; empty when the host meets the requirements.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !matches!(self.arch, "x86_64" | "aarch64") {
            problems.push(format!(
                "architecture {} has no release archive; use --source system",
                self.arch
            ));
        }
        match self.available_memory {
            Some(bytes) if bytes < MIN_AVAILABLE_MEMORY => problems.push(format!(
                "only {} of memory available, at least {} recommended",
                format_bytes(bytes),
                format_bytes(MIN_AVAILABLE_MEMORY)
            )),
            None => problems.push("cannot determine available memory".to_string()),
            _ => {}
        }
        match self.free_disk {
            Some(bytes) if bytes < MIN_FREE_DISK => problems.push(format!(
                "only {} of disk free, at least {} required",
                format_bytes(bytes),
                format_bytes(MIN_FREE_DISK)
            )),
            None => problems.push("cannot determine free disk space".to_string()),
            _ => {}
        }
        problems
    }
}

/// `MemAvailable` from /proc/meminfo, in bytes.
fn parse_mem_available(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemAvailable:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    kib.checked_mul(1024)
}

fn free_disk_bytes(path: &Path) -> Option<u64> {
    let existing = path.ancestors().find(|p| p.exists())?;
    let stat = nix::sys::statvfs::statvfs(existing).ok()?;
    (stat.blocks_available() as u64).checked_mul(stat.fragment_size() as u64)
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meminfo() {
        let meminfo = "MemTotal:       16318480 kB\nMemFree:         1203440 kB\nMemAvailable:    8123456 kB\n";
        assert_eq!(parse_mem_available(meminfo), Some(8123456 * 1024));
        assert_eq!(parse_mem_available("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024), "2.0 GiB");
    }

    #[test]
    fn low_resources_are_reported() {
        let report = HostReport {
            hostname: None,
            arch: "x86_64",
            available_memory: Some(256 * 1024 * 1024),
            free_disk: Some(10 * MIN_FREE_DISK),
            mysqld_on_path: None,
        };
        let problems = report.problems();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("memory"));
    }

    #[test]
    fn free_disk_uses_existing_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        assert!(free_disk_bytes(&dir.path().join("not/yet/created")).is_some());
    }
}
