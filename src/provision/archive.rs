//! Release archive extraction with path containment.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};
use xz2::read::XzDecoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Xz,
    Gzip,
    None,
}

fn compression_for(path: &Path) -> Compression {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if name.ends_with(".tar.xz") || name.ends_with(".txz") {
        Compression::Xz
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Compression::Gzip
    } else {
        Compression::None
    }
}

/// Whether a relative path stays within its root once `.` and `..` are applied.
fn stays_inside(path: &Path) -> bool {
    let mut depth: usize = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Extract `archive` into `dest`.
///
/// Every member path and link target must stay inside `dest`; the first one
/// that doesn't aborts extraction with [`Error::Resolution`] before it is
/// written. Callers extract into a staging directory so an aborted archive
/// leaves no usable installation behind.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| {
        Error::Resolution(format!("cannot open archive {}: {}", archive.display(), e))
    })?;
    let reader: Box<dyn Read> = match compression_for(archive) {
        Compression::Xz => Box::new(XzDecoder::new(file)),
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        Compression::None => Box::new(file),
    };

    std::fs::create_dir_all(dest)?;
    let mut tar = tar::Archive::new(reader);
    tar.set_preserve_permissions(true);
    tar.set_overwrite(true);

    let bad = |what: String| Error::Resolution(format!("{}: {}", archive.display(), what));
    let mut count = 0usize;

    for entry in tar.entries().map_err(|e| bad(format!("unreadable archive: {}", e)))? {
        let mut entry = entry.map_err(|e| bad(format!("corrupt entry: {}", e)))?;
        let member = entry
            .path()
            .map_err(|e| bad(format!("invalid member path: {}", e)))?
            .into_owned();

        if !stays_inside(&member) {
            return Err(bad(format!(
                "member '{}' escapes the install root",
                member.display()
            )));
        }

        if let Some(link) = entry
            .link_name()
            .map_err(|e| bad(format!("invalid link target: {}", e)))?
        {
            // Hard links name a path from the archive root; symlinks resolve
            // relative to the member's directory.
            let resolved = if entry.header().entry_type().is_hard_link() {
                link.to_path_buf()
            } else {
                member.parent().unwrap_or(Path::new("")).join(&link)
            };
            if !stays_inside(&resolved) {
                return Err(bad(format!(
                    "link '{}' -> '{}' escapes the install root",
                    member.display(),
                    link.display()
                )));
            }
        }

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| bad(format!("cannot unpack '{}': {}", member.display(), e)))?;
        if !unpacked {
            return Err(bad(format!(
                "member '{}' escapes the install root",
                member.display()
            )));
        }
        count += 1;
    }

    tracing::debug!(entries = count, "Extracted {}", archive.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn containment_rules() {
        assert!(stays_inside(Path::new("mysql-8.0.35/bin/mysqld")));
        assert!(stays_inside(Path::new("./a/../b")));
        assert!(!stays_inside(Path::new("../../etc/passwd")));
        assert!(!stays_inside(Path::new("a/../../b")));
        assert!(!stays_inside(Path::new("/etc/passwd")));
    }

    #[test]
    fn compression_by_extension() {
        assert_eq!(compression_for(&PathBuf::from("m.tar.xz")), Compression::Xz);
        assert_eq!(compression_for(&PathBuf::from("m.TGZ")), Compression::Gzip);
        assert_eq!(compression_for(&PathBuf::from("m.tar")), Compression::None);
    }

    #[test]
    fn extracts_gzip_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("release.tar.gz");
        {
            let file = File::create(&archive_path).unwrap();
            let enc = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
            let mut builder = tar::Builder::new(enc);
            let body = b"#!/bin/sh\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, "mysql-test/bin/mysqld", &body[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = dir.path().join("out");
        extract_archive(&archive_path, &dest).unwrap();
        assert!(dest.join("mysql-test/bin/mysqld").is_file());
    }
}
