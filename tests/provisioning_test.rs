//! Archive provisioning without network access: release archives are served
//! from `file://` mirrors or placed in the install root beforehand.

use service_bringup::provision::{extract_archive, ArchiveSpec, Provisioner};
use service_bringup::{Config, Error};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

const VERSION: &str = "8.0.35";

fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn config_in(dir: &Path) -> Config {
    Config {
        version: VERSION.to_string(),
        install_root: dir.join("mysql"),
        data_dir: dir.join("data"),
        scratch_dir: dir.join("tmp"),
        defaults_file: dir.join("my.cnf"),
        credentials_file: dir.join(".mysql_credentials"),
        ..Config::default()
    }
}

/// Append a regular file, writing the member name straight into the header so
/// names the builder would refuse (`..`) can be produced.
fn append_raw<W: Write>(builder: &mut tar::Builder<W>, name: &str, data: &[u8], mode: u32) {
    let mut header = tar::Header::new_gnu();
    {
        let gnu = header.as_gnu_mut().unwrap();
        gnu.name[..name.len()].copy_from_slice(name.as_bytes());
    }
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    builder.append(&header, data).unwrap();
}

/// A `.tar.xz` laid out like a release: `<dir>/bin/{mysqld,mysql}`.
fn write_release_archive(path: &Path, dir_name: &str) {
    let file = std::fs::File::create(path).unwrap();
    let encoder = xz2::write::XzEncoder::new(file, 1);
    let mut builder = tar::Builder::new(encoder);
    append_raw(
        &mut builder,
        &format!("{}/bin/mysqld", dir_name),
        b"#!/bin/sh\nexit 0\n",
        0o755,
    );
    append_raw(
        &mut builder,
        &format!("{}/bin/mysql", dir_name),
        b"#!/bin/sh\nexit 0\n",
        0o755,
    );
    builder.into_inner().unwrap().finish().unwrap();
}

fn sha256_hex(path: &Path) -> String {
    hex::encode(Sha256::digest(std::fs::read(path).unwrap()))
}

#[tokio::test]
async fn test_download_extract_then_reuse() {
    let dir = create_test_dir();
    let spec = ArchiveSpec::for_host(VERSION).unwrap();
    let mirror = dir.path().join("mirror");
    std::fs::create_dir_all(&mirror).unwrap();
    let archive = mirror.join(spec.file_name());
    write_release_archive(&archive, &spec.dir_name());

    let mut config = config_in(dir.path());
    config.download.url = Some(format!("file://{}/{{file}}", mirror.display()));
    config.download.sha256 = Some(sha256_hex(&archive));

    let provisioner = Provisioner::new(&config);
    let first = provisioner.provision().await.unwrap();
    assert!(!first.already_present);
    assert_eq!(first.version, VERSION);
    assert_eq!(first.binary_root, config.install_root.join(spec.dir_name()));
    assert!(first.server_binary.is_file());
    assert!(first.client_binary.is_file());

    // The mirror may disappear; the extracted installation is enough.
    std::fs::remove_file(&archive).unwrap();
    let second = provisioner.provision().await.unwrap();
    assert!(second.already_present);
    assert_eq!(second.server_binary, first.server_binary);
    assert_eq!(
        provisioner.installed_client(),
        Some(first.client_binary.clone())
    );
}

#[tokio::test]
async fn test_checksum_mismatch_keeps_nothing() {
    let dir = create_test_dir();
    let spec = ArchiveSpec::for_host(VERSION).unwrap();
    let mirror = dir.path().join("mirror");
    std::fs::create_dir_all(&mirror).unwrap();
    write_release_archive(&mirror.join(spec.file_name()), &spec.dir_name());

    let mut config = config_in(dir.path());
    config.download.url = Some(format!("file://{}/{{file}}", mirror.display()));
    config.download.sha256 = Some("0".repeat(64));

    let err = Provisioner::new(&config).provision().await.unwrap_err();
    assert!(matches!(err, Error::Resolution(_)), "{:?}", err);
    assert!(!config.install_root.join(spec.file_name()).exists());
    assert!(!config.install_root.join(spec.dir_name()).exists());
}

#[tokio::test]
async fn test_traversing_archive_is_rejected() {
    let dir = create_test_dir();
    let spec = ArchiveSpec::for_host(VERSION).unwrap();
    let config = config_in(dir.path());
    std::fs::create_dir_all(&config.install_root).unwrap();

    // Already "downloaded", so the provisioner goes straight to extraction.
    let archive = config.install_root.join(spec.file_name());
    {
        let file = std::fs::File::create(&archive).unwrap();
        let mut builder = tar::Builder::new(xz2::write::XzEncoder::new(file, 1));
        append_raw(&mut builder, "../../etc/passwd", b"owned", 0o644);
        builder.into_inner().unwrap().finish().unwrap();
    }

    let err = Provisioner::new(&config).provision().await.unwrap_err();
    assert!(matches!(err, Error::Resolution(_)), "{:?}", err);
    // Staging sits at <install_root>/.extract-*, so the escape would land here.
    assert!(!dir.path().join("etc/passwd").exists());
    assert!(!config.install_root.join("etc/passwd").exists());
    let leftovers: Vec<_> = std::fs::read_dir(&config.install_root)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".extract-"))
        .collect();
    assert!(leftovers.is_empty(), "staging left behind: {:?}", leftovers);
}

#[test]
fn test_symlink_out_of_root_is_rejected() {
    let dir = create_test_dir();
    let archive = dir.path().join("links.tar");
    {
        let file = std::fs::File::create(&archive).unwrap();
        let mut builder = tar::Builder::new(file);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_mode(0o777);
        builder
            .append_link(&mut header, "release/lib/evil", "../../../etc")
            .unwrap();
        builder.finish().unwrap();
    }

    let dest = dir.path().join("out");
    let err = extract_archive(&archive, &dest).unwrap_err();
    assert!(matches!(err, Error::Resolution(_)));
    assert!(!dest.join("release/lib/evil").exists());
}
