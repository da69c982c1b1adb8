use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Fetch `url` into `dest`, streaming through `<dest>.partial` and renaming
/// only once the body (and digest, when given) checks out. Cancelling
/// `cancel` abandons the transfer with `Interrupted`.
#[tracing::instrument(skip_all, fields(url = %url))]
pub async fn download(
    url: &Url,
    dest: &Path,
    timeout: Duration,
    expected_sha256: Option<&str>,
    cancel: &CancellationToken,
) -> Result<()> {
    let partial = partial_path(dest);
    let result = tokio::select! {
        result = fetch_to(url, &partial, timeout) => result,
        _ = cancel.cancelled() => Err(Error::Interrupted),
    };
    let digest = match result {
        Ok(digest) => digest,
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
    };

    if let Some(expected) = expected_sha256 {
        if let Err(e) = check_digest(&digest, expected, url.as_str()) {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
    }

    tokio::fs::rename(&partial, dest).await.map_err(|e| {
        Error::Resolution(format!("cannot move download into {}: {}", dest.display(), e))
    })?;
    tracing::info!("Downloaded {}", dest.display());
    Ok(())
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    dest.with_file_name(name)
}

async fn fetch_to(url: &Url, partial: &Path, timeout: Duration) -> Result<Vec<u8>> {
    let mut file = tokio::fs::File::create(partial).await.map_err(|e| {
        Error::Resolution(format!("cannot create {}: {}", partial.display(), e))
    })?;
    let mut hasher = Sha256::new();

    if url.scheme() == "file" {
        let source = url
            .to_file_path()
            .map_err(|_| Error::Resolution(format!("invalid file URL {}", url)))?;
        let bytes = tokio::fs::read(&source).await.map_err(|e| {
            Error::Resolution(format!("cannot read {}: {}", source.display(), e))
        })?;
        hasher.update(&bytes);
        file.write_all(&bytes).await?;
    } else {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let mut response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Resolution(format!("download of {} failed: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(Error::Resolution(format!(
                "download of {} failed: HTTP {}",
                url,
                response.status()
            )));
        }

        let total = response.content_length();
        let mut received: u64 = 0;
        let mut next_report: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Resolution(format!("download of {} interrupted: {}", url, e)))?
        {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            if received >= next_report {
                tracing::debug!(received, total, "Downloading");
                next_report = received + 32 * 1024 * 1024;
            }
        }
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(hasher.finalize().to_vec())
}

fn check_digest(actual: &[u8], expected: &str, what: &str) -> Result<()> {
    let actual = hex::encode(actual);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(Error::Resolution(format!(
            "{} did not match expected digest\nexpected: {}\nactual:   {}",
            what, expected, actual
        )))
    }
}

/// Verify an archive already on disk against a configured digest.
pub fn verify_file(path: &Path, expected_sha256: &str) -> Result<()> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    check_digest(&hasher.finalize(), expected_sha256, &path.display().to_string())
}
