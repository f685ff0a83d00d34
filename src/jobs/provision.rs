//! Runtime provisioning (`dslearn setup`)
//!
//! Fetches the versioned runtime archive and unpacks it into the asset
//! directory. Skipped when the entry point is already in place, so it is
//! safe to run on every build.

use anyhow::{Context, Result};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::core::config::AppConfig;
use crate::core::utils::extract_tar_gz;

/// Entry point whose presence marks a complete installation
const ENTRY_POINT: &str = "bin/python3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    AlreadyInstalled(PathBuf),
    Installed(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ProvisionJob {
    /// Public asset directory
    pub asset_dir: PathBuf,
    /// Where the runtime ends up, inside `asset_dir`
    pub target_dir: PathBuf,
    /// `http(s)://` URL, `file://` URL or local path of the archive
    pub archive: String,
}

impl ProvisionJob {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            asset_dir: config.asset_dir.clone(),
            target_dir: config.runtime_dir(),
            archive: config.runtime_url.clone(),
        }
    }
}

pub async fn process_provision_job(job: &ProvisionJob) -> Result<ProvisionOutcome> {
    // 1. Asset directory
    fs::create_dir_all(&job.asset_dir)
        .await
        .with_context(|| format!("Failed to create asset directory {:?}", job.asset_dir))?;

    // 2. Already provisioned?
    if job.target_dir.join(ENTRY_POINT).exists() {
        info!("Runtime already present in {:?}, skipping setup", job.target_dir);
        return Ok(ProvisionOutcome::AlreadyInstalled(job.target_dir.clone()));
    }

    // 3. Leftovers from an interrupted run
    if job.target_dir.exists() {
        warn!("Cleaning up incomplete runtime directory {:?}", job.target_dir);
        fs::remove_dir_all(&job.target_dir)
            .await
            .context("Failed to remove incomplete runtime directory")?;
    }

    // Staging lives next to the target so the final move is a rename
    let staging = tempfile::Builder::new()
        .prefix(".runtime-staging")
        .tempdir_in(&job.asset_dir)
        .context("Failed to create staging directory")?;
    let archive_path = staging.path().join("runtime.tar.gz");
    let extract_dir = staging.path().join("extract");

    // 4. Fetch
    fetch_archive(&job.archive, &archive_path).await?;

    // 5. Extract
    info!("Extracting runtime archive...");
    let (archive, dest) = (archive_path.clone(), extract_dir.clone());
    let entries = tokio::task::spawn_blocking(move || -> Result<usize> {
        let file = std::fs::File::open(&archive).context("Failed to open runtime archive")?;
        extract_tar_gz(std::io::BufReader::new(file), &dest)
    })
    .await
    .context("Extraction task panicked")??;
    debug!("Extracted {} entries", entries);

    // 6. Locate and move into place
    let source = locate_runtime_root(&extract_dir).await?.ok_or_else(|| {
        anyhow::anyhow!(
            "Runtime archive does not contain {} (checked python/, */python/ and the archive root)",
            ENTRY_POINT
        )
    })?;
    info!("Found runtime at {:?}, moving to {:?}", source, job.target_dir);

    if let Some(parent) = job.target_dir.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::rename(&source, &job.target_dir)
        .await
        .with_context(|| format!("Failed to move runtime into {:?}", job.target_dir))?;

    // 7. Staging directory is removed on drop
    drop(staging);

    info!("Runtime setup complete");
    Ok(ProvisionOutcome::Installed(job.target_dir.clone()))
}

async fn fetch_archive(archive: &str, dest: &Path) -> Result<()> {
    if archive.starts_with("http://") || archive.starts_with("https://") {
        return download(archive, dest).await;
    }

    let local = archive.strip_prefix("file://").unwrap_or(archive);
    info!("Copying runtime archive from {}", local);
    fs::copy(local, dest)
        .await
        .with_context(|| format!("Failed to copy runtime archive from {}", local))?;
    Ok(())
}

async fn download(url: &str, dest: &Path) -> Result<()> {
    info!("Downloading runtime from {}", url);

    let response = reqwest::get(url)
        .await
        .with_context(|| format!("Failed to request {}", url))?;
    if !response.status().is_success() {
        anyhow::bail!("Failed to download runtime: HTTP {}", response.status());
    }

    let mut file = fs::File::create(dest)
        .await
        .context("Failed to create archive file")?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Download interrupted")?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    info!("Downloaded {} bytes to {:?}", written, dest);
    Ok(())
}

/// Directory inside `extract_dir` that holds the runtime's `bin/python3`
async fn locate_runtime_root(extract_dir: &Path) -> Result<Option<PathBuf>> {
    let direct = extract_dir.join("python");
    if direct.join(ENTRY_POINT).exists() {
        return Ok(Some(direct));
    }

    let mut entries = fs::read_dir(extract_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let nested = entry.path().join("python");
        if entry.file_type().await?.is_dir() && nested.join(ENTRY_POINT).exists() {
            return Ok(Some(nested));
        }
    }

    if extract_dir.join(ENTRY_POINT).exists() {
        return Ok(Some(extract_dir.to_path_buf()));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn write_archive(path: &Path, files: &[(&str, &str)]) {
        let encoder = GzEncoder::new(std::fs::File::create(path).unwrap(), Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, name, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn job(assets: &Path, archive: &Path) -> ProvisionJob {
        ProvisionJob {
            asset_dir: assets.to_path_buf(),
            target_dir: assets.join("python"),
            archive: format!("file://{}", archive.display()),
        }
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("cpython.tar.gz");
        write_archive(
            &archive,
            &[("python/bin/python3", "#!/bin/sh\n"), ("python/lib/os.py", "")],
        );
        let assets = work.path().join("public");

        let outcome = process_provision_job(&job(&assets, &archive)).await.unwrap();
        assert_eq!(outcome, ProvisionOutcome::Installed(assets.join("python")));
        assert!(assets.join("python/bin/python3").exists());
        assert!(assets.join("python/lib/os.py").exists());

        // Only the runtime is left behind
        let leftovers: Vec<_> = std::fs::read_dir(&assets).unwrap().collect();
        assert_eq!(leftovers.len(), 1);

        std::fs::remove_file(&archive).unwrap();
        let outcome = process_provision_job(&job(&assets, &archive)).await.unwrap();
        assert_eq!(outcome, ProvisionOutcome::AlreadyInstalled(assets.join("python")));
    }

    #[tokio::test]
    async fn test_provision_replaces_incomplete_install() {
        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("cpython.tar.gz");
        write_archive(&archive, &[("build/python/bin/python3", "#!/bin/sh\n")]);
        let assets = work.path().join("public");
        std::fs::create_dir_all(assets.join("python/lib")).unwrap();
        std::fs::write(assets.join("python/lib/stale.py"), "").unwrap();

        process_provision_job(&job(&assets, &archive)).await.unwrap();

        assert!(assets.join("python/bin/python3").exists());
        assert!(!assets.join("python/lib/stale.py").exists());
    }

    #[tokio::test]
    async fn test_archive_without_runtime_fails() {
        let work = tempfile::tempdir().unwrap();
        let archive = work.path().join("empty.tar.gz");
        write_archive(&archive, &[("README", "nothing here")]);
        let assets = work.path().join("public");

        let err = process_provision_job(&job(&assets, &archive)).await.unwrap_err();
        assert!(err.to_string().contains("bin/python3"));
        assert!(!assets.join("python").exists());
    }
}
