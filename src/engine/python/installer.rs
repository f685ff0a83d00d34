//! pip-backed package installer
//!
//! Packages go into the runtime's own `site-packages` target directory, so
//! the provisioned runtime stays untouched and a reinstall is a directory
//! removal away.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::engine::interpreter::{InstallCallbacks, PackageInstaller};

/// Module name a distribution is imported as
pub fn import_name(package: &str) -> String {
    match package {
        "scikit-learn" => "sklearn".to_string(),
        "pillow" | "Pillow" => "PIL".to_string(),
        other => other.replace('-', "_").to_lowercase(),
    }
}

pub struct PipInstaller {
    executable: PathBuf,
    site_dir: PathBuf,
}

impl PipInstaller {
    pub fn new(executable: &Path, site_dir: &Path) -> Self {
        Self {
            executable: executable.to_path_buf(),
            site_dir: site_dir.to_path_buf(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.env("PYTHONPATH", &self.site_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Packages that cannot be imported yet
    async fn missing(&self, packages: &[String]) -> Result<Vec<String>> {
        let probe = format!(
            "import importlib.util, sys\nfor name, module in {}:\n    if importlib.util.find_spec(module) is None:\n        print(name)",
            python_pairs(packages)
        );

        let output = self
            .command()
            .arg("-c")
            .arg(probe)
            .output()
            .await
            .context("Failed to probe installed packages")?;

        if !output.status.success() {
            anyhow::bail!(
                "Package probe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// Render `[("dist", "module"), ...]` as a Python literal
fn python_pairs(packages: &[String]) -> String {
    let pairs: Vec<String> = packages
        .iter()
        .map(|p| {
            format!(
                "({}, {})",
                serde_json::Value::from(p.as_str()),
                serde_json::Value::from(import_name(p))
            )
        })
        .collect();
    format!("[{}]", pairs.join(", "))
}

#[async_trait]
impl PackageInstaller for PipInstaller {
    async fn install(&self, packages: &[String], callbacks: &InstallCallbacks) -> Result<()> {
        let missing = self.missing(packages).await?;
        if missing.is_empty() {
            (callbacks.on_success)(&format!("Already installed: {}", packages.join(", ")));
            return Ok(());
        }

        info!("Installing packages: {}", missing.join(", "));

        let mut child = self
            .command()
            .args(["-m", "pip", "install", "--disable-pip-version-check", "--target"])
            .arg(&self.site_dir)
            .args(&missing)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn pip")?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("pip has no stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("pip has no stderr"))?;

        // Drain stderr concurrently so a chatty pip cannot block on a full pipe
        let on_error = callbacks.on_error.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                on_error(&line);
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            (callbacks.on_success)(&line);
        }

        let status = child.wait().await.context("Failed to wait for pip")?;
        let _ = stderr_task.await;

        debug!("pip exited with {}", status);
        if !status.success() {
            anyhow::bail!(
                "pip install {} exited with {}",
                missing.join(" "),
                status.code().unwrap_or(-1)
            );
        }

        Ok(())
    }
}
