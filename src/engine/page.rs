//! Page the bootstrap script is injected into
//!
//! The runtime provider only needs three things from its host page: whether
//! a script is already present, a way to inject one and wait for its load
//! signal, and the bootstrap factory the script publishes once it has run.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::interpreter::Bootstrap;
use super::python::PythonBootstrap;

/// Element id of the bootstrap script
pub const BOOTSTRAP_SCRIPT_ID: &str = "python-runtime";

/// How long the load signal may take
const LOAD_SIGNAL_TIMEOUT_SECS: u64 = 30;

/// A script reference to inject into the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSpec {
    pub id: String,
    /// Path relative to the asset root, e.g. `/python/bin/python3`
    pub src: String,
}

impl ScriptSpec {
    /// The interpreter bootstrap script for a runtime served from `index_url`
    pub fn bootstrap(index_url: &str) -> Self {
        Self {
            id: BOOTSTRAP_SCRIPT_ID.to_string(),
            src: format!("/{}/bin/python3", index_url.trim_matches('/')),
        }
    }
}

#[async_trait]
pub trait Page: Send + Sync {
    fn has_script(&self, id: &str) -> bool;

    /// Inject `script` and resolve once its load signal fires
    async fn inject_script(&self, script: &ScriptSpec) -> Result<()>;

    /// The bootstrap factory, once a loaded script has published it
    fn bootstrap(&self) -> Option<Arc<dyn Bootstrap>>;
}

/// Page backed by the provisioned asset directory
///
/// Injecting the bootstrap script resolves it under the asset root (or the
/// configured override), probes the executable as its load signal, then
/// publishes a [`PythonBootstrap`].
pub struct AssetPage {
    asset_dir: PathBuf,
    python_override: Option<PathBuf>,
    scripts: Mutex<HashMap<String, PathBuf>>,
    bootstrap: Mutex<Option<Arc<dyn Bootstrap>>>,
}

impl AssetPage {
    pub fn new(asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            asset_dir: asset_dir.into(),
            python_override: None,
            scripts: Mutex::new(HashMap::new()),
            bootstrap: Mutex::new(None),
        }
    }

    /// Use `python` instead of the provisioned runtime
    pub fn with_python(mut self, python: Option<PathBuf>) -> Self {
        self.python_override = python;
        self
    }

    fn resolve(&self, script: &ScriptSpec) -> Result<PathBuf> {
        if let Some(python) = &self.python_override {
            return Ok(python.clone());
        }

        let path = self.asset_dir.join(script.src.trim_start_matches('/'));
        if !path.exists() {
            anyhow::bail!(
                "{} not found under {:?} (run `dslearn setup` first)",
                script.src,
                self.asset_dir
            );
        }
        Ok(path)
    }
}

/// Wait for the interpreter to answer a trivial invocation
async fn load_signal(executable: &Path) -> Result<String> {
    let output = tokio::time::timeout(
        Duration::from_secs(LOAD_SIGNAL_TIMEOUT_SECS),
        Command::new(executable)
            .arg("-c")
            .arg("import sys; print(sys.version.split()[0])")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .context("Timed out waiting for the runtime to load")?
    .with_context(|| format!("Failed to start {:?}", executable))?;

    if !output.status.success() {
        anyhow::bail!(
            "{:?} exited with {}: {}",
            executable,
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[async_trait]
impl Page for AssetPage {
    fn has_script(&self, id: &str) -> bool {
        self.scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(id)
    }

    async fn inject_script(&self, script: &ScriptSpec) -> Result<()> {
        let path = self.resolve(script)?;
        debug!("Injecting script {} from {:?}", script.id, path);

        let version = load_signal(&path).await?;
        info!("Script {} loaded (Python {})", script.id, version);

        self.scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(script.id.clone(), path.clone());

        let factory: Arc<dyn Bootstrap> = Arc::new(PythonBootstrap::new(path, &self.asset_dir));
        *self
            .bootstrap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(factory);

        Ok(())
    }

    fn bootstrap(&self) -> Option<Arc<dyn Bootstrap>> {
        self.bootstrap
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_script_spec() {
        let spec = ScriptSpec::bootstrap("/python/");
        assert_eq!(spec.id, "python-runtime");
        assert_eq!(spec.src, "/python/bin/python3");
    }

    #[tokio::test]
    async fn test_missing_runtime_fails_to_inject() {
        let assets = tempfile::tempdir().unwrap();
        let page = AssetPage::new(assets.path());

        let err = page
            .inject_script(&ScriptSpec::bootstrap("/python/"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("dslearn setup"));
        assert!(!page.has_script(BOOTSTRAP_SCRIPT_ID));
        assert!(page.bootstrap().is_none());
    }
}
