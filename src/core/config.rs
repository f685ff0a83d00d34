//! Application configuration
//!
//! Loaded once from the environment (after `.env` has been read by `main`)
//! and stored process-wide.

use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::warn;

/// Runtime release used by `dslearn setup` when `DSLEARN_RUNTIME_URL` is not set
pub const RUNTIME_VERSION: &str = "3.12.7";
const RUNTIME_BUILD: &str = "20241016";

/// Packages installed into the interpreter before it is handed out
pub const DEFAULT_PACKAGES: [&str; 4] = ["numpy", "pandas", "matplotlib", "seaborn"];

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root of the course content tree (one directory per unit)
    pub content_dir: PathBuf,
    /// Public asset directory the runtime is provisioned into
    pub asset_dir: PathBuf,
    /// Base URL of the runtime assets, relative to `asset_dir`
    pub index_url: String,
    /// Packages installed on first interpreter construction
    pub packages: Vec<String>,
    /// Archive fetched by `dslearn setup`
    pub runtime_url: String,
    /// Use this executable instead of the provisioned runtime
    pub python: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("./content"),
            asset_dir: PathBuf::from("./public"),
            index_url: "/python/".to_string(),
            packages: DEFAULT_PACKAGES.iter().map(|p| p.to_string()).collect(),
            runtime_url: default_runtime_url(),
            python: None,
        }
    }
}

impl AppConfig {
    /// Build configuration from `DSLEARN_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let packages = match std::env::var("DSLEARN_PACKAGES") {
            Ok(raw) => parse_package_list(&raw),
            Err(_) => defaults.packages,
        };

        Self {
            content_dir: std::env::var("DSLEARN_CONTENT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.content_dir),
            asset_dir: std::env::var("DSLEARN_ASSET_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.asset_dir),
            index_url: std::env::var("DSLEARN_INDEX_URL").unwrap_or(defaults.index_url),
            packages,
            runtime_url: std::env::var("DSLEARN_RUNTIME_URL").unwrap_or(defaults.runtime_url),
            python: std::env::var("DSLEARN_PYTHON")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    /// Directory the runtime archive is unpacked into
    pub fn runtime_dir(&self) -> PathBuf {
        self.asset_dir.join(self.index_url.trim_matches('/'))
    }
}

fn default_runtime_url() -> String {
    format!(
        "https://github.com/indygreg/python-build-standalone/releases/download/{build}/cpython-{version}+{build}-{triple}-install_only.tar.gz",
        build = RUNTIME_BUILD,
        version = RUNTIME_VERSION,
        triple = host_triple(),
    )
}

fn host_triple() -> &'static str {
    match (std::env::consts::ARCH, std::env::consts::OS) {
        ("aarch64", "macos") => "aarch64-apple-darwin",
        ("x86_64", "macos") => "x86_64-apple-darwin",
        ("aarch64", "linux") => "aarch64-unknown-linux-gnu",
        _ => "x86_64-unknown-linux-gnu",
    }
}

/// Split a comma separated package list, dropping empty entries
pub fn parse_package_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Global application configuration
static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Initialize the global configuration
pub fn init_config(config: AppConfig) -> anyhow::Result<&'static AppConfig> {
    APP_CONFIG
        .set(config)
        .map_err(|_| anyhow::anyhow!("Application configuration already initialized"))?;

    Ok(get_config())
}

/// Get the global configuration
pub fn get_config() -> &'static AppConfig {
    APP_CONFIG.get().unwrap_or_else(|| {
        static DEFAULT: OnceLock<AppConfig> = OnceLock::new();

        warn!("Application configuration not initialized, using defaults");
        DEFAULT.get_or_init(AppConfig::default)
    })
}
