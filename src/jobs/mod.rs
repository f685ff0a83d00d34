pub mod playground;
pub mod provision;
pub mod quiz;
pub mod section;

use std::sync::Arc;

use crate::core::config::AppConfig;
use crate::engine::client::InterpreterClient;
use crate::engine::page::AssetPage;
use crate::engine::provider::RuntimeProvider;

/// Mount the shared runtime on the provisioned asset directory
///
/// Activation starts in the background; callers wait on
/// `RuntimeContext::ready` before running anything.
pub fn mount_runtime(config: &AppConfig) -> RuntimeProvider {
    let page = AssetPage::new(config.asset_dir.clone()).with_python(config.python.clone());
    RuntimeProvider::mount(InterpreterClient::global(), Arc::new(page), &config.index_url)
}
