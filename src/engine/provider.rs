//! Runtime provider
//!
//! Page-wide owner of the interpreter lifecycle. Mounting a provider:
//! - injects the bootstrap script into the page unless it is already there
//! - waits for the bootstrap factory (one bounded retry)
//! - acquires the shared interpreter through the client
//! - publishes `RuntimeState` to every `RuntimeContext`
//!
//! The provider also records the original stdout/stderr sinks harnesses
//! fall back to. The run lock that serializes execution lives on the
//! shared handle, so providers mounted on one client share it too.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use super::client::InterpreterClient;
use super::interpreter::{InterpreterHandle, Sink};
use super::page::{Page, ScriptSpec};
use crate::core::error::RuntimeError;

/// Grace period for a freshly loaded script to publish its factory
pub const BOOTSTRAP_GRACE: Duration = Duration::from_millis(100);

/// Snapshot of the shared runtime as seen by harnesses
#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub handle: Option<InterpreterHandle>,
    pub loading: bool,
    pub error: Option<RuntimeError>,
}

impl RuntimeState {
    fn loading() -> Self {
        Self {
            handle: None,
            loading: true,
            error: None,
        }
    }

    fn ready(handle: InterpreterHandle) -> Self {
        Self {
            handle: Some(handle),
            loading: false,
            error: None,
        }
    }

    fn failed(error: RuntimeError) -> Self {
        Self {
            handle: None,
            loading: false,
            error: Some(error),
        }
    }
}

/// Sinks bound to the interpreter when it was first handed to the page
#[derive(Debug, Clone)]
pub struct OriginalSinks {
    pub stdout: Sink,
    pub stderr: Sink,
}

/// Cloneable view of the provider handed to every harness
#[derive(Clone)]
pub struct RuntimeContext {
    state: watch::Receiver<RuntimeState>,
    original_sinks: Arc<OnceLock<OriginalSinks>>,
}

impl RuntimeContext {
    pub fn state(&self) -> RuntimeState {
        self.state.borrow().clone()
    }

    /// The shared handle, only once loading has finished successfully
    pub fn handle(&self) -> Option<InterpreterHandle> {
        let state = self.state.borrow();
        if state.loading {
            return None;
        }
        state.handle.clone().filter(InterpreterHandle::is_ready)
    }

    /// Wait until loading has finished
    pub async fn ready(&self) -> Result<InterpreterHandle, RuntimeError> {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| !s.loading)
            .await
            .map_err(|_| RuntimeError::RuntimeNotReady)?;

        match (&settled.handle, &settled.error) {
            (Some(handle), _) => Ok(handle.clone()),
            (None, Some(err)) => Err(err.clone()),
            (None, None) => Err(RuntimeError::RuntimeNotReady),
        }
    }

    pub fn original_sinks(&self) -> Option<&OriginalSinks> {
        self.original_sinks.get()
    }
}

struct ProviderShared {
    state: watch::Sender<RuntimeState>,
    mounted: AtomicBool,
    original_sinks: Arc<OnceLock<OriginalSinks>>,
}

pub struct RuntimeProvider {
    shared: Arc<ProviderShared>,
    context: RuntimeContext,
}

impl RuntimeProvider {
    /// Mount a provider on `page` and start activation in the background
    pub fn mount(client: Arc<InterpreterClient>, page: Arc<dyn Page>, index_url: &str) -> Self {
        let (tx, rx) = watch::channel(RuntimeState::loading());
        let original_sinks = Arc::new(OnceLock::new());

        let shared = Arc::new(ProviderShared {
            state: tx,
            mounted: AtomicBool::new(true),
            original_sinks: original_sinks.clone(),
        });
        let context = RuntimeContext {
            state: rx,
            original_sinks,
        };

        let script = ScriptSpec::bootstrap(index_url);
        let task_shared = shared.clone();
        tokio::spawn(async move {
            let result = activate(&client, page.as_ref(), &script).await;
            task_shared.settle(result);
        });

        Self { shared, context }
    }

    pub fn context(&self) -> RuntimeContext {
        self.context.clone()
    }

    /// Detach from the page; a later activation result is dropped
    ///
    /// Construction keeps running so the client can still cache it.
    pub fn teardown(&mut self) {
        if self.shared.mounted.swap(false, Ordering::AcqRel) {
            debug!("Runtime provider unmounted");
        }
    }
}

impl Drop for RuntimeProvider {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl ProviderShared {
    fn settle(&self, result: Result<InterpreterHandle, RuntimeError>) {
        if !self.mounted.load(Ordering::Acquire) {
            debug!("Provider unmounted before the runtime resolved, ignoring result");
            return;
        }

        match result {
            Ok(handle) => {
                self.original_sinks.get_or_init(|| OriginalSinks {
                    stdout: handle.stdout().unwrap_or_else(Sink::console_stdout),
                    stderr: handle.stderr().unwrap_or_else(Sink::console_stderr),
                });
                info!("Python runtime available to the page");
                self.state.send_replace(RuntimeState::ready(handle));
            }
            Err(err) => {
                error!("Python runtime failed to load: {}", err);
                self.state.send_replace(RuntimeState::failed(err));
            }
        }
    }
}

async fn activate(
    client: &InterpreterClient,
    page: &dyn Page,
    script: &ScriptSpec,
) -> Result<InterpreterHandle, RuntimeError> {
    // 1. Script
    if page.has_script(&script.id) {
        debug!("Script {} already present", script.id);
    } else {
        page.inject_script(script)
            .await
            .map_err(|e| RuntimeError::ScriptLoadError(format!("{:#}", e)))?;
    }

    // 2. Factory
    let bootstrap = match page.bootstrap() {
        Some(bootstrap) => bootstrap,
        None => {
            tokio::time::sleep(BOOTSTRAP_GRACE).await;
            page.bootstrap().ok_or_else(|| {
                RuntimeError::BootstrapUnavailable(format!(
                    "{} loaded but exposed no bootstrap factory",
                    script.src
                ))
            })?
        }
    };

    // 3. Interpreter
    client.acquire(Some(bootstrap)).await
}
