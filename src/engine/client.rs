//! Interpreter client
//!
//! Lazily constructs exactly one interpreter per client and hands out
//! clones of the same handle to every caller.
//!
//! Construction steps:
//! 1. Load the interpreter through the bootstrap factory
//! 2. Load and import the package installer
//! 3. Install the scientific packages (best effort)
//! 4. Mark the handle ready and cache it
//!
//! Concurrent callers share one in-flight construction. A failed
//! construction is reported to every waiter and then forgotten, so the next
//! call starts over.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, error, info, warn};

use super::interpreter::{Bootstrap, InstallCallbacks, InterpreterHandle, LoadOptions, Sink};
use crate::core::config::get_config;
use crate::core::error::RuntimeError;

/// Installer package loaded before the package install request
pub const INSTALLER_PACKAGE: &str = "pip";

type Construction = Shared<BoxFuture<'static, Result<InterpreterHandle, RuntimeError>>>;

enum ClientState {
    Uninitialized,
    Initializing {
        generation: u64,
        construction: Construction,
    },
    Ready(InterpreterHandle),
}

/// Options applied when the interpreter is first constructed
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub index_url: String,
    pub installer: String,
    pub packages: Vec<String>,
}

impl ClientOptions {
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            index_url: config.index_url.clone(),
            installer: INSTALLER_PACKAGE.to_string(),
            packages: config.packages.clone(),
        }
    }
}

pub struct InterpreterClient {
    options: ClientOptions,
    state: Mutex<ClientState>,
    generation: AtomicU64,
}

static GLOBAL_CLIENT: OnceLock<Arc<InterpreterClient>> = OnceLock::new();

impl InterpreterClient {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            state: Mutex::new(ClientState::Uninitialized),
            generation: AtomicU64::new(0),
        }
    }

    /// Process-wide client configured from the application config
    pub fn global() -> Arc<InterpreterClient> {
        GLOBAL_CLIENT
            .get_or_init(|| Arc::new(InterpreterClient::new(ClientOptions::from_config())))
            .clone()
    }

    /// Cached handle, if construction has completed
    pub fn current(&self) -> Option<InterpreterHandle> {
        match &*self.lock_state() {
            ClientState::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Get the shared interpreter, constructing it on first use
    ///
    /// `bootstrap` is only consulted when nothing is cached or in flight.
    pub async fn acquire(
        &self,
        bootstrap: Option<Arc<dyn Bootstrap>>,
    ) -> Result<InterpreterHandle, RuntimeError> {
        let (generation, construction) = {
            let mut state = self.lock_state();
            match &*state {
                ClientState::Ready(handle) => return Ok(handle.clone()),
                ClientState::Initializing {
                    generation,
                    construction,
                } => {
                    debug!("Interpreter construction in flight, waiting");
                    (*generation, construction.clone())
                }
                ClientState::Uninitialized => {
                    let bootstrap = bootstrap.ok_or_else(|| {
                        RuntimeError::InterpreterUnavailable(
                            "bootstrap entry point is not available".to_string(),
                        )
                    })?;

                    let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    let construction = construct(bootstrap, self.options.clone())
                        .boxed()
                        .shared();
                    *state = ClientState::Initializing {
                        generation,
                        construction: construction.clone(),
                    };
                    (generation, construction)
                }
            }
        };

        let result = construction.await;

        // Every waiter settles the cell; only the first one for this
        // generation has any effect
        let mut state = self.lock_state();
        if let ClientState::Initializing {
            generation: current,
            ..
        } = &*state
        {
            if *current == generation {
                *state = match &result {
                    Ok(handle) => ClientState::Ready(handle.clone()),
                    Err(_) => ClientState::Uninitialized,
                };
            }
        }

        result
    }

    fn lock_state(&self) -> MutexGuard<'_, ClientState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn construct(
    bootstrap: Arc<dyn Bootstrap>,
    options: ClientOptions,
) -> Result<InterpreterHandle, RuntimeError> {
    info!("Loading Python runtime from {}", options.index_url);

    let interpreter = bootstrap
        .load(&LoadOptions {
            index_url: options.index_url.clone(),
        })
        .await
        .map_err(|e| {
            error!("Failed to construct interpreter: {:#}", e);
            RuntimeError::InterpreterUnavailable(format!("{:#}", e))
        })?;

    let handle = InterpreterHandle::new(interpreter);

    // Default bindings behave like a console
    if handle.stdout().is_none() {
        handle.set_stdout(Sink::console_stdout());
    }
    if handle.stderr().is_none() {
        handle.set_stderr(Sink::console_stderr());
    }

    if let Err(e) = install_packages(&handle, &options).await {
        warn!("{}", e);
    }

    handle.mark_ready();
    info!("Python runtime ready");
    Ok(handle)
}

async fn install_packages(
    handle: &InterpreterHandle,
    options: &ClientOptions,
) -> Result<(), RuntimeError> {
    let failed = |step: &str, e: anyhow::Error| {
        RuntimeError::PackageInstallFailed(format!("{}: {:#}", step, e))
    };

    // 1. Installer package
    handle
        .load_package(&options.installer)
        .await
        .map_err(|e| failed("loading installer", e))?;

    // 2. Installer module
    let installer = handle
        .import_installer(&options.installer)
        .await
        .map_err(|e| failed("importing installer", e))?;

    if options.packages.is_empty() {
        return Ok(());
    }

    // 3. One install request for the whole set
    info!("Installing packages: {}", options.packages.join(", "));
    installer
        .install(&options.packages, &InstallCallbacks::logging())
        .await
        .map_err(|e| failed("installing packages", e))?;

    info!("Packages installed");
    Ok(())
}
