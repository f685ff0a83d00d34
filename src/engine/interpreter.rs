//! Interpreter abstraction
//!
//! The harness never talks to a concrete Python runtime. It sees:
//! - `Bootstrap`: the factory exposed once the bootstrap script has loaded
//! - `Interpreter`: one live runtime with rebindable stdout/stderr sinks
//! - `PackageInstaller`: the installer module imported into the runtime
//!
//! `InterpreterHandle` wraps the single shared interpreter handed out by
//! the interpreter client.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::core::error::PythonError;

type SinkFn = dyn Fn(&str) + Send + Sync;

/// Batched output consumer bound to an interpreter stream.
///
/// The interpreter calls the sink once per emitted line, without the
/// trailing newline. Clones share identity, see [`Sink::same`].
#[derive(Clone)]
pub struct Sink {
    name: &'static str,
    write: Arc<SinkFn>,
}

impl Sink {
    pub fn new(name: &'static str, write: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            name,
            write: Arc::new(write),
        }
    }

    /// Appends every line plus a newline to `buffer`
    pub fn buffer(buffer: SharedBuffer) -> Self {
        Self::new("buffer", move |line| buffer.push_line(line))
    }

    /// Forwards interpreter stdout to the log
    pub fn console_stdout() -> Self {
        Self::new("console", |line| info!(target: "python::stdout", "{}", line))
    }

    /// Forwards interpreter stderr to the log
    pub fn console_stderr() -> Self {
        Self::new("console", |line| warn!(target: "python::stderr", "{}", line))
    }

    /// Drops everything
    pub fn inert() -> Self {
        Self::new("inert", |_| {})
    }

    pub fn write(&self, line: &str) {
        (self.write)(line)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether both sinks are clones of the same binding
    pub fn same(&self, other: &Sink) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.write) as *const (),
            Arc::as_ptr(&other.write) as *const (),
        )
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink").field("name", &self.name).finish()
    }
}

/// Text buffer shared between a sink and the code that reads it back
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<String>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&self, line: &str) {
        let mut buf = self.lock();
        buf.push_str(line);
        buf.push('\n');
    }

    pub fn push_str(&self, text: &str) {
        self.lock().push_str(text);
    }

    pub fn contents(&self) -> String {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, String> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Which interpreter stream a line was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Currently bound stdout/stderr sinks of an interpreter
#[derive(Debug, Default)]
pub struct SinkSlots {
    stdout: Mutex<Option<Sink>>,
    stderr: Mutex<Option<Sink>>,
}

impl SinkSlots {
    pub fn get(&self, kind: StreamKind) -> Option<Sink> {
        self.slot(kind)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set(&self, kind: StreamKind, sink: Sink) {
        *self
            .slot(kind)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(sink);
    }

    /// Deliver a line to whatever sink is bound right now
    pub fn emit(&self, kind: StreamKind, line: &str) {
        // Clone out of the lock so a sink may rebind streams
        if let Some(sink) = self.get(kind) {
            sink.write(line);
        }
    }

    fn slot(&self, kind: StreamKind) -> &Mutex<Option<Sink>> {
        match kind {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        }
    }
}

/// Value produced by the last expression of an evaluated snippet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PyValue {
    None,
    Str(String),
    /// Any other object, carried as its `repr()`
    Repr(String),
}

/// Configuration handed to the bootstrap factory
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Base URL of the runtime assets
    pub index_url: String,
}

/// Progress callbacks for a package installation request
#[derive(Clone)]
pub struct InstallCallbacks {
    pub on_success: Arc<dyn Fn(&str) + Send + Sync>,
    pub on_error: Arc<dyn Fn(&str) + Send + Sync>,
}

impl InstallCallbacks {
    /// Callbacks that only log progress
    pub fn logging() -> Self {
        Self {
            on_success: Arc::new(|msg| info!("Package loading: {}", msg)),
            on_error: Arc::new(|msg| warn!("Package loading error: {}", msg)),
        }
    }
}

/// Global factory exposed by the bootstrap script
#[async_trait]
pub trait Bootstrap: Send + Sync {
    async fn load(&self, options: &LoadOptions) -> anyhow::Result<Arc<dyn Interpreter>>;
}

/// One live Python runtime
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Make a bundled package importable
    async fn load_package(&self, name: &str) -> anyhow::Result<()>;

    /// Import the package installer module into the runtime
    async fn import_installer(&self, name: &str) -> anyhow::Result<Arc<dyn PackageInstaller>>;

    /// Evaluate `code`, returning the value of a trailing expression
    async fn run_async(&self, code: &str) -> Result<PyValue, PythonError>;

    fn set_stdout(&self, sink: Sink);
    fn set_stderr(&self, sink: Sink);
    fn stdout(&self) -> Option<Sink>;
    fn stderr(&self) -> Option<Sink>;
}

/// Package installer imported into an interpreter
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, packages: &[String], callbacks: &InstallCallbacks)
        -> anyhow::Result<()>;
}

/// Shared handle to the process-wide interpreter
#[derive(Clone)]
pub struct InterpreterHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    interpreter: Arc<dyn Interpreter>,
    ready: AtomicBool,
    // One run at a time across every provider and harness sharing this handle
    run_lock: tokio::sync::Mutex<()>,
}

impl InterpreterHandle {
    pub(crate) fn new(interpreter: Arc<dyn Interpreter>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                interpreter,
                ready: AtomicBool::new(false),
                run_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ready(&self) {
        self.inner.ready.store(true, Ordering::Release);
    }

    pub(crate) fn run_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.inner.run_lock
    }

    /// Whether both handles refer to the same interpreter instance
    pub fn ptr_eq(&self, other: &InterpreterHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Deref for InterpreterHandle {
    type Target = dyn Interpreter;

    fn deref(&self) -> &Self::Target {
        self.inner.interpreter.as_ref()
    }
}

impl fmt::Debug for InterpreterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterHandle")
            .field("ready", &self.is_ready())
            .finish()
    }
}
