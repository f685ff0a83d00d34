//! In-memory fakes for the interpreter seams
//!
//! `FakeInterpreter` understands just enough Python to drive the harness:
//! `print(...)` (optionally to `sys.stderr`), `raise Kind('msg')`,
//! `await asyncio.sleep(secs)`, a handful of `plt.*` calls and a trailing
//! `img_str` expression. Every other line is accepted and ignored.

use async_trait::async_trait;
use base64::Engine as _;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::interpreter::{
    Bootstrap, InstallCallbacks, Interpreter, LoadOptions, PackageInstaller, PyValue, Sink,
    SinkSlots, StreamKind,
};
use super::page::{Page, ScriptSpec};
use crate::core::error::PythonError;

#[derive(Default)]
pub struct FakeInterpreter {
    sinks: SinkSlots,
    figure: Mutex<Vec<String>>,
    saved: Mutex<Option<String>>,
    runs: Mutex<Vec<String>>,
    loaded: Mutex<Vec<String>>,
    installed: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    reject_install: AtomicBool,
}

impl FakeInterpreter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Installer calls fail
    pub fn rejecting_installs() -> Arc<Self> {
        let fake = Self::default();
        fake.reject_install.store(true, Ordering::SeqCst);
        Arc::new(fake)
    }

    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }

    pub fn loaded_packages(&self) -> Vec<String> {
        self.loaded.lock().unwrap().clone()
    }

    pub fn installed_packages(&self) -> Vec<String> {
        self.installed.lock().unwrap().clone()
    }

    /// Highest number of `run_async` calls observed in flight at once
    pub fn max_concurrent_runs(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    async fn execute(&self, code: &str) -> Result<PyValue, PythonError> {
        let lines: Vec<&str> = code.lines().map(str::trim).collect();
        let mut value = PyValue::None;

        for (idx, line) in lines.iter().enumerate() {
            let is_last = lines[idx + 1..].iter().all(|l| l.is_empty());

            if let Some(inner) = call_args(line, "print(") {
                match inner.strip_suffix(", file=sys.stderr") {
                    Some(arg) => self.sinks.emit(StreamKind::Stderr, &literal(arg)),
                    None => self.sinks.emit(StreamKind::Stdout, &literal(inner)),
                }
            } else if let Some(rest) = line.strip_prefix("raise ") {
                let (kind, message) = match rest.split_once('(') {
                    Some((kind, args)) => (kind, literal(args.trim_end_matches(')'))),
                    None => (rest, String::new()),
                };
                return Err(PythonError {
                    kind: kind.to_string(),
                    message: message.clone(),
                    traceback: Some(format!(
                        "Traceback (most recent call last):\n  File \"<exec>\", line {}, in <module>\n{}: {}\n",
                        idx + 1,
                        kind,
                        message
                    )),
                });
            } else if let Some(secs) = call_args(line, "await asyncio.sleep(") {
                let secs: f64 = secs.parse().unwrap_or(0.0);
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
            } else if matches!(*line, "plt.clf()" | "plt.cla()" | "plt.close('all')") {
                self.figure.lock().unwrap().clear();
            } else if line.starts_with("plt.savefig(") {
                let figure = self.figure.lock().unwrap().join("\n");
                *self.saved.lock().unwrap() = Some(figure);
            } else if line.starts_with("plt.") {
                self.figure.lock().unwrap().push(line.to_string());
            } else if *line == "img_str" && is_last {
                value = match self.saved.lock().unwrap().take() {
                    Some(png) => PyValue::Str(base64::engine::general_purpose::STANDARD.encode(png)),
                    None => PyValue::None,
                };
            } else if is_last && line.parse::<i64>().is_ok() {
                value = PyValue::Repr(line.to_string());
            }

            // Give other tasks a chance to interleave, as a real runtime would
            tokio::task::yield_now().await;
        }

        Ok(value)
    }
}

fn call_args<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?.strip_suffix(')')
}

fn literal(arg: &str) -> String {
    let arg = arg.trim();
    for quote in ['\'', '"'] {
        if let Some(inner) = arg.strip_prefix(quote).and_then(|a| a.strip_suffix(quote)) {
            return inner.to_string();
        }
    }
    arg.to_string()
}

struct FakeInstaller {
    interpreter: Arc<FakeInterpreter>,
}

#[async_trait]
impl PackageInstaller for FakeInstaller {
    async fn install(&self, packages: &[String], callbacks: &InstallCallbacks) -> anyhow::Result<()> {
        if self.interpreter.reject_install.load(Ordering::SeqCst) {
            (callbacks.on_error)("network unreachable");
            anyhow::bail!("installer rejected {}", packages.join(", "));
        }
        for package in packages {
            (callbacks.on_success)(&format!("Installed {}", package));
        }
        self.interpreter
            .installed
            .lock()
            .unwrap()
            .extend(packages.iter().cloned());
        Ok(())
    }
}

/// Wraps a shared `FakeInterpreter` so the installer can report back to it
struct SharedFake(Arc<FakeInterpreter>);

#[async_trait]
impl Interpreter for SharedFake {
    async fn load_package(&self, name: &str) -> anyhow::Result<()> {
        self.0.loaded.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn import_installer(&self, _name: &str) -> anyhow::Result<Arc<dyn PackageInstaller>> {
        Ok(Arc::new(FakeInstaller {
            interpreter: self.0.clone(),
        }))
    }

    async fn run_async(&self, code: &str) -> Result<PyValue, PythonError> {
        let fake = &self.0;
        fake.runs.lock().unwrap().push(code.to_string());
        let active = fake.active.fetch_add(1, Ordering::SeqCst) + 1;
        fake.max_active.fetch_max(active, Ordering::SeqCst);

        let result = fake.execute(code).await;

        fake.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn set_stdout(&self, sink: Sink) {
        self.0.sinks.set(StreamKind::Stdout, sink);
    }

    fn set_stderr(&self, sink: Sink) {
        self.0.sinks.set(StreamKind::Stderr, sink);
    }

    fn stdout(&self) -> Option<Sink> {
        self.0.sinks.get(StreamKind::Stdout)
    }

    fn stderr(&self) -> Option<Sink> {
        self.0.sinks.get(StreamKind::Stderr)
    }
}

pub struct FakeBootstrap {
    interpreter: Arc<FakeInterpreter>,
    loads: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
}

impl FakeBootstrap {
    pub fn new(interpreter: Arc<FakeInterpreter>) -> Arc<Self> {
        Self::build(interpreter, 0, Duration::ZERO)
    }

    /// Construction takes `delay` before resolving
    pub fn slow(interpreter: Arc<FakeInterpreter>, delay: Duration) -> Arc<Self> {
        Self::build(interpreter, 0, delay)
    }

    /// The first `failures` constructions fail, each after a short delay
    pub fn failing(interpreter: Arc<FakeInterpreter>, failures: usize) -> Arc<Self> {
        Self::build(interpreter, failures, Duration::from_millis(10))
    }

    fn build(interpreter: Arc<FakeInterpreter>, failures: usize, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            interpreter,
            loads: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(failures),
            delay,
        })
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Bootstrap for FakeBootstrap {
    async fn load(&self, _options: &LoadOptions) -> anyhow::Result<Arc<dyn Interpreter>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            anyhow::bail!("runtime crashed during startup");
        }

        Ok(Arc::new(SharedFake(self.interpreter.clone())))
    }
}

/// How a `FakePage` reacts to script injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectBehavior {
    /// Script loads and publishes the bootstrap factory
    Publish,
    /// Script loads but never publishes the factory
    Silent,
    /// Script fails to load
    Fail,
}

pub struct FakePage {
    scripts: Mutex<Vec<ScriptSpec>>,
    bootstrap: Mutex<Option<Arc<dyn Bootstrap>>>,
    pending: Arc<dyn Bootstrap>,
    behavior: InjectBehavior,
    injections: AtomicUsize,
}

impl FakePage {
    pub fn new(bootstrap: Arc<dyn Bootstrap>, behavior: InjectBehavior) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(Vec::new()),
            bootstrap: Mutex::new(None),
            pending: bootstrap,
            behavior,
            injections: AtomicUsize::new(0),
        })
    }

    pub fn injections(&self) -> usize {
        self.injections.load(Ordering::SeqCst)
    }

    pub fn scripts(&self) -> Vec<ScriptSpec> {
        self.scripts.lock().unwrap().clone()
    }

    /// Publish the factory later, as a slow script initializer would
    pub fn publish_after(self: &Arc<Self>, delay: Duration) {
        let page = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            *page.bootstrap.lock().unwrap() = Some(page.pending.clone());
        });
    }
}

#[async_trait]
impl Page for FakePage {
    fn has_script(&self, id: &str) -> bool {
        self.scripts.lock().unwrap().iter().any(|s| s.id == id)
    }

    async fn inject_script(&self, script: &ScriptSpec) -> anyhow::Result<()> {
        self.injections.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if self.behavior == InjectBehavior::Fail {
            anyhow::bail!("{} returned 404", script.src);
        }

        self.scripts.lock().unwrap().push(script.clone());
        if self.behavior == InjectBehavior::Publish {
            *self.bootstrap.lock().unwrap() = Some(self.pending.clone());
        }
        Ok(())
    }

    fn bootstrap(&self) -> Option<Arc<dyn Bootstrap>> {
        self.bootstrap.lock().unwrap().clone()
    }
}

/// Provider mounted on a publishing fake page, already settled
pub async fn mounted_runtime(
    fake: Arc<FakeInterpreter>,
) -> (super::provider::RuntimeProvider, super::provider::RuntimeContext) {
    use super::client::{ClientOptions, InterpreterClient, INSTALLER_PACKAGE};

    let client = Arc::new(InterpreterClient::new(ClientOptions {
        index_url: "/python/".to_string(),
        installer: INSTALLER_PACKAGE.to_string(),
        packages: Vec::new(),
    }));
    let page = FakePage::new(FakeBootstrap::new(fake), InjectBehavior::Publish);
    let provider = super::provider::RuntimeProvider::mount(client, page, "/python/");
    let context = provider.context();
    context.ready().await.unwrap();
    (provider, context)
}
