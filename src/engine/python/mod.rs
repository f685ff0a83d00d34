//! CPython backend
//!
//! Runs one long-lived `python3` child process with an embedded driver
//! script. Requests and events travel as newline-delimited JSON:
//! - request: `{"id": 1, "code": "..."}`
//! - events: `ready`, `stream` (one per output line), `done`, `error`
//!
//! Every event after `ready` carries the id of the request that produced
//! it. A run only consumes events with its own id, so a run whose future
//! was dropped cannot leak its output or result into the next one.
//!
//! The driver keeps a single global namespace, so state persists across
//! runs the same way it does for an in-page runtime. Top-level `await`
//! is allowed.

pub mod installer;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::interpreter::{
    Bootstrap, Interpreter, LoadOptions, PackageInstaller, PyValue, Sink, SinkSlots, StreamKind,
};
use crate::core::error::PythonError;
use installer::PipInstaller;

const DRIVER: &str = include_str!("driver.py");

/// How long the child may take to report `ready`
const STARTUP_TIMEOUT_SECS: u64 = 30;

/// Bootstrap factory for the CPython backend
#[derive(Debug, Clone)]
pub struct PythonBootstrap {
    executable: PathBuf,
    asset_dir: PathBuf,
}

impl PythonBootstrap {
    pub fn new(executable: impl Into<PathBuf>, asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            asset_dir: asset_dir.into(),
        }
    }

    /// Directory packages get installed into, derived from the index URL
    fn site_dir(&self, options: &LoadOptions) -> PathBuf {
        self.asset_dir
            .join(options.index_url.trim_matches('/'))
            .join("site-packages")
    }
}

#[async_trait]
impl Bootstrap for PythonBootstrap {
    async fn load(&self, options: &LoadOptions) -> Result<Arc<dyn Interpreter>> {
        let site_dir = self.site_dir(options);
        let interpreter = PythonInterpreter::spawn(&self.executable, &site_dir).await?;
        Ok(Arc::new(interpreter))
    }
}

#[derive(Debug, Serialize)]
struct DriverRequest<'a> {
    id: u64,
    code: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum DriverEvent {
    Ready {
        version: String,
    },
    Stream {
        id: Option<u64>,
        stream: StreamKind,
        text: String,
    },
    Done {
        id: Option<u64>,
        value: PyValue,
    },
    Error {
        id: Option<u64>,
        kind: String,
        message: String,
        traceback: Option<String>,
    },
}

struct DriverSession {
    // Held so kill_on_drop fires when the interpreter goes away
    _child: Child,
    stdin: ChildStdin,
    events: Lines<BufReader<ChildStdout>>,
    /// Set while a request is in flight; still set at the next run means
    /// the previous one was cancelled
    interrupted: bool,
}

/// What a single driver line means for the request with `id`
#[derive(Debug, PartialEq)]
enum Routed {
    Emit(StreamKind, String),
    Finished(Result<PyValue, PythonError>),
    Skip,
}

fn route(line: &str, id: u64) -> Routed {
    let event = match serde_json::from_str::<DriverEvent>(line) {
        Ok(event) => event,
        // Native code writing straight to fd 1 bypasses the driver
        Err(_) => return Routed::Emit(StreamKind::Stdout, line.to_string()),
    };

    match event {
        DriverEvent::Stream {
            id: Some(other), ..
        } if other != id => Routed::Skip,
        DriverEvent::Stream { stream, text, .. } => Routed::Emit(stream, text),
        DriverEvent::Done { id: Some(done), value } if done == id => Routed::Finished(Ok(value)),
        DriverEvent::Error {
            id: Some(failed),
            kind,
            message,
            traceback,
        } if failed == id => Routed::Finished(Err(PythonError {
            kind,
            message,
            traceback,
        })),
        DriverEvent::Done { id: other, .. } | DriverEvent::Error { id: other, .. } => {
            debug!("Discarding result of stale request {:?} (waiting for {})", other, id);
            Routed::Skip
        }
        DriverEvent::Ready { .. } => Routed::Skip,
    }
}

/// A CPython child process speaking the driver protocol
pub struct PythonInterpreter {
    executable: PathBuf,
    site_dir: PathBuf,
    session: Mutex<DriverSession>,
    sinks: SinkSlots,
    next_id: AtomicU64,
}

impl PythonInterpreter {
    /// Start the child process and wait for the driver to report ready
    pub async fn spawn(executable: &Path, site_dir: &Path) -> Result<Self> {
        info!("Starting Python runtime: {:?}", executable);

        let mut child = Command::new(executable)
            .arg("-u")
            .arg("-c")
            .arg(DRIVER)
            .env("DSLEARN_SITE_DIR", site_dir)
            .env("MPLBACKEND", "Agg")
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn Python runtime {:?}", executable))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("Python runtime has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("Python runtime has no stdout"))?;
        let mut events = BufReader::new(stdout).lines();

        let first = tokio::time::timeout(
            Duration::from_secs(STARTUP_TIMEOUT_SECS),
            events.next_line(),
        )
        .await
        .context("Python runtime did not start in time")?
        .context("Failed to read from Python runtime")?
        .ok_or_else(|| anyhow::anyhow!("Python runtime exited during startup"))?;

        match serde_json::from_str::<DriverEvent>(&first) {
            Ok(DriverEvent::Ready { version }) => {
                info!("Python runtime ready (Python {})", version);
            }
            _ => anyhow::bail!("Unexpected startup message from Python runtime: {}", first),
        }

        Ok(Self {
            executable: executable.to_path_buf(),
            site_dir: site_dir.to_path_buf(),
            session: Mutex::new(DriverSession {
                _child: child,
                stdin,
                events,
                interrupted: false,
            }),
            sinks: SinkSlots::default(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn send(&self, session: &mut DriverSession, id: u64, code: &str) -> Result<()> {
        let mut payload = serde_json::to_string(&DriverRequest { id, code })?;
        payload.push('\n');
        session.stdin.write_all(payload.as_bytes()).await?;
        session.stdin.flush().await?;
        Ok(())
    }
}

fn protocol_error(message: impl Into<String>) -> PythonError {
    PythonError {
        kind: "RuntimeProtocolError".to_string(),
        message: message.into(),
        traceback: None,
    }
}

/// Package names end up inside generated Python source
fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

#[async_trait]
impl Interpreter for PythonInterpreter {
    async fn load_package(&self, name: &str) -> Result<()> {
        if !is_valid_package_name(name) {
            anyhow::bail!("Invalid package name: {}", name);
        }
        let probe = format!(
            "__import__('importlib.util').util.find_spec('{}') is not None",
            installer::import_name(name)
        );
        match self.run_async(&probe).await {
            Ok(PyValue::Repr(found)) if found == "True" => {
                debug!("Package {} is available", name);
                Ok(())
            }
            Ok(_) => anyhow::bail!("Package {} is not available in the runtime", name),
            Err(e) => Err(anyhow::anyhow!("Failed to probe package {}: {}", name, e)),
        }
    }

    async fn import_installer(&self, name: &str) -> Result<Arc<dyn PackageInstaller>> {
        self.load_package(name).await?;
        Ok(Arc::new(PipInstaller::new(&self.executable, &self.site_dir)))
    }

    async fn run_async(&self, code: &str) -> Result<PyValue, PythonError> {
        let mut session = self.session.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if session.interrupted {
            // Terminate a request line that may have been cut off mid-write;
            // the driver skips blank lines and answers garbage with an
            // id-less error, which route() discards
            warn!("Previous Python run was cancelled, resynchronizing");
            session
                .stdin
                .write_all(b"\n")
                .await
                .map_err(|e| protocol_error(format!("Failed to write to Python runtime: {}", e)))?;
        }
        session.interrupted = true;

        self.send(&mut session, id, code)
            .await
            .map_err(|e| protocol_error(format!("Failed to send code to Python runtime: {}", e)))?;

        loop {
            let line = session
                .events
                .next_line()
                .await
                .map_err(|e| protocol_error(format!("Failed to read from Python runtime: {}", e)))?
                .ok_or_else(|| protocol_error("Python runtime exited"))?;

            match route(&line, id) {
                Routed::Emit(stream, text) => self.sinks.emit(stream, &text),
                Routed::Finished(outcome) => {
                    session.interrupted = false;
                    return outcome;
                }
                Routed::Skip => continue,
            }
        }
    }

    fn set_stdout(&self, sink: Sink) {
        self.sinks.set(StreamKind::Stdout, sink);
    }

    fn set_stderr(&self, sink: Sink) {
        self.sinks.set(StreamKind::Stderr, sink);
    }

    fn stdout(&self) -> Option<Sink> {
        self.sinks.get(StreamKind::Stdout)
    }

    fn stderr(&self) -> Option<Sink> {
        self.sinks.get(StreamKind::Stderr)
    }
}
