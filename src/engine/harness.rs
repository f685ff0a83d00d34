//! Execution harness
//!
//! One harness per rendered code block. A run borrows the shared
//! interpreter from the runtime context, points its stdout/stderr at
//! buffers owned by this block, evaluates the snippet and puts the
//! previous sinks back, whatever happened in between.

use base64::Engine as _;
use tracing::{debug, warn};

use super::interpreter::{InterpreterHandle, PyValue, SharedBuffer, Sink};
use super::provider::{OriginalSinks, RuntimeContext};
use crate::core::dedent::dedent;
use crate::core::error::{PythonError, RuntimeError};

/// How a snippet is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Standard,
    /// Render the current matplotlib figure and return it as a PNG
    PlotCapture,
}

/// Outcome of the most recent run of a block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// Decoded PNG bytes (PlotCapture only)
    pub plot_image_data: Option<Vec<u8>>,
    pub failure: Option<RuntimeError>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// Sinks that were bound when a run started
///
/// Dropping the frame rebinds them, falling back to the page's original
/// sinks and finally to an inert sink. Restoration therefore also happens
/// when the run's future is dropped mid-flight.
pub struct StreamRedirectionFrame {
    handle: InterpreterHandle,
    previous_stdout: Option<Sink>,
    previous_stderr: Option<Sink>,
    fallback: Option<OriginalSinks>,
}

impl StreamRedirectionFrame {
    pub fn capture(handle: &InterpreterHandle, fallback: Option<&OriginalSinks>) -> Self {
        Self {
            handle: handle.clone(),
            previous_stdout: handle.stdout(),
            previous_stderr: handle.stderr(),
            fallback: fallback.cloned(),
        }
    }
}

impl Drop for StreamRedirectionFrame {
    fn drop(&mut self) {
        let stdout = self
            .previous_stdout
            .take()
            .or_else(|| self.fallback.as_ref().map(|f| f.stdout.clone()))
            .unwrap_or_else(Sink::inert);
        let stderr = self
            .previous_stderr
            .take()
            .or_else(|| self.fallback.as_ref().map(|f| f.stderr.clone()))
            .unwrap_or_else(Sink::inert);

        self.handle.set_stdout(stdout);
        self.handle.set_stderr(stderr);
    }
}

/// Wrap user code so the current figure comes back base64-encoded
///
/// Figure state lives in the shared interpreter, so it is cleared before
/// the user code runs.
pub fn plot_program(code: &str) -> String {
    format!(
        r#"import matplotlib.pyplot as plt
import base64
from io import BytesIO
plt.clf()
plt.cla()
plt.close('all')
{code}
buf = BytesIO()
plt.savefig(buf, format="png")
buf.seek(0)
img_str = base64.b64encode(buf.read()).decode('utf-8')
buf.close()
img_str
"#
    )
}

pub struct ExecutionHarness {
    context: RuntimeContext,
    state: BlockState,
    result: Option<ExecutionResult>,
}

impl ExecutionHarness {
    pub fn new(context: RuntimeContext) -> Self {
        Self {
            context,
            state: BlockState::Idle,
            result: None,
        }
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    /// Result of the last completed run
    pub fn result(&self) -> Option<&ExecutionResult> {
        self.result.as_ref()
    }

    /// Run `source` against the shared interpreter
    ///
    /// Only `RuntimeNotReady` is returned as an error. Failures raised by
    /// the code itself are recorded in the result.
    pub async fn run(
        &mut self,
        source: &str,
        mode: ExecutionMode,
    ) -> Result<&ExecutionResult, RuntimeError> {
        let handle = self.context.handle().ok_or(RuntimeError::RuntimeNotReady)?;

        self.result = None;
        self.state = BlockState::Running;

        let code = dedent(source);
        let stdout = SharedBuffer::new();
        let stderr = SharedBuffer::new();

        let outcome = {
            let _turn = handle.run_lock().lock().await;
            let _frame = StreamRedirectionFrame::capture(&handle, self.context.original_sinks());

            handle.set_stdout(Sink::buffer(stdout.clone()));
            handle.set_stderr(Sink::buffer(stderr.clone()));

            match mode {
                ExecutionMode::Standard => handle.run_async(&code).await,
                ExecutionMode::PlotCapture => handle.run_async(&plot_program(&code)).await,
            }
            // frame restores the sinks, then the lock is released
        };

        let mut result = ExecutionResult::default();
        match outcome {
            Ok(value) => {
                if mode == ExecutionMode::PlotCapture {
                    result.plot_image_data = decode_plot(value);
                }
            }
            Err(err) => {
                debug!("Block raised {}", err);
                append_failure(&stderr, &err);
                result.failure = Some(err.into());
            }
        }
        result.stdout = stdout.contents();
        result.stderr = stderr.contents();

        self.state = if result.is_success() {
            BlockState::Succeeded
        } else {
            BlockState::Failed
        };
        let stored: &ExecutionResult = self.result.insert(result);
        Ok(stored)
    }
}

fn append_failure(stderr: &SharedBuffer, err: &PythonError) {
    stderr.push_line(&err.to_string());
    if let Some(trace) = &err.traceback {
        stderr.push_str(trace);
    }
}

fn decode_plot(value: PyValue) -> Option<Vec<u8>> {
    let PyValue::Str(encoded) = value else {
        return None;
    };
    match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("Plot output is not valid base64: {}", e);
            None
        }
    }
}
