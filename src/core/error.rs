//! Error taxonomy for the execution runtime
//!
//! Page-level errors (`BootstrapUnavailable`, `ScriptLoadError`,
//! `InterpreterUnavailable`) disable execution for every block.
//! Block-level errors (`RuntimeNotReady`, `ExecutionFailed`) only affect
//! the block that produced them. `PackageInstallFailed` is logged and
//! otherwise ignored.

use thiserror::Error;

/// Errors raised by the interpreter client, runtime provider and harness
///
/// `Clone` so a single failed construction can be reported to every caller
/// that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The bootstrap script loaded but never exposed its factory
    #[error("bootstrap unavailable: {0}")]
    BootstrapUnavailable(String),

    /// The bootstrap script could not be injected or failed to load
    #[error("failed to load bootstrap script: {0}")]
    ScriptLoadError(String),

    /// Interpreter construction failed
    #[error("interpreter unavailable: {0}")]
    InterpreterUnavailable(String),

    /// Package installation failed (non-fatal)
    #[error("package installation failed: {0}")]
    PackageInstallFailed(String),

    /// A block was run before the runtime became ready
    #[error("Python runtime is not ready or failed to load")]
    RuntimeNotReady,

    /// User code raised an error
    #[error("{message}")]
    ExecutionFailed {
        message: String,
        trace: Option<String>,
    },
}

impl RuntimeError {
    /// Whether this error disables execution for the whole page
    pub fn is_page_level(&self) -> bool {
        matches!(
            self,
            RuntimeError::BootstrapUnavailable(_)
                | RuntimeError::ScriptLoadError(_)
                | RuntimeError::InterpreterUnavailable(_)
        )
    }
}

/// Error raised by the interpreter while evaluating code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct PythonError {
    /// Exception class name (e.g. `ZeroDivisionError`)
    pub kind: String,
    pub message: String,
    /// Formatted traceback, if the interpreter produced one
    pub traceback: Option<String>,
}

impl From<PythonError> for RuntimeError {
    fn from(err: PythonError) -> Self {
        RuntimeError::ExecutionFailed {
            message: err.to_string(),
            trace: err.traceback,
        }
    }
}
