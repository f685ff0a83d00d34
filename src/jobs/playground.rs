//! One-off execution of a snippet outside any section (`dslearn run`)

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::harness::{ExecutionHarness, ExecutionMode};
use crate::engine::provider::RuntimeContext;

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaygroundJob {
    pub source: String,
    /// Capture the matplotlib figure instead of a plain run
    #[serde(default)]
    pub plot: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaygroundResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// PNG as base64 (plot runs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_png_base64: Option<String>,
    /// Error summary when the snippet raised
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlaygroundResult {
    /// Raw PNG bytes of the captured figure
    pub fn plot_png(&self) -> Option<Vec<u8>> {
        let encoded = self.plot_png_base64.as_ref()?;
        general_purpose::STANDARD.decode(encoded).ok()
    }
}

pub async fn process_playground_job(
    context: &RuntimeContext,
    job: &PlaygroundJob,
) -> Result<PlaygroundResult> {
    // 1. Wait for the shared runtime; page-level failures abort the job
    context.ready().await?;

    // 2. Run
    let mode = if job.plot {
        ExecutionMode::PlotCapture
    } else {
        ExecutionMode::Standard
    };
    let mut harness = ExecutionHarness::new(context.clone());
    let result = harness.run(&job.source, mode).await?;

    // 3. Build result
    info!(
        "Playground run finished: success={}, stdout={}B, stderr={}B",
        result.is_success(),
        result.stdout.len(),
        result.stderr.len()
    );

    Ok(PlaygroundResult {
        success: result.is_success(),
        stdout: result.stdout.clone(),
        stderr: result.stderr.clone(),
        plot_png_base64: result
            .plot_image_data
            .as_ref()
            .map(|png| general_purpose::STANDARD.encode(png)),
        error: result.failure.as_ref().map(|e| e.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{mounted_runtime, FakeInterpreter};

    #[tokio::test]
    async fn test_standard_job() {
        let (_provider, context) = mounted_runtime(FakeInterpreter::new()).await;
        let job = PlaygroundJob {
            source: "    print('hello')\n    print('oops', file=sys.stderr)".to_string(),
            plot: false,
        };

        let result = process_playground_job(&context, &job).await.unwrap();

        assert!(result.success);
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "oops\n");
        assert!(result.plot_png_base64.is_none());
    }

    #[tokio::test]
    async fn test_failed_job_reports_error() {
        let (_provider, context) = mounted_runtime(FakeInterpreter::new()).await;
        let job = PlaygroundJob {
            source: "raise ZeroDivisionError('division by zero')".to_string(),
            plot: false,
        };

        let result = process_playground_job(&context, &job).await.unwrap();

        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("ZeroDivisionError: division by zero")
        );
        assert!(result.stderr.starts_with("ZeroDivisionError: division by zero\n"));

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("plot_png_base64").is_none());
    }

    #[tokio::test]
    async fn test_plot_job_returns_png() {
        let (_provider, context) = mounted_runtime(FakeInterpreter::new()).await;
        let job = PlaygroundJob {
            source: "plt.plot([1, 2, 3])".to_string(),
            plot: true,
        };

        let result = process_playground_job(&context, &job).await.unwrap();

        assert!(result.success);
        assert_eq!(result.plot_png().unwrap(), b"plt.plot([1, 2, 3])");
    }
}
