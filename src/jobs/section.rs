//! Render a section (`dslearn show`)
//!
//! Loads the body, extracts its code blocks and optionally runs them all
//! against the shared runtime. Each block gets its own harness; the
//! runtime serializes the actual runs.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::content::{extract_code_blocks, CodeBlockSpec, ContentResolver};
use crate::engine::harness::{ExecutionHarness, ExecutionMode, ExecutionResult};
use crate::engine::provider::RuntimeContext;
use crate::quiz::QuizData;

#[derive(Debug, Clone)]
pub struct SectionJob {
    pub unit: String,
    pub section: String,
    /// Run every block before returning
    pub run_blocks: bool,
    /// Where captured plots are written
    pub plots_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct BlockOutcome {
    pub spec: CodeBlockSpec,
    pub result: Option<ExecutionResult>,
    /// File the captured plot was written to
    pub plot_path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct SectionView {
    pub unit_title: String,
    pub title: String,
    pub body: String,
    pub blocks: Vec<BlockOutcome>,
    pub quiz: Option<QuizData>,
}

pub async fn process_section_job(
    resolver: &ContentResolver,
    context: Option<&RuntimeContext>,
    job: &SectionJob,
) -> Result<SectionView> {
    // 1. Load content
    let body = resolver.load_section_body(&job.unit, &job.section)?;
    let title = resolver
        .list_sections(&job.unit)?
        .into_iter()
        .find(|s| s.slug == job.section)
        .map(|s| s.title)
        .unwrap_or_else(|| job.section.clone());
    let specs = extract_code_blocks(&body);
    info!(
        "Loaded {}/{} with {} code block(s)",
        job.unit,
        job.section,
        specs.len()
    );

    // 2. Run blocks
    let results = match (job.run_blocks, context) {
        (true, Some(context)) => {
            context.ready().await?;
            run_blocks(context, &specs).await?
        }
        (true, None) => {
            warn!("No runtime mounted, showing blocks without output");
            vec![None; specs.len()]
        }
        (false, _) => vec![None; specs.len()],
    };

    // 3. Write plots
    let mut blocks = Vec::with_capacity(specs.len());
    for (idx, (spec, result)) in specs.into_iter().zip(results).enumerate() {
        let png = result.as_ref().and_then(|r| r.plot_image_data.as_ref());
        let plot_path = match (&job.plots_dir, png) {
            (Some(dir), Some(png)) => Some(write_plot(dir, &job.section, idx + 1, png).await?),
            _ => None,
        };
        blocks.push(BlockOutcome {
            spec,
            result,
            plot_path,
        });
    }

    // 4. Quiz
    let quiz = resolver.load_quiz(&job.unit, &job.section);

    Ok(SectionView {
        unit_title: resolver.unit_title(&job.unit),
        title,
        body,
        blocks,
        quiz,
    })
}

async fn run_blocks(
    context: &RuntimeContext,
    specs: &[CodeBlockSpec],
) -> Result<Vec<Option<ExecutionResult>>> {
    let mut harnesses: Vec<ExecutionHarness> = specs
        .iter()
        .map(|_| ExecutionHarness::new(context.clone()))
        .collect();

    let runs = harnesses.iter_mut().zip(specs).map(|(harness, spec)| async move {
        let mode = if spec.is_plot {
            ExecutionMode::PlotCapture
        } else {
            ExecutionMode::Standard
        };
        harness.run(&spec.initial_code, mode).await.cloned()
    });

    join_all(runs)
        .await
        .into_iter()
        .map(|outcome| outcome.map(Some).map_err(anyhow::Error::from))
        .collect()
}

async fn write_plot(dir: &Path, section: &str, number: usize, png: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create plot directory {:?}", dir))?;
    let path = dir.join(format!("{}-block-{}.png", section, number));
    tokio::fs::write(&path, png)
        .await
        .with_context(|| format!("Failed to write plot {:?}", path))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{mounted_runtime, FakeInterpreter};

    const BODY: &str = r#"---
title: "Plotting basics"
---
<CodeBlock initialCode={`print('first')`} />

<CodeBlock isPlot initialCode={`plt.bar([1], [2])`} />

<CodeBlock initialCode={`raise ValueError('bad')`} showOutput={false} />
"#;

    fn content() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("03-plotting");
        std::fs::create_dir_all(&unit).unwrap();
        std::fs::write(unit.join("01-basics.mdx"), BODY).unwrap();
        std::fs::write(
            unit.join("01-basics-quiz.json"),
            r#"{"title": "Check", "questions": []}"#,
        )
        .unwrap();
        dir
    }

    fn job(run_blocks: bool, plots_dir: Option<PathBuf>) -> SectionJob {
        SectionJob {
            unit: "03-plotting".to_string(),
            section: "01-basics".to_string(),
            run_blocks,
            plots_dir,
        }
    }

    #[tokio::test]
    async fn test_show_without_running() {
        let dir = content();
        let resolver = ContentResolver::new(dir.path());

        let view = process_section_job(&resolver, None, &job(false, None)).await.unwrap();

        assert_eq!(view.unit_title, "Plotting");
        assert_eq!(view.title, "Plotting basics");
        assert_eq!(view.blocks.len(), 3);
        assert!(view.blocks.iter().all(|b| b.result.is_none()));
        assert_eq!(view.quiz.unwrap().title, "Check");
    }

    #[tokio::test]
    async fn test_run_all_blocks() {
        let dir = content();
        let plots = dir.path().join("plots");
        let resolver = ContentResolver::new(dir.path());
        let fake = FakeInterpreter::new();
        let (_provider, context) = mounted_runtime(fake.clone()).await;

        let view = process_section_job(&resolver, Some(&context), &job(true, Some(plots.clone())))
            .await
            .unwrap();

        let first = view.blocks[0].result.as_ref().unwrap();
        assert_eq!(first.stdout, "first\n");

        let plot = &view.blocks[1];
        let png = plots.join("01-basics-block-2.png");
        assert_eq!(plot.plot_path.as_deref(), Some(png.as_path()));
        assert_eq!(std::fs::read(&png).unwrap(), b"plt.bar([1], [2])");

        let failed = view.blocks[2].result.as_ref().unwrap();
        assert!(!failed.is_success());
        assert!(view.blocks[2].plot_path.is_none());

        assert_eq!(fake.max_concurrent_runs(), 1);
    }

    #[tokio::test]
    async fn test_missing_section() {
        let dir = content();
        let resolver = ContentResolver::new(dir.path());
        let mut missing = job(false, None);
        missing.section = "02-nope".to_string();

        let err = process_section_job(&resolver, None, &missing).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
