mod cli;
mod content;
mod core;
mod engine;
mod jobs;
mod quiz;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{error, info};

use crate::cli::{Cli, Command};
use crate::content::ContentResolver;
use crate::core::config::{init_config, AppConfig};
use crate::core::error::RuntimeError;
use crate::jobs::playground::{process_playground_job, PlaygroundJob};
use crate::jobs::provision::{process_provision_job, ProvisionJob, ProvisionOutcome};
use crate::jobs::quiz::run_quiz;
use crate::jobs::section::{process_section_job, SectionJob};
use crate::quiz::QuizSession;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dslearn=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    if let Some(dir) = cli.content_dir {
        config.content_dir = dir;
    }
    if let Some(dir) = cli.asset_dir {
        config.asset_dir = dir;
    }
    if cli.python.is_some() {
        config.python = cli.python;
    }
    let config = init_config(config)?;
    info!(
        "Content: {:?}, assets: {:?}, packages: {}",
        config.content_dir,
        config.asset_dir,
        config.packages.join(", ")
    );

    let outcome = match cli.command {
        Command::Setup => setup(config).await,
        Command::Units => list_units(config),
        Command::Sections { unit } => list_sections(config, &unit),
        Command::Show {
            unit,
            section,
            run,
            plots_dir,
        } => show(config, unit, section, run, plots_dir).await,
        Command::Run {
            file,
            plot,
            out,
            json,
        } => run_snippet(config, file, plot, out, json).await,
        Command::Quiz { unit, section } => take_quiz(config, &unit, &section).await,
    };

    if let Err(e) = outcome {
        // Page-level runtime failures disable execution entirely
        if let Some(runtime) = e.downcast_ref::<RuntimeError>() {
            if runtime.is_page_level() {
                error!("Runtime failed to load: {}", runtime);
                eprintln!("Python runtime unavailable: {}", runtime);
                eprintln!("Code blocks cannot be executed. Run `dslearn setup` or set DSLEARN_PYTHON.");
                std::process::exit(2);
            }
        }
        return Err(e);
    }

    Ok(())
}

async fn setup(config: &AppConfig) -> Result<()> {
    match process_provision_job(&ProvisionJob::from_config(config)).await? {
        ProvisionOutcome::AlreadyInstalled(dir) => {
            println!("Runtime already installed in {}", dir.display())
        }
        ProvisionOutcome::Installed(dir) => println!("Runtime installed in {}", dir.display()),
    }
    Ok(())
}

fn list_units(config: &AppConfig) -> Result<()> {
    let resolver = ContentResolver::new(config.content_dir.clone());
    let units = resolver.list_units()?;
    if units.is_empty() {
        println!("No units in {}", resolver.root().display());
    }
    for unit in units {
        println!("{}  {}", unit.slug, unit.title);
        for section in unit.sections {
            println!("    {}  {}", section.slug, section.title);
        }
    }
    Ok(())
}

fn list_sections(config: &AppConfig, unit: &str) -> Result<()> {
    let resolver = ContentResolver::new(config.content_dir.clone());
    let sections = resolver.list_sections(unit)?;
    if sections.is_empty() {
        println!("No sections in {}", unit);
    }
    for section in sections {
        println!("{}  {}", section.slug, section.title);
    }
    Ok(())
}

async fn show(
    config: &AppConfig,
    unit: String,
    section: String,
    run_blocks: bool,
    plots_dir: Option<PathBuf>,
) -> Result<()> {
    let resolver = ContentResolver::new(config.content_dir.clone());
    let provider = run_blocks.then(|| jobs::mount_runtime(config));
    let context = provider.as_ref().map(|p| p.context());

    let job = SectionJob {
        unit,
        section,
        run_blocks,
        plots_dir,
    };
    let view = process_section_job(&resolver, context.as_ref(), &job).await?;

    println!("{} / {}\n", view.unit_title, view.title);
    println!("{}", view.body.trim_end());

    for (idx, block) in view.blocks.iter().enumerate() {
        let kind = if block.spec.is_plot { " (plot)" } else { "" };
        println!("\n--- block {}{} ---", idx + 1, kind);
        println!("{}", block.spec.initial_code.trim());

        let Some(result) = &block.result else {
            continue;
        };
        if block.spec.show_output || !result.is_success() {
            if !result.stdout.is_empty() {
                println!("--- output ---\n{}", result.stdout.trim_end());
            }
            if !result.stderr.is_empty() {
                println!("--- error ---\n{}", result.stderr.trim_end());
            }
        }
        if let Some(path) = &block.plot_path {
            println!("--- plot: {} ---", path.display());
        }
    }

    if let Some(quiz) = &view.quiz {
        println!(
            "\nThis section has a quiz ({} questions): dslearn quiz {} {}",
            quiz.questions.len(),
            job.unit,
            job.section
        );
    }
    Ok(())
}

async fn run_snippet(
    config: &AppConfig,
    file: Option<PathBuf>,
    plot: bool,
    out: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let source = match &file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?,
        None => {
            let mut source = String::new();
            tokio::io::stdin()
                .read_to_string(&mut source)
                .await
                .context("Failed to read stdin")?;
            source
        }
    };

    let provider = jobs::mount_runtime(config);
    let result = process_playground_job(&provider.context(), &PlaygroundJob { source, plot }).await?;

    if let (Some(path), Some(png)) = (&out, result.plot_png()) {
        tokio::fs::write(path, png)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?;
        info!("Plot written to {:?}", path);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn take_quiz(config: &AppConfig, unit: &str, section: &str) -> Result<()> {
    let resolver = ContentResolver::new(config.content_dir.clone());
    let quiz = resolver
        .load_quiz(unit, section)
        .with_context(|| format!("No quiz for {}/{}", unit, section))?;

    let unit = unit.to_string();
    let section = section.to_string();
    let mut session = QuizSession::new(quiz).on_complete(move |score, total| {
        info!("Quiz {}/{} completed: {}/{}", unit, section, score, total);
    });

    let mut stdout = tokio::io::stdout();
    run_quiz(&mut session, BufReader::new(tokio::io::stdin()), &mut stdout).await?;
    Ok(())
}
