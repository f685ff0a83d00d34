use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "dslearn", about = "Interactive data science course runtime", version)]
pub struct Cli {
    /// Content root (overrides DSLEARN_CONTENT_DIR).
    #[arg(long, global = true)]
    pub content_dir: Option<PathBuf>,

    /// Public asset directory (overrides DSLEARN_ASSET_DIR).
    #[arg(long, global = true)]
    pub asset_dir: Option<PathBuf>,

    /// Python executable to use instead of the provisioned runtime.
    #[arg(long, global = true)]
    pub python: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Download and unpack the Python runtime into the asset directory.
    Setup,

    /// List units and their sections.
    Units,

    /// List the sections of one unit.
    Sections {
        #[arg(value_name = "UNIT")]
        unit: String,
    },

    /// Print a section with its code blocks.
    Show {
        #[arg(value_name = "UNIT")]
        unit: String,
        #[arg(value_name = "SECTION")]
        section: String,

        /// Run every code block and print its output.
        #[arg(long)]
        run: bool,

        /// Write captured plots to this directory.
        #[arg(long = "plots-dir", value_name = "DIR")]
        plots_dir: Option<PathBuf>,
    },

    /// Run a Python snippet against the shared runtime.
    Run {
        /// Source file; reads stdin when omitted.
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Capture the matplotlib figure as a PNG.
        #[arg(long)]
        plot: bool,

        /// Where to write the captured PNG.
        #[arg(long, value_name = "PNG", requires = "plot")]
        out: Option<PathBuf>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Take the quiz attached to a section.
    Quiz {
        #[arg(value_name = "UNIT")]
        unit: String,
        #[arg(value_name = "SECTION")]
        section: String,
    },
}
