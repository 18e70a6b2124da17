//! CLI parse: clap types for termforge. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// termforge - column-wise content generation with quality review
#[derive(Parser)]
#[command(name = "termforge")]
#[command(about = "Generate, evaluate and improve content columns for a term corpus")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the term corpus
    Terms {
        #[command(subcommand)]
        command: TermsCommands,
    },
    /// Estimate the cost of running a column
    Estimate {
        /// Column id
        column: String,
        /// Count terms that already have content for this column
        #[arg(long)]
        no_skip_existing: bool,
    },
    /// Run a column job to completion (Ctrl-C pauses at the next batch boundary)
    Run {
        /// Column id
        column: String,
        /// Processing mode (generate-only, generate-evaluate, full-pipeline)
        #[arg(long)]
        mode: Option<String>,
        /// Minimum passing quality score (1-10)
        #[arg(long)]
        threshold: Option<u8>,
        /// Terms per batch (1-50)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Pause between batches in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Regenerate terms that already have content for this column
        #[arg(long)]
        no_skip_existing: bool,
        /// Process terms in reverse alphabetical order
        #[arg(long)]
        reverse: bool,
        /// Process at most this many terms
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Resume a paused column job and run it to completion
    Resume {
        /// Column id
        column: String,
    },
    /// Show job status for one column or all columns
    Status {
        /// Column id (omit for every known job)
        column: Option<String>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the quality summary of a column job
    Quality {
        /// Column id
        column: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum TermsCommands {
    /// Import terms from a JSON array of {"id", "name"} objects
    Import {
        /// Path to the JSON file
        path: PathBuf,
    },
}
