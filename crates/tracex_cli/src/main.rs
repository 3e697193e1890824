//! tracex CLI: incremental trace instrumentation of compiled JVM units.
//!
//! Provides `tracex run` to instrument archives and class directories into a
//! single output archive, and `tracex match` to check which method tags a
//! rule set selects.

#![warn(missing_docs)]

mod matching;
mod run;
mod settings;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// tracex: incremental JVM bytecode trace instrumentation.
#[derive(Parser, Debug)]
#[command(name = "tracex", version, about = "Incremental JVM trace instrumentation")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a `tracex.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Instrument archives and class directories into one output archive.
    Run(RunArgs),
    /// Print which method tags the trace rules select.
    Match(MatchArgs),
}

/// Arguments for the `tracex run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Input archive (repeatable, in priority order).
    #[arg(long = "archive")]
    pub archives: Vec<PathBuf>,

    /// Input class directory root (repeatable, after archives in priority).
    #[arg(long = "dir")]
    pub dirs: Vec<PathBuf>,

    /// Directory for incremental state, kept between runs.
    #[arg(long)]
    pub intermediate: PathBuf,

    /// Path of the merged output archive.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Include pattern; replaces the configured list when given.
    #[arg(long)]
    pub include: Vec<String>,

    /// Exclude pattern; replaces the configured list when given.
    #[arg(long)]
    pub exclude: Vec<String>,

    /// JSON change feed for loose files. Implies `--incremental`.
    #[arg(long)]
    pub changes: Option<PathBuf>,

    /// Reuse the previous run's state. Without a change feed, no loose file
    /// is treated as changed. Without either flag the run rebuilds
    /// everything.
    #[arg(long)]
    pub incremental: bool,

    /// Worker threads (0 = available parallelism).
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Copy every unit through without instrumenting.
    #[arg(long)]
    pub disable: bool,

    /// Report format.
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub report: ReportFormat,
}

/// Arguments for the `tracex match` subcommand.
#[derive(Parser, Debug)]
pub struct MatchArgs {
    /// Tags to check, e.g. `com.app.Foo#bar`.
    #[arg(required = true)]
    pub tags: Vec<String>,

    /// Include pattern; replaces the configured list when given.
    #[arg(long)]
    pub include: Vec<String>,

    /// Exclude pattern; replaces the configured list when given.
    #[arg(long)]
    pub exclude: Vec<String>,
}

/// Run report output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    /// Human-readable summary on stderr.
    Text,
    /// Machine-readable JSON on stdout.
    Json,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print debug information.
    pub verbose: bool,
    /// Optional path to a configuration file.
    pub config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };
    init_tracing(&global);

    let result = match cli.command {
        Command::Run(ref args) => run::run(args, &global),
        Command::Match(ref args) => matching::run(args, &global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// Installs the log subscriber. `RUST_LOG` directives apply on top of the
/// level chosen by `-q`/`-v`.
fn init_tracing(global: &GlobalArgs) {
    let level = if global.quiet {
        tracing::Level::ERROR
    } else if global.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
