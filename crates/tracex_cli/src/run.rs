//! `tracex run`: one incremental instrumentation pass.

use tracex_pipeline::{load_change_feed, InputChanges, Invocation};

use crate::settings::{override_rules, resolve_config};
use crate::{GlobalArgs, ReportFormat, RunArgs};

/// Runs the `tracex run` command.
///
/// Builds an [`Invocation`] from the arguments and configuration, runs the
/// pipeline, and prints the report. Returns exit code 0 on success.
pub fn run(args: &RunArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let mut config = resolve_config(global)?;
    override_rules(&mut config, &args.include, &args.exclude);
    if let Some(jobs) = args.jobs {
        config.executor.jobs = jobs;
    }
    if args.disable {
        config.trace.enabled = false;
    }

    let invocation = Invocation {
        archives: args.archives.clone(),
        directories: args.dirs.clone(),
        changes: input_changes(args)?,
        intermediate_dir: args.intermediate.clone(),
        output: args.output.clone(),
        config,
    };

    if !global.quiet {
        eprintln!(
            "  Instrumenting {} archive(s), {} director{} -> {}",
            invocation.archives.len(),
            invocation.directories.len(),
            if invocation.directories.len() == 1 { "y" } else { "ies" },
            invocation.output.display()
        );
    }

    let report = tracex_pipeline::run(&invocation)?;

    match args.report {
        ReportFormat::Text => {
            if !global.quiet {
                eprintln!("    Finished {report}");
            }
        }
        ReportFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(0)
}

/// A change feed makes the run incremental. `--incremental` alone means an
/// incremental run in which no loose file changed.
fn input_changes(args: &RunArgs) -> Result<InputChanges, tracex_pipeline::PipelineError> {
    match &args.changes {
        Some(feed) => Ok(InputChanges::Incremental(load_change_feed(feed)?)),
        None if args.incremental => Ok(InputChanges::Incremental(Vec::new())),
        None => Ok(InputChanges::NonIncremental),
    }
}
