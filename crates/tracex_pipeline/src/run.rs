//! Invocation orchestration.
//!
//! A run proceeds in single-threaded phases around two parallel ones:
//!
//! 1. Load config-derived state and the previous manifest; decide between
//!    an incremental run and a full rebuild.
//! 2. Detect changes (archives fingerprinted in parallel).
//! 3. Rewrite changed units in parallel into the unit store.
//! 4. Merge with the previous output and publish the archive.
//! 5. Commit the new fingerprint manifest.
//!
//! Any error aborts before publishing; the previous output and manifest are
//! then left as they were, or both removed if a full rebuild had started.

use std::time::Instant;

use tracex_archive::{Assembler, ZipArchive};
use tracex_cache::{Cache, FingerprintManifest};
use tracex_config::loader::validate_config;

use crate::detect::detect;
use crate::error::PipelineError;
use crate::executor::{Executor, TaskContext};
use crate::invocation::{InputChanges, Invocation, RunReport};
use crate::TRACEX_VERSION;

/// Runs the pipeline once.
pub fn run(invocation: &Invocation) -> Result<RunReport, PipelineError> {
    let started = Instant::now();
    let config = &invocation.config;
    validate_config(config)?;
    let filter = config.filter()?;
    let settings = config.settings_fingerprint(&filter);
    let archives: Vec<String> = invocation
        .archives
        .iter()
        .map(|path| path.display().to_string())
        .collect();

    let mut cache = Cache::open(&invocation.intermediate_dir, TRACEX_VERSION);
    let mut rebuild_reason = match invocation.changes {
        InputChanges::NonIncremental => Some("non-incremental build".to_string()),
        InputChanges::Incremental(_) => cache
            .invalidation(&settings, &archives)
            .map(|reason| reason.to_string()),
    };
    let previous_output = if rebuild_reason.is_none() {
        match ZipArchive::open(&invocation.output) {
            Ok(archive) => Some(archive),
            Err(e) => {
                rebuild_reason = Some(format!("previous output unusable: {e}"));
                None
            }
        }
    } else {
        None
    };
    let full_rebuild = rebuild_reason.is_some();
    if let Some(reason) = &rebuild_reason {
        tracing::info!(reason = %reason, "full rebuild");
        cache.reset()?;
    }

    let executor = Executor::new(config.executor.jobs)?;
    tracing::debug!(threads = executor.threads(), "worker pool ready");

    let phase = Instant::now();
    let detection = executor.install(|| detect(invocation, &cache, full_rebuild))?;
    let counts = detection.changes.counts();
    let unchanged = detection.changes.unchanged.len();
    tracing::info!(
        added = counts.added,
        modified = counts.modified,
        removed = counts.removed,
        unchanged,
        "detected changes"
    );
    tracing::debug!(elapsed_ms = phase.elapsed().as_millis() as u64, "detect phase");

    let phase = Instant::now();
    let ctx = TaskContext {
        filter: &filter,
        hooks: &config.hooks,
        store: cache.store(),
    };
    let actionable = detection.changes.into_actionable().collect();
    let outcomes = executor.run(actionable, &ctx)?;
    tracing::debug!(
        elapsed_ms = phase.elapsed().as_millis() as u64,
        tasks = outcomes.len(),
        "rewrite phase"
    );

    let phase = Instant::now();
    let output_entries = if !full_rebuild && outcomes.is_empty() {
        tracing::info!("no changes; output left as is");
        previous_output.map_or(0, |archive| archive.entries().len())
    } else {
        let mut assembler = match previous_output {
            Some(previous) => Assembler::from_previous(previous, config.archive),
            None => Assembler::new(config.archive),
        };
        for outcome in &outcomes {
            if outcome.state.drops_previous() {
                assembler.remove(&outcome.identity);
            }
            if outcome.state.needs_write() {
                let bytes = cache.store().read(&outcome.identity)?;
                assembler.insert(outcome.identity.clone(), bytes);
            }
        }
        assembler.publish(&invocation.output)?
    };
    tracing::debug!(elapsed_ms = phase.elapsed().as_millis() as u64, "assemble phase");

    let mut manifest = FingerprintManifest::new(TRACEX_VERSION, settings, archives);
    manifest.members = detection.fingerprints;
    cache.commit(manifest)?;

    let report = RunReport {
        added: counts.added,
        modified: counts.modified,
        removed: counts.removed,
        unchanged,
        units_rewritten: outcomes
            .iter()
            .filter(|o| !o.instrumented.is_empty())
            .count(),
        methods_instrumented: outcomes.iter().map(|o| o.instrumented.len()).sum(),
        output_entries,
        full_rebuild,
    };
    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        methods = report.methods_instrumented,
        entries = report.output_entries,
        "run complete"
    );
    Ok(report)
}
