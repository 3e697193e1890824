//! Bounded parallel execution of per-unit tasks.

use rayon::prelude::*;
use tracex_cache::UnitStore;
use tracex_classfile::rewrite_unit;
use tracex_common::{ChangeKind, CompiledUnit, UnitContent};
use tracex_config::TraceHooks;
use tracex_filter::TagFilter;

use crate::error::PipelineError;

/// What one task did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Identity of the unit.
    pub identity: String,
    /// State the unit was processed in.
    pub state: ChangeKind,
    /// Tags of the methods that received trace markers.
    pub instrumented: Vec<String>,
}

/// Read-only inputs shared by every task.
pub struct TaskContext<'a> {
    /// Method selection rules.
    pub filter: &'a TagFilter,
    /// Begin/end hook methods.
    pub hooks: &'a TraceHooks,
    /// Destination for transformed units.
    pub store: &'a UnitStore,
}

/// A fixed-size rayon pool.
pub struct Executor {
    pool: rayon::ThreadPool,
}

impl Executor {
    /// Creates a pool with `jobs` threads, or the available parallelism
    /// when `jobs` is zero.
    pub fn new(jobs: usize) -> Result<Self, PipelineError> {
        let threads = if jobs > 0 {
            jobs
        } else {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tracex-worker-{i}"))
            .build()
            .map_err(|e| PipelineError::ThreadPool {
                reason: e.to_string(),
            })?;
        Ok(Self { pool })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `op` inside the pool, so nested parallel iterators use it.
    pub fn install<R, OP>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Runs one task per unit and waits for all of them.
    ///
    /// The first failing task stops further scheduling and its error is
    /// returned. Outcomes are sorted by identity.
    pub fn run(
        &self,
        units: Vec<CompiledUnit>,
        ctx: &TaskContext<'_>,
    ) -> Result<Vec<TaskOutcome>, PipelineError> {
        let mut outcomes = self.pool.install(|| {
            units
                .into_par_iter()
                .map(|unit| run_task(unit, ctx))
                .collect::<Result<Vec<_>, _>>()
        })?;
        outcomes.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(outcomes)
    }
}

fn run_task(unit: CompiledUnit, ctx: &TaskContext<'_>) -> Result<TaskOutcome, PipelineError> {
    let CompiledUnit {
        identity,
        state,
        content,
        ..
    } = unit;

    if !state.needs_write() {
        if state == ChangeKind::Removed {
            ctx.store.remove(&identity)?;
        }
        return Ok(TaskOutcome {
            identity,
            state,
            instrumented: Vec::new(),
        });
    }

    let bytes = match content {
        UnitContent::Bytes(bytes) => bytes,
        UnitContent::File(path) => std::fs::read(&path).map_err(|e| PipelineError::Io {
            path: path.clone(),
            source: e,
        })?,
        UnitContent::Absent => return Err(PipelineError::MissingContent { identity }),
    };

    let rewritten = rewrite_unit(&identity, bytes, ctx.filter, ctx.hooks).map_err(|e| {
        PipelineError::Rewrite {
            identity: identity.clone(),
            source: e,
        }
    })?;
    ctx.store.write(&identity, &rewritten.bytes)?;
    if !rewritten.instrumented.is_empty() {
        tracing::debug!(
            identity = %identity,
            methods = rewritten.instrumented.len(),
            "instrumented"
        );
    }

    Ok(TaskOutcome {
        identity,
        state,
        instrumented: rewritten.instrumented,
    })
}
