//! Incremental trace instrumentation of compiled JVM units.
//!
//! One [`run`] takes the current input archives and directory roots, works
//! out which units changed since the last successful run, rewrites those in
//! parallel, and publishes a single merged output archive. State carried
//! between runs lives in the invocation's intermediate directory.

#![warn(missing_docs)]

pub mod detect;
pub mod error;
pub mod executor;
pub mod invocation;
pub mod run;

pub use error::PipelineError;
pub use executor::{Executor, TaskOutcome};
pub use invocation::{load_change_feed, FileChange, InputChanges, Invocation, RunReport};
pub use run::run;

/// Version recorded in fingerprint manifests and stored units.
pub const TRACEX_VERSION: &str = env!("CARGO_PKG_VERSION");
