//! Parsing and validation of `tracex.toml` instrumentation settings.
//!
//! This crate reads the configuration file and produces a strongly-typed
//! [`TraceConfig`] holding the trace rule lists, the tracing hook methods,
//! output archive settings, and worker pool sizing.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use types::*;
