//! Error types for a pipeline run.

use std::path::PathBuf;

use tracex_archive::ArchiveError;
use tracex_cache::CacheError;
use tracex_classfile::ClassFileError;
use tracex_config::ConfigError;

/// Any failure that aborts a run. Nothing is published when one occurs.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The configuration or a trace rule is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A class file could not be parsed or rewritten.
    #[error("failed to rewrite {identity}: {source}")]
    Rewrite {
        /// Identity of the offending unit.
        identity: String,
        /// The underlying class file error.
        source: ClassFileError,
    },

    /// The intermediate directory could not be read or written.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// An input archive or the output archive could not be processed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// A unit path would escape the output tree.
    #[error("unsafe unit path '{path}'")]
    UnsafePath {
        /// The offending path as found in the input.
        path: String,
    },

    /// A loose input file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A directory root could not be walked.
    #[error("failed to walk {root}: {source}")]
    Walk {
        /// The directory root.
        root: PathBuf,
        /// The underlying walk error.
        source: walkdir::Error,
    },

    /// The change feed could not be read.
    #[error("invalid change feed {path}: {reason}")]
    ChangeFeed {
        /// The feed path.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// A change feed entry names a root that is not an input directory.
    #[error("change feed names unknown directory root {root}")]
    UnknownRoot {
        /// The root named by the feed.
        root: PathBuf,
    },

    /// An added or modified unit arrived without content.
    #[error("no content for changed unit {identity}")]
    MissingContent {
        /// Identity of the unit.
        identity: String,
    },

    /// The worker pool could not be created.
    #[error("failed to start worker pool: {reason}")]
    ThreadPool {
        /// Reason reported by rayon.
        reason: String,
    },
}
