//! Inputs and outputs of one pipeline run.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracex_common::{ChangeCounts, ChangeKind};
use tracex_config::TraceConfig;

use crate::error::PipelineError;

/// Everything a run needs from its host.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Input archives, in priority order.
    pub archives: Vec<PathBuf>,
    /// Input directory roots, in priority order after the archives.
    pub directories: Vec<PathBuf>,
    /// What the host knows about loose-file changes.
    pub changes: InputChanges,
    /// Durable per-task directory for incremental state.
    pub intermediate_dir: PathBuf,
    /// Path of the merged output archive.
    pub output: PathBuf,
    /// Trace rules, hooks, archive and executor settings.
    pub config: TraceConfig,
}

/// The host's view of loose-file changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputChanges {
    /// No change information; everything is rebuilt.
    NonIncremental,
    /// Loose files changed since the last run. Archives are diffed by
    /// fingerprint regardless.
    Incremental(Vec<FileChange>),
}

/// One entry of the host's change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// The input directory root containing the file.
    pub root: PathBuf,
    /// Path of the file, relative to `root` or absolute under it.
    pub path: PathBuf,
    /// How the file changed.
    pub kind: ChangeKind,
}

impl FileChange {
    /// Path of the file relative to its root.
    pub fn relative_path(&self) -> &Path {
        self.path.strip_prefix(&self.root).unwrap_or(&self.path)
    }
}

/// Reads a change feed: a JSON array of [`FileChange`] objects.
pub fn load_change_feed(path: &Path) -> Result<Vec<FileChange>, PipelineError> {
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&content).map_err(|e| PipelineError::ChangeFeed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Units not present in the previous build.
    pub added: usize,
    /// Units whose bytes changed.
    pub modified: usize,
    /// Units that disappeared.
    pub removed: usize,
    /// Units carried over untouched.
    pub unchanged: usize,
    /// Units whose bytes the rewriter changed.
    pub units_rewritten: usize,
    /// Methods that received trace markers.
    pub methods_instrumented: usize,
    /// Entries in the published output archive.
    pub output_entries: usize,
    /// Whether the run ignored all previous state.
    pub full_rebuild: bool,
}

impl RunReport {
    /// The added, modified, and removed counts.
    pub fn counts(&self) -> ChangeCounts {
        ChangeCounts {
            added: self.added,
            modified: self.modified,
            removed: self.removed,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} modified, {} removed, {} unchanged; \
             {} methods instrumented in {} units",
            self.added,
            self.modified,
            self.removed,
            self.unchanged,
            self.methods_instrumented,
            self.units_rewritten
        )?;
        if self.full_rebuild {
            f.write_str(" (full rebuild)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_feed_parses() {
        let dir = tempfile::tempdir().unwrap();
        let feed = dir.path().join("changes.json");
        std::fs::write(
            &feed,
            r#"[
                {"root": "classes", "path": "com/app/Foo.class", "kind": "modified"},
                {"root": "classes", "path": "classes/com/app/Gone.class", "kind": "removed"}
            ]"#,
        )
        .unwrap();
        let changes = load_change_feed(&feed).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
        assert_eq!(changes[0].relative_path(), Path::new("com/app/Foo.class"));
        assert_eq!(changes[1].relative_path(), Path::new("com/app/Gone.class"));
    }

    #[test]
    fn malformed_feed_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let feed = dir.path().join("changes.json");
        std::fs::write(&feed, r#"[{"root": "c", "path": "A.class", "kind": "renamed"}]"#).unwrap();
        assert!(matches!(
            load_change_feed(&feed),
            Err(PipelineError::ChangeFeed { .. })
        ));
    }

    #[test]
    fn report_display() {
        let report = RunReport {
            added: 1,
            modified: 2,
            removed: 3,
            unchanged: 4,
            units_rewritten: 1,
            methods_instrumented: 5,
            output_entries: 7,
            full_rebuild: true,
        };
        assert_eq!(
            report.to_string(),
            "1 added, 2 modified, 3 removed, 4 unchanged; \
             5 methods instrumented in 1 units (full rebuild)"
        );
        assert_eq!(report.counts().removed, 3);
    }
}
