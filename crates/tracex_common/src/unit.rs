//! Compiled units and the change set that partitions them.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Incremental state of a compiled unit relative to the previous build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Not present in the previous build.
    Added,
    /// Present before, with different bytes.
    Modified,
    /// Present before, gone now.
    Removed,
    /// Present before with identical bytes.
    Unchanged,
}

impl ChangeKind {
    /// Returns `true` if the unit's bytes must be (re)written.
    pub fn needs_write(self) -> bool {
        matches!(self, Self::Added | Self::Modified)
    }

    /// Returns `true` if a prior output entry for the unit must be dropped.
    pub fn drops_previous(self) -> bool {
        matches!(self, Self::Modified | Self::Removed)
    }
}

/// Where a compiled unit came from, by position in the input lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UnitOrigin {
    /// Member of the input archive at this index.
    Archive(usize),
    /// File under the input directory root at this index.
    Directory(usize),
    /// Known only from the previous build's fingerprints (a removed
    /// archive member).
    Previous,
}

/// The bytes of a unit, or where to find them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitContent {
    /// Bytes already loaded (archive members are decompressed while hashing).
    Bytes(Vec<u8>),
    /// A loose file that the owning task reads itself.
    File(PathBuf),
    /// No content: the unit was removed or needs no work.
    Absent,
}

/// One compiled method-container (or pass-through resource) in the build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUnit {
    /// Normalized relative path, e.g. `com/app/Foo.class`.
    pub identity: String,
    /// Which input the unit belongs to.
    pub origin: UnitOrigin,
    /// Incremental state for this run.
    pub state: ChangeKind,
    /// Unit bytes or their location.
    pub content: UnitContent,
}

/// Number of units per actionable state, reported for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    /// Units not present in the previous build.
    pub added: usize,
    /// Units whose bytes changed.
    pub modified: usize,
    /// Units that disappeared.
    pub removed: usize,
}

/// Partition of every current unit by [`ChangeKind`].
///
/// Computed fresh on each invocation. Each identity appears at most once
/// across all four lists.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Units not present in the previous build.
    pub added: Vec<CompiledUnit>,
    /// Units whose bytes changed.
    pub modified: Vec<CompiledUnit>,
    /// Units that disappeared.
    pub removed: Vec<CompiledUnit>,
    /// Units whose bytes are identical to the previous build.
    pub unchanged: Vec<CompiledUnit>,
}

impl ChangeSet {
    /// Files a unit under the list for its state.
    pub fn push(&mut self, unit: CompiledUnit) {
        match unit.state {
            ChangeKind::Added => self.added.push(unit),
            ChangeKind::Modified => self.modified.push(unit),
            ChangeKind::Removed => self.removed.push(unit),
            ChangeKind::Unchanged => self.unchanged.push(unit),
        }
    }

    /// Returns `true` if nothing was added, modified, or removed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Returns the added, modified, and removed counts.
    pub fn counts(&self) -> ChangeCounts {
        ChangeCounts {
            added: self.added.len(),
            modified: self.modified.len(),
            removed: self.removed.len(),
        }
    }

    /// Returns `true` if some list already holds this identity.
    pub fn contains(&self, identity: &str) -> bool {
        self.iter().any(|u| u.identity == identity)
    }

    /// Iterates all units, added first, then modified, removed, unchanged.
    pub fn iter(&self) -> impl Iterator<Item = &CompiledUnit> {
        self.added
            .iter()
            .chain(&self.modified)
            .chain(&self.removed)
            .chain(&self.unchanged)
    }

    /// Consumes the set, yielding the units that require a task.
    pub fn into_actionable(self) -> impl Iterator<Item = CompiledUnit> {
        self.added
            .into_iter()
            .chain(self.modified)
            .chain(self.removed)
    }
}

/// Normalizes a relative unit path to its identity form.
///
/// Backslashes become `/`, leading `./` and `/` are stripped, and empty
/// segments collapse. Returns `None` for paths that are empty or that
/// contain `..` segments, since those could escape the destination tree.
pub fn normalize_identity(raw: &str) -> Option<String> {
    let unified = raw.replace('\\', "/");
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}
