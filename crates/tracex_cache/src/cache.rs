//! High-level cache orchestrator.
//!
//! [`Cache`] ties together the fingerprint manifest and the unit store. It
//! loads the previous run's state once, decides whether that state can seed
//! an incremental run, and commits the new manifest after the output has
//! been published.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracex_common::ContentHash;

use crate::error::CacheError;
use crate::hasher::{Fingerprinter, MemberChanges};
use crate::manifest::FingerprintManifest;
use crate::store::UnitStore;

/// Why the previous run's state cannot seed an incremental run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    /// No manifest was found.
    NoManifest,
    /// A manifest exists but could not be read.
    CorruptManifest,
    /// The manifest was written by another tool version.
    VersionChanged {
        /// Version recorded in the manifest.
        previous: String,
    },
    /// Rules, hooks or archive settings differ.
    SettingsChanged,
    /// The list of input archives differs.
    ArchivesChanged,
}

impl fmt::Display for Invalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invalidation::NoManifest => f.write_str("no previous fingerprints"),
            Invalidation::CorruptManifest => f.write_str("previous fingerprints unreadable"),
            Invalidation::VersionChanged { previous } => {
                write!(f, "fingerprints written by tracex {previous}")
            }
            Invalidation::SettingsChanged => f.write_str("settings changed"),
            Invalidation::ArchivesChanged => f.write_str("input archive list changed"),
        }
    }
}

/// Incremental state manager for one run.
pub struct Cache {
    dir: PathBuf,
    previous: Option<FingerprintManifest>,
    corrupt: bool,
    store: UnitStore,
    tracex_version: String,
}

impl Cache {
    /// Opens the intermediate directory, loading the previous manifest.
    ///
    /// An unreadable manifest is logged and treated as absent; it never
    /// fails the run.
    pub fn open(dir: &Path, tracex_version: &str) -> Self {
        let (previous, corrupt) = match FingerprintManifest::load(dir) {
            Ok(previous) => (previous, false),
            Err(e) => {
                tracing::warn!(error = %e, "discarding previous fingerprints");
                (None, true)
            }
        };

        Self {
            dir: dir.to_path_buf(),
            previous,
            corrupt,
            store: UnitStore::new(dir, tracex_version),
            tracex_version: tracex_version.to_string(),
        }
    }

    /// Intermediate directory this cache lives in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Tool version this cache writes.
    pub fn tracex_version(&self) -> &str {
        &self.tracex_version
    }

    /// The unit store.
    pub fn store(&self) -> &UnitStore {
        &self.store
    }

    /// Returns the reason the previous state is unusable, or `None` when an
    /// incremental run may build on it.
    pub fn invalidation(&self, settings: &ContentHash, archives: &[String]) -> Option<Invalidation> {
        let Some(previous) = &self.previous else {
            return Some(if self.corrupt {
                Invalidation::CorruptManifest
            } else {
                Invalidation::NoManifest
            });
        };
        if previous.tracex_version != self.tracex_version {
            return Some(Invalidation::VersionChanged {
                previous: previous.tracex_version.clone(),
            });
        }
        if previous.settings != *settings {
            return Some(Invalidation::SettingsChanged);
        }
        if previous.archives != archives {
            return Some(Invalidation::ArchivesChanged);
        }
        None
    }

    /// Diffs current archive member fingerprints against the previous run.
    ///
    /// With no previous manifest every member is added.
    pub fn detect_changes(&self, current: &BTreeMap<String, ContentHash>) -> MemberChanges {
        match &self.previous {
            Some(previous) => Fingerprinter::detect_changes(current, &previous.members),
            None => Fingerprinter::detect_changes(current, &BTreeMap::new()),
        }
    }

    /// Forgets all previous state before a full rebuild.
    ///
    /// Removes the manifest first, so a run interrupted after this point is
    /// never mistaken for a consistent incremental base.
    pub fn reset(&mut self) -> Result<(), CacheError> {
        FingerprintManifest::remove(&self.dir)?;
        self.store.clear()?;
        self.previous = None;
        self.corrupt = false;
        Ok(())
    }

    /// Persists `manifest` as the state of this (successful) run.
    pub fn commit(&mut self, manifest: FingerprintManifest) -> Result<(), CacheError> {
        manifest.save(&self.dir)?;
        self.previous = Some(manifest);
        self.corrupt = false;
        Ok(())
    }
}
