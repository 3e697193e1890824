//! Change detection.
//!
//! Archive members are fingerprinted and diffed against the previous run's
//! manifest. Loose files under the directory roots take their state from the
//! host's change feed, or are all added when there is no usable feed. Both
//! halves are merged into one [`ChangeSet`] in which every identity appears
//! once: archives claim identities first, then directory roots, each in
//! input order.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracex_archive::ZipArchive;
use tracex_cache::{Cache, Fingerprinter};
use tracex_common::{
    normalize_identity, ChangeKind, ChangeSet, CompiledUnit, ContentHash, UnitContent, UnitOrigin,
};
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::invocation::{InputChanges, Invocation};

/// Output of [`detect`].
#[derive(Debug, Default)]
pub struct Detection {
    /// Every current unit (plus removed ones), partitioned by state.
    pub changes: ChangeSet,
    /// Fingerprints of all current archive members, for the next manifest.
    pub fingerprints: BTreeMap<String, ContentHash>,
}

struct Member {
    identity: String,
    hash: ContentHash,
    bytes: Vec<u8>,
}

/// Computes the change set for `invocation`.
///
/// With `full_rebuild` set, previous state is ignored: every archive member
/// and every file under every directory root is added. Archives are read
/// and hashed in parallel on the current rayon pool.
pub fn detect(
    invocation: &Invocation,
    cache: &Cache,
    full_rebuild: bool,
) -> Result<Detection, PipelineError> {
    let scanned: Vec<Vec<Member>> = invocation
        .archives
        .par_iter()
        .map(|path| scan_archive(path))
        .collect::<Result<_, _>>()?;

    let mut current: BTreeMap<String, (usize, ContentHash, Vec<u8>)> = BTreeMap::new();
    for (index, members) in scanned.into_iter().enumerate() {
        for member in members {
            match current.entry(member.identity) {
                Entry::Occupied(existing) => tracing::warn!(
                    identity = %existing.key(),
                    archive = %invocation.archives[index].display(),
                    "duplicate unit ignored"
                ),
                Entry::Vacant(slot) => {
                    slot.insert((index, member.hash, member.bytes));
                }
            }
        }
    }

    let fingerprints: BTreeMap<String, ContentHash> = current
        .iter()
        .map(|(identity, (_, hash, _))| (identity.clone(), *hash))
        .collect();
    let members = if full_rebuild {
        Fingerprinter::detect_changes(&fingerprints, &BTreeMap::new())
    } else {
        cache.detect_changes(&fingerprints)
    };

    let mut changes = ChangeSet::default();
    for (state, identities) in [
        (ChangeKind::Added, members.added),
        (ChangeKind::Modified, members.modified),
    ] {
        for identity in identities {
            if let Some((index, _, bytes)) = current.remove(&identity) {
                changes.push(CompiledUnit {
                    identity,
                    origin: UnitOrigin::Archive(index),
                    state,
                    content: UnitContent::Bytes(bytes),
                });
            }
        }
    }
    for identity in members.unchanged {
        if let Some((index, _, _)) = current.remove(&identity) {
            changes.push(CompiledUnit {
                identity,
                origin: UnitOrigin::Archive(index),
                state: ChangeKind::Unchanged,
                content: UnitContent::Absent,
            });
        }
    }
    for identity in members.removed {
        changes.push(CompiledUnit {
            identity,
            origin: UnitOrigin::Previous,
            state: ChangeKind::Removed,
            content: UnitContent::Absent,
        });
    }

    let loose = match (&invocation.changes, full_rebuild) {
        (InputChanges::Incremental(feed), false) => {
            let mut loose = Vec::with_capacity(feed.len());
            for change in feed {
                let index = invocation
                    .directories
                    .iter()
                    .position(|root| *root == change.root)
                    .ok_or_else(|| PipelineError::UnknownRoot {
                        root: change.root.clone(),
                    })?;
                let relative = change.relative_path();
                let identity = identity_of(relative)?;
                let content = match change.kind {
                    ChangeKind::Added | ChangeKind::Modified => {
                        UnitContent::File(invocation.directories[index].join(relative))
                    }
                    ChangeKind::Removed => UnitContent::Absent,
                    ChangeKind::Unchanged => continue,
                };
                loose.push(CompiledUnit {
                    identity,
                    origin: UnitOrigin::Directory(index),
                    state: change.kind,
                    content,
                });
            }
            loose
        }
        _ => {
            let mut loose = Vec::new();
            for (index, root) in invocation.directories.iter().enumerate() {
                for (identity, path) in walk_root(root)? {
                    loose.push(CompiledUnit {
                        identity,
                        origin: UnitOrigin::Directory(index),
                        state: ChangeKind::Added,
                        content: UnitContent::File(path),
                    });
                }
            }
            loose
        }
    };

    let mut claimed: BTreeSet<String> = BTreeSet::new();
    for mut unit in loose {
        if fingerprints.contains_key(&unit.identity) || !claimed.insert(unit.identity.clone()) {
            tracing::warn!(identity = %unit.identity, "duplicate unit ignored");
            continue;
        }
        // An identity that left the archives but is now a loose file replaces
        // the previous output entry instead of deleting it.
        if let Some(pos) = changes
            .removed
            .iter()
            .position(|u| u.identity == unit.identity)
        {
            changes.removed.remove(pos);
            if unit.state == ChangeKind::Added {
                unit.state = ChangeKind::Modified;
            }
        }
        changes.push(unit);
    }

    // A removed unit can uncover a loose file it used to shadow. The feed
    // does not list that file because the file itself did not change.
    for unit in std::mem::take(&mut changes.removed) {
        match uncovered_file(&invocation.directories, &unit.identity) {
            Some((index, path)) => {
                tracing::debug!(identity = %unit.identity, root = index, "loose file uncovered");
                changes.push(CompiledUnit {
                    identity: unit.identity,
                    origin: UnitOrigin::Directory(index),
                    state: ChangeKind::Modified,
                    content: UnitContent::File(path),
                });
            }
            None => changes.removed.push(unit),
        }
    }

    Ok(Detection {
        changes,
        fingerprints,
    })
}

fn scan_archive(path: &Path) -> Result<Vec<Member>, PipelineError> {
    let archive = ZipArchive::open(path)?;
    let mut members = Vec::with_capacity(archive.entries().len());
    for entry in archive.into_entries() {
        if entry.is_dir() {
            continue;
        }
        let identity = identity_of(Path::new(&entry.name))?;
        let bytes = entry.decompress()?;
        members.push(Member {
            identity,
            hash: Fingerprinter::fingerprint(&bytes),
            bytes,
        });
    }
    tracing::debug!(archive = %path.display(), members = members.len(), "fingerprinted archive");
    Ok(members)
}

fn walk_root(root: &Path) -> Result<Vec<(String, PathBuf)>, PipelineError> {
    if !root.exists() {
        tracing::debug!(root = %root.display(), "directory root does not exist");
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| PipelineError::Walk {
            root: root.to_path_buf(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let identity = identity_of(relative)?;
        files.push((identity, entry.into_path()));
    }
    Ok(files)
}

/// First directory root holding a file at `identity`.
fn uncovered_file(directories: &[PathBuf], identity: &str) -> Option<(usize, PathBuf)> {
    directories.iter().enumerate().find_map(|(index, root)| {
        let path = identity.split('/').fold(root.clone(), |path, part| path.join(part));
        path.is_file().then_some((index, path))
    })
}

/// Maps a relative path to its identity, rejecting paths that could escape
/// the output tree.
fn identity_of(path: &Path) -> Result<String, PipelineError> {
    let raw = path.to_string_lossy();
    let unsafe_path = || PipelineError::UnsafePath {
        path: raw.to_string(),
    };
    if path.is_absolute() || raw.starts_with('/') || raw.starts_with('\\') {
        return Err(unsafe_path());
    }
    normalize_identity(&raw).ok_or_else(unsafe_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::FileChange;
    use tracex_archive::ZipWriter;
    use tracex_config::{ArchiveSettings, TraceConfig};

    fn write_jar(path: &Path, entries: &[(&str, &[u8])]) {
        let mut writer = ZipWriter::new(Vec::new(), path, ArchiveSettings::default());
        for (name, data) in entries {
            writer.add_bytes(name, data).unwrap();
        }
        std::fs::write(path, writer.finish().unwrap()).unwrap();
    }

    fn invocation(dir: &Path, archives: Vec<PathBuf>, directories: Vec<PathBuf>) -> Invocation {
        Invocation {
            archives,
            directories,
            changes: InputChanges::NonIncremental,
            intermediate_dir: dir.join("intermediate"),
            output: dir.join("out.jar"),
            config: TraceConfig::default(),
        }
    }

    fn identities(units: &[CompiledUnit]) -> Vec<&str> {
        units.iter().map(|u| u.identity.as_str()).collect()
    }

    #[test]
    fn first_archive_wins_then_directories() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jar");
        let b = dir.path().join("b.jar");
        write_jar(&a, &[("x/A.class", b"from a"), ("x/", b"")]);
        write_jar(&b, &[("x/A.class", b"from b"), ("x/B.class", b"b")]);
        let classes = dir.path().join("classes");
        std::fs::create_dir_all(classes.join("x")).unwrap();
        std::fs::write(classes.join("x/B.class"), b"loose b").unwrap();
        std::fs::write(classes.join("x/C.class"), b"loose c").unwrap();

        let inv = invocation(dir.path(), vec![a, b], vec![classes.clone()]);
        let cache = Cache::open(&inv.intermediate_dir, "test");
        let detection = detect(&inv, &cache, true).unwrap();

        let added = &detection.changes.added;
        assert_eq!(identities(added), vec!["x/A.class", "x/B.class", "x/C.class"]);
        assert_eq!(added[0].origin, UnitOrigin::Archive(0));
        assert_eq!(added[0].content, UnitContent::Bytes(b"from a".to_vec()));
        assert_eq!(added[1].origin, UnitOrigin::Archive(1));
        assert_eq!(added[2].content, UnitContent::File(classes.join("x/C.class")));
        assert_eq!(detection.fingerprints.len(), 2);
    }

    #[test]
    fn incremental_feed_assigns_states() {
        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join("classes");
        std::fs::create_dir_all(&classes).unwrap();
        let mut inv = invocation(dir.path(), Vec::new(), vec![classes.clone()]);
        inv.changes = InputChanges::Incremental(vec![
            FileChange {
                root: classes.clone(),
                path: PathBuf::from("A.class"),
                kind: ChangeKind::Modified,
            },
            FileChange {
                root: classes.clone(),
                path: classes.join("B.class"),
                kind: ChangeKind::Removed,
            },
        ]);
        let cache = Cache::open(&inv.intermediate_dir, "test");
        let detection = detect(&inv, &cache, false).unwrap();
        assert_eq!(identities(&detection.changes.modified), vec!["A.class"]);
        assert_eq!(identities(&detection.changes.removed), vec!["B.class"]);
        assert_eq!(
            detection.changes.removed[0].origin,
            UnitOrigin::Directory(0)
        );
    }

    #[test]
    fn removed_member_uncovers_shadowed_loose_file() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("app.jar");
        write_jar(&jar, &[("p/X.class", b"jar x"), ("p/Y.class", b"jar y")]);
        let classes = dir.path().join("classes");
        std::fs::create_dir_all(classes.join("p")).unwrap();
        std::fs::write(classes.join("p/X.class"), b"loose x").unwrap();

        let mut inv = invocation(dir.path(), vec![jar.clone()], vec![classes.clone()]);
        let mut cache = Cache::open(&inv.intermediate_dir, "test");
        let first = detect(&inv, &cache, true).unwrap();
        let mut manifest = tracex_cache::FingerprintManifest::new(
            "test",
            ContentHash::from_bytes(b"settings"),
            vec![jar.display().to_string()],
        );
        manifest.members = first.fingerprints;
        cache.commit(manifest).unwrap();

        write_jar(&jar, &[("p/Y.class", b"jar y")]);
        inv.changes = InputChanges::Incremental(Vec::new());
        let detection = detect(&inv, &cache, false).unwrap();
        assert!(detection.changes.removed.is_empty());
        let modified = &detection.changes.modified;
        assert_eq!(identities(modified), vec!["p/X.class"]);
        assert_eq!(modified[0].origin, UnitOrigin::Directory(0));
        assert_eq!(modified[0].content, UnitContent::File(classes.join("p/X.class")));
    }

    #[test]
    fn unknown_feed_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut inv = invocation(dir.path(), Vec::new(), vec![dir.path().join("classes")]);
        inv.changes = InputChanges::Incremental(vec![FileChange {
            root: dir.path().join("elsewhere"),
            path: PathBuf::from("A.class"),
            kind: ChangeKind::Added,
        }]);
        let cache = Cache::open(&inv.intermediate_dir, "test");
        assert!(matches!(
            detect(&inv, &cache, false),
            Err(PipelineError::UnknownRoot { .. })
        ));
    }

    #[test]
    fn escaping_member_name_is_unsafe() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("evil.jar");
        write_jar(&jar, &[("../../evil.class", b"x")]);
        let inv = invocation(dir.path(), vec![jar], Vec::new());
        let cache = Cache::open(&inv.intermediate_dir, "test");
        assert!(matches!(
            detect(&inv, &cache, true),
            Err(PipelineError::UnsafePath { .. })
        ));
    }

    #[test]
    fn absolute_member_name_is_unsafe() {
        assert!(identity_of(Path::new("/etc/passwd")).is_err());
        assert_eq!(
            identity_of(Path::new("com/app/./Foo.class")).unwrap(),
            "com/app/Foo.class"
        );
    }

    #[test]
    fn missing_directory_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let inv = invocation(dir.path(), Vec::new(), vec![dir.path().join("absent")]);
        let cache = Cache::open(&inv.intermediate_dir, "test");
        let detection = detect(&inv, &cache, true).unwrap();
        assert!(detection.changes.is_empty());
    }
}
