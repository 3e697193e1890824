//! Output archive assembly.
//!
//! The assembler holds the entries of the next output archive keyed by
//! name. Entries carried over from the previous output keep their original
//! compressed record; fresh units are compressed with the run's settings
//! when written. Entries are always written sorted by name, so the output
//! depends only on the entry set, never on insertion order.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracex_config::ArchiveSettings;

use crate::error::ArchiveError;
use crate::zip::{RawEntry, ZipArchive, ZipWriter};

enum Pending {
    Carried(RawEntry),
    Fresh(Vec<u8>),
}

/// Builds the merged output archive.
pub struct Assembler {
    entries: BTreeMap<String, Pending>,
    settings: ArchiveSettings,
}

impl Assembler {
    /// Starts from an empty entry set (full rebuild).
    pub fn new(settings: ArchiveSettings) -> Self {
        Self {
            entries: BTreeMap::new(),
            settings,
        }
    }

    /// Starts from the entries of the previous output archive.
    ///
    /// Directory entries are dropped. If a name repeats, the first record
    /// wins.
    pub fn from_previous(previous: ZipArchive, settings: ArchiveSettings) -> Self {
        let mut entries = BTreeMap::new();
        for entry in previous.into_entries() {
            if entry.is_dir() {
                continue;
            }
            entries
                .entry(entry.name.clone())
                .or_insert(Pending::Carried(entry));
        }
        Self { entries, settings }
    }

    /// Number of entries the archive will contain.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the archive will be empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if an entry with this name is pending.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Drops an entry. Returns `true` if it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Adds or replaces an entry with fresh bytes.
    pub fn insert(&mut self, name: String, bytes: Vec<u8>) {
        self.entries.insert(name, Pending::Fresh(bytes));
    }

    /// Writes the archive to `out`. `path` is used in error messages only.
    pub fn write_to<W: Write>(self, out: W, path: &Path) -> Result<W, ArchiveError> {
        let mut writer = ZipWriter::new(out, path, self.settings);
        for (name, pending) in &self.entries {
            match pending {
                Pending::Carried(raw) => writer.add_raw(raw)?,
                Pending::Fresh(bytes) => writer.add_bytes(name, bytes)?,
            }
        }
        writer.finish()
    }

    /// Writes the archive next to `path` and renames it into place.
    ///
    /// On failure the temporary file is removed and any existing archive at
    /// `path` is left untouched. Returns the number of entries written.
    pub fn publish(self, path: &Path) -> Result<usize, ArchiveError> {
        let count = self.entries.len();
        let tmp = temp_path(path);
        if let Some(parent) = tmp.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ArchiveError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        if let Err(e) = self.write_file(&tmp) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            ArchiveError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        })?;

        tracing::debug!(path = %path.display(), entries = count, "published output archive");
        Ok(count)
    }

    fn write_file(self, tmp: &Path) -> Result<(), ArchiveError> {
        let io_error = |e: std::io::Error| ArchiveError::Io {
            path: tmp.to_path_buf(),
            source: e,
        };
        let file = File::create(tmp).map_err(io_error)?;
        let writer = self.write_to(BufWriter::new(file), tmp)?;
        let file = writer.into_inner().map_err(|e| io_error(e.into_error()))?;
        file.sync_all().map_err(io_error)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracex_config::CompressionMode;

    fn deflate() -> ArchiveSettings {
        ArchiveSettings {
            compression: CompressionMode::Deflate,
            level: 6,
        }
    }

    fn build(assembler: Assembler) -> Vec<u8> {
        assembler.write_to(Vec::new(), Path::new("out.jar")).unwrap()
    }

    fn names(bytes: &[u8]) -> Vec<String> {
        ZipArchive::from_bytes(Path::new("out.jar"), bytes)
            .unwrap()
            .entries()
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    #[test]
    fn entries_sorted_regardless_of_insertion_order() {
        let mut a = Assembler::new(deflate());
        a.insert("z/Z.class".into(), b"z".to_vec());
        a.insert("a/A.class".into(), b"a".to_vec());
        let mut b = Assembler::new(deflate());
        b.insert("a/A.class".into(), b"a".to_vec());
        b.insert("z/Z.class".into(), b"z".to_vec());

        let first = build(a);
        assert_eq!(first, build(b));
        assert_eq!(names(&first), vec!["a/A.class", "z/Z.class"]);
    }

    #[test]
    fn merge_with_previous_output() {
        let mut initial = Assembler::new(deflate());
        initial.insert("keep.class".into(), b"keep".repeat(50));
        initial.insert("modify.class".into(), b"old".to_vec());
        initial.insert("remove.class".into(), b"gone".to_vec());
        let previous_bytes = build(initial);
        let previous = ZipArchive::from_bytes(Path::new("prev.jar"), &previous_bytes).unwrap();
        let kept_record = previous.entries()[0].clone();

        let mut next = Assembler::from_previous(previous, deflate());
        assert!(next.remove("modify.class"));
        assert!(next.remove("remove.class"));
        assert!(!next.remove("never-there.class"));
        next.insert("modify.class".into(), b"new".to_vec());
        next.insert("added.class".into(), b"added".to_vec());
        assert_eq!(next.len(), 3);

        let out = ZipArchive::from_bytes(Path::new("out.jar"), &build(next)).unwrap();
        let entries = out.entries();
        assert_eq!(
            entries.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["added.class", "keep.class", "modify.class"]
        );
        assert_eq!(entries[1], kept_record);
        assert_eq!(entries[2].decompress().unwrap(), b"new");
    }

    #[test]
    fn previous_directories_dropped() {
        let mut writer = ZipWriter::new(Vec::new(), Path::new("p.jar"), deflate());
        writer.add_bytes("com/", b"").unwrap();
        writer.add_bytes("com/A.class", b"a").unwrap();
        let bytes = writer.finish().unwrap();
        let previous = ZipArchive::from_bytes(Path::new("p.jar"), &bytes).unwrap();
        let assembler = Assembler::from_previous(previous, deflate());
        assert_eq!(assembler.len(), 1);
        assert!(assembler.contains("com/A.class"));
    }

    #[test]
    fn publish_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("app.jar");

        let mut a = Assembler::new(deflate());
        a.insert("A.class".into(), b"a".to_vec());
        assert_eq!(a.publish(&path).unwrap(), 1);
        assert!(!dir.path().join("out").join(".app.jar.tmp").exists());

        let archive = ZipArchive::open(&path).unwrap();
        assert_eq!(archive.entries()[0].decompress().unwrap(), b"a");
    }

    #[test]
    fn failed_publish_leaves_existing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.jar");
        std::fs::write(&path, b"previous").unwrap();
        // A directory where the temporary file should go makes creation fail.
        std::fs::create_dir(dir.path().join(".app.jar.tmp")).unwrap();

        let mut a = Assembler::new(deflate());
        a.insert("A.class".into(), b"a".to_vec());
        assert!(a.publish(&path).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"previous");
    }
}
