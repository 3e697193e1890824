//! Fingerprint comparison for archive members.

use std::collections::BTreeMap;

use tracex_common::ContentHash;

/// Result of comparing current member fingerprints against the manifest.
///
/// Each list is sorted by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberChanges {
    /// Members not present in the manifest.
    pub added: Vec<String>,
    /// Members whose content hash differs from the manifest.
    pub modified: Vec<String>,
    /// Members present in the manifest but not in the current archives.
    pub removed: Vec<String>,
    /// Members whose content hash matches the manifest.
    pub unchanged: Vec<String>,
}

impl MemberChanges {
    /// Returns `true` if there are no added, modified, or removed members.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Returns the number of members that need reprocessing.
    pub fn dirty_count(&self) -> usize {
        self.added.len() + self.modified.len()
    }
}

/// Computes and compares member fingerprints.
pub struct Fingerprinter;

impl Fingerprinter {
    /// Fingerprint of one member's uncompressed bytes.
    pub fn fingerprint(data: &[u8]) -> ContentHash {
        ContentHash::from_bytes(data)
    }

    /// Diffs current fingerprints against the previous run's.
    pub fn detect_changes(
        current: &BTreeMap<String, ContentHash>,
        previous: &BTreeMap<String, ContentHash>,
    ) -> MemberChanges {
        let mut changes = MemberChanges::default();
        for (identity, hash) in current {
            match previous.get(identity) {
                Some(old) if old == hash => changes.unchanged.push(identity.clone()),
                Some(_) => changes.modified.push(identity.clone()),
                None => changes.added.push(identity.clone()),
            }
        }
        changes.removed = previous
            .keys()
            .filter(|identity| !current.contains_key(*identity))
            .cloned()
            .collect();
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &[u8])]) -> BTreeMap<String, ContentHash> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Fingerprinter::fingerprint(v)))
            .collect()
    }

    #[test]
    fn everything_added_against_empty_manifest() {
        let current = map(&[("a.class", b"a"), ("b.class", b"b")]);
        let changes = Fingerprinter::detect_changes(&current, &BTreeMap::new());
        assert_eq!(changes.added, vec!["a.class", "b.class"]);
        assert_eq!(changes.dirty_count(), 2);
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn modified_removed_unchanged() {
        let previous = map(&[("m.class", b"old"), ("r.class", b"gone"), ("u.class", b"same")]);
        let current = map(&[("m.class", b"new"), ("u.class", b"same")]);
        let changes = Fingerprinter::detect_changes(&current, &previous);
        assert!(changes.added.is_empty());
        assert_eq!(changes.modified, vec!["m.class"]);
        assert_eq!(changes.removed, vec!["r.class"]);
        assert_eq!(changes.unchanged, vec!["u.class"]);
        assert!(!changes.is_empty());
    }

    #[test]
    fn identical_maps_are_empty() {
        let current = map(&[("a.class", b"a")]);
        let changes = Fingerprinter::detect_changes(&current, &current.clone());
        assert!(changes.is_empty());
        assert_eq!(changes.unchanged.len(), 1);
    }
}
