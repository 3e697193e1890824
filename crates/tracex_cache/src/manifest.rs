//! Fingerprint manifest of the last successful run.
//!
//! Stored as `fingerprints.json` in the intermediate directory. Besides the
//! per-member content hashes it records everything that makes those hashes
//! meaningful: the tool version, the settings fingerprint, and the ordered
//! list of input archives.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracex_common::ContentHash;

use crate::error::CacheError;

/// Name of the manifest file within the intermediate directory.
pub const MANIFEST_FILE: &str = "fingerprints.json";

/// Archive member fingerprints from the last successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintManifest {
    /// Tool version that wrote this manifest.
    pub tracex_version: String,
    /// Digest of the rules, hooks and archive settings in effect.
    pub settings: ContentHash,
    /// Input archives, in input order.
    pub archives: Vec<String>,
    /// Identity to content hash for every archive member.
    pub members: BTreeMap<String, ContentHash>,
}

impl FingerprintManifest {
    /// Creates an empty manifest.
    pub fn new(tracex_version: &str, settings: ContentHash, archives: Vec<String>) -> Self {
        Self {
            tracex_version: tracex_version.to_string(),
            settings,
            archives,
            members: BTreeMap::new(),
        }
    }

    /// Loads the manifest from `dir`.
    ///
    /// Returns `Ok(None)` when no manifest exists and
    /// [`CacheError::ManifestParse`] when one exists but cannot be read back.
    pub fn load(dir: &Path) -> Result<Option<Self>, CacheError> {
        let path = dir.join(MANIFEST_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io { path, source: e }),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| CacheError::ManifestParse {
                path,
                reason: e.to_string(),
            })
    }

    /// Saves the manifest to `dir`, creating the directory if needed.
    ///
    /// The file is written next to its final name and renamed into place, so
    /// an interrupted save leaves the previous manifest intact.
    pub fn save(&self, dir: &Path) -> Result<(), CacheError> {
        std::fs::create_dir_all(dir).map_err(|e| CacheError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let json = serde_json::to_string_pretty(self).map_err(|e| CacheError::Encode {
            what: "fingerprint manifest",
            reason: e.to_string(),
        })?;
        let path = dir.join(MANIFEST_FILE);
        let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
        std::fs::write(&tmp, json).map_err(|e| CacheError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| CacheError::Io { path, source: e })
    }

    /// Removes the manifest from `dir`, if present.
    pub fn remove(dir: &Path) -> Result<(), CacheError> {
        let path = dir.join(MANIFEST_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io { path, source: e }),
        }
    }
}
