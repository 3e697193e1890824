//! Store of transformed unit bytes.
//!
//! Every unit written by a run lands at `<intermediate>/units/<identity>`
//! with a binary header carrying magic bytes, a format version, the tool
//! version and a checksum of the payload. The assembler reads units back
//! through [`UnitStore::read`], which rejects anything that fails validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracex_common::ContentHash;

use crate::error::CacheError;

/// Subdirectory of the intermediate directory holding transformed units.
pub const UNITS_DIR: &str = "units";

/// Magic bytes identifying a stored unit.
const UNIT_MAGIC: [u8; 4] = *b"TRCX";

/// Current unit format version. Increment on breaking changes to the
/// header layout.
const UNIT_FORMAT_VERSION: u32 = 1;

/// Header prepended to every stored unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitHeader {
    /// Magic bytes: must be `b"TRCX"`.
    pub magic: [u8; 4],

    /// Unit format version.
    pub format_version: u32,

    /// Tool version that produced this unit.
    pub tracex_version: String,

    /// Content hash of the payload.
    pub checksum: ContentHash,
}

/// Validated on-disk store for transformed units, keyed by identity.
pub struct UnitStore {
    root: PathBuf,
    tracex_version: String,
}

impl UnitStore {
    /// Creates a store under `<intermediate_dir>/units`.
    pub fn new(intermediate_dir: &Path, tracex_version: &str) -> Self {
        Self {
            root: intermediate_dir.join(UNITS_DIR),
            tracex_version: tracex_version.to_string(),
        }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the file path for a unit identity.
    ///
    /// Identities are normalized relative paths, so each `/`-separated
    /// segment becomes one path component below the store root.
    pub fn unit_path(&self, identity: &str) -> PathBuf {
        identity
            .split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    /// Writes a unit, replacing any previous bytes for the identity.
    pub fn write(&self, identity: &str, data: &[u8]) -> Result<(), CacheError> {
        let path = self.unit_path(identity);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let header = UnitHeader {
            magic: UNIT_MAGIC,
            format_version: UNIT_FORMAT_VERSION,
            tracex_version: self.tracex_version.clone(),
            checksum: ContentHash::from_bytes(data),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| CacheError::Encode {
                what: "unit header",
                reason: e.to_string(),
            })?;

        // 4-byte header length (little-endian) + header + payload
        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + data.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(data);

        std::fs::write(&path, &output).map_err(|e| CacheError::Io { path, source: e })
    }

    /// Reads a unit back, validating its header and checksum.
    pub fn read(&self, identity: &str) -> Result<Vec<u8>, CacheError> {
        let path = self.unit_path(identity);
        let raw = std::fs::read(&path).map_err(|e| CacheError::Io {
            path: path.clone(),
            source: e,
        })?;

        let invalid = |reason: &str| CacheError::CorruptUnit {
            identity: identity.to_string(),
            reason: reason.to_string(),
        };

        let len_bytes: [u8; 4] = raw
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| invalid("file shorter than header length"))?;
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let header_end = 4usize
            .checked_add(header_len)
            .filter(|end| *end <= raw.len())
            .ok_or_else(|| invalid("header length exceeds file size"))?;

        let (header, _): (UnitHeader, usize) =
            bincode::serde::decode_from_slice(&raw[4..header_end], bincode::config::standard())
                .map_err(|e| invalid(&e.to_string()))?;

        if header.magic != UNIT_MAGIC {
            return Err(invalid("bad magic bytes"));
        }
        if header.format_version != UNIT_FORMAT_VERSION {
            return Err(CacheError::StaleUnit {
                identity: identity.to_string(),
                expected: UNIT_FORMAT_VERSION,
                found: header.format_version,
            });
        }

        let payload = &raw[header_end..];
        let actual = ContentHash::from_bytes(payload);
        if actual != header.checksum {
            return Err(invalid(&format!(
                "payload hashes to {actual}, header records {}",
                header.checksum
            )));
        }

        Ok(payload.to_vec())
    }

    /// Deletes a unit. Missing units are not an error.
    pub fn remove(&self, identity: &str) -> Result<(), CacheError> {
        let path = self.unit_path(identity);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io { path, source: e }),
        }
    }

    /// Deletes every stored unit.
    pub fn clear(&self) -> Result<(), CacheError> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io {
                path: self.root.clone(),
                source: e,
            }),
        }
    }
}
