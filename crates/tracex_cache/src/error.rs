//! Error types for the fingerprint manifest and the unit store.

use std::path::PathBuf;

/// Errors raised by [`Cache`](crate::Cache), its manifest and its unit store.
///
/// Only [`CacheError::ManifestParse`] is recoverable: the pipeline treats an
/// unreadable manifest as "no previous run" and rebuilds everything. The
/// unit store holds bytes written by the current run, so a stored unit that
/// fails to read back fails the run.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading, writing or deleting a file under the intermediate directory
    /// failed.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// `fingerprints.json` exists but is not a manifest this build can read.
    #[error("unreadable fingerprint manifest {path}: {reason}")]
    ManifestParse {
        /// The manifest file.
        path: PathBuf,
        /// What the JSON decoder reported.
        reason: String,
    },

    /// The manifest or a unit header could not be encoded.
    #[error("failed to encode {what}: {reason}")]
    Encode {
        /// `"fingerprint manifest"` or `"unit header"`.
        what: &'static str,
        /// What the encoder reported.
        reason: String,
    },

    /// A stored unit is truncated, foreign, or its payload no longer matches
    /// the checksum in its header.
    #[error("stored unit {identity} is corrupt: {reason}")]
    CorruptUnit {
        /// Identity of the unit.
        identity: String,
        /// What failed to validate.
        reason: String,
    },

    /// A stored unit was written with a different unit format.
    #[error("stored unit {identity} has format version {found}, expected {expected}")]
    StaleUnit {
        /// Identity of the unit.
        identity: String,
        /// Format version this build writes.
        expected: u32,
        /// Format version found in the header.
        found: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_parse_names_the_file() {
        let err = CacheError::ManifestParse {
            path: PathBuf::from("build/tracex/fingerprints.json"),
            reason: "EOF while parsing an object".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("fingerprints.json"));
        assert!(msg.contains("EOF while parsing"));
    }

    #[test]
    fn corrupt_unit_names_the_identity() {
        let err = CacheError::CorruptUnit {
            identity: "com/app/Foo.class".to_string(),
            reason: "payload checksum mismatch".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "stored unit com/app/Foo.class is corrupt: payload checksum mismatch"
        );
    }

    #[test]
    fn stale_unit_display() {
        let err = CacheError::StaleUnit {
            identity: "A.class".to_string(),
            expected: 2,
            found: 1,
        };
        assert_eq!(
            err.to_string(),
            "stored unit A.class has format version 1, expected 2"
        );
    }
}
