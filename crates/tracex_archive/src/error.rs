//! Error types for archive reading, writing and publishing.

use std::path::PathBuf;

/// Errors produced by the zip codec and the assembler.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// An I/O error occurred while reading or writing an archive.
    #[error("archive I/O error at {path}: {source}")]
    Io {
        /// The archive path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The archive structure is invalid.
    #[error("malformed archive {path}: {reason}")]
    Malformed {
        /// The archive path.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// The archive uses a feature this codec does not handle.
    #[error("unsupported archive feature in {path}: {feature}")]
    Unsupported {
        /// The archive path.
        path: PathBuf,
        /// The feature, e.g. `zip64` or `encryption`.
        feature: String,
    },

    /// An entry's data could not be decompressed or has the wrong size.
    #[error("corrupt entry {entry}: {reason}")]
    CorruptEntry {
        /// The entry name.
        entry: String,
        /// What was wrong.
        reason: String,
    },

    /// An entry's CRC-32 does not match its decompressed bytes.
    #[error("CRC mismatch in entry {entry}: expected {expected:08x}, got {actual:08x}")]
    CrcMismatch {
        /// The entry name.
        entry: String,
        /// CRC recorded in the archive.
        expected: u32,
        /// CRC of the decompressed bytes.
        actual: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_display() {
        let err = ArchiveError::Unsupported {
            path: PathBuf::from("libs/big.jar"),
            feature: "zip64".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("big.jar"));
        assert!(msg.contains("zip64"));
    }

    #[test]
    fn crc_mismatch_display_is_hex() {
        let err = ArchiveError::CrcMismatch {
            entry: "com/app/Foo.class".to_string(),
            expected: 0xDEADBEEF,
            actual: 0x1,
        };
        let msg = err.to_string();
        assert!(msg.contains("deadbeef"));
        assert!(msg.contains("00000001"));
    }
}
