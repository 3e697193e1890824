//! Archive reading and writing for the instrumentation pipeline.
//!
//! [`zip`] is a small zip codec covering what compiled-unit archives use:
//! stored and deflated entries, data descriptors, CRC verification, and
//! byte-reproducible output. [`assembler`] merges fresh units with the
//! previous output and publishes the result atomically.

#![warn(missing_docs)]

pub mod assembler;
pub mod error;
pub mod zip;

pub use assembler::Assembler;
pub use error::ArchiveError;
pub use zip::{RawEntry, ZipArchive, ZipWriter};
