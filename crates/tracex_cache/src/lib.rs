//! Incremental state for the instrumentation pipeline.
//!
//! The intermediate directory holds a fingerprint manifest recording the
//! content hash of every archive member seen by the last successful run,
//! plus a store of transformed unit bytes. Both are read once at the start
//! of a run and written once at the end.

#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod hasher;
pub mod manifest;
pub mod store;

pub use cache::{Cache, Invalidation};
pub use error::CacheError;
pub use hasher::{Fingerprinter, MemberChanges};
pub use manifest::FingerprintManifest;
pub use store::UnitStore;
