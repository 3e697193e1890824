//! Shared foundational types used across the tracex instrumentation pipeline.
//!
//! This crate provides content fingerprints, the compiled-unit data model,
//! and the change set that partitions units by their incremental state.

#![warn(missing_docs)]

pub mod hash;
pub mod unit;

pub use hash::{ContentHash, ParseHashError};
pub use unit::{
    normalize_identity, ChangeCounts, ChangeKind, ChangeSet, CompiledUnit, UnitContent,
    UnitOrigin,
};
