//! JVM class file model and trace marker injection.
//!
//! Parses class files into an explicit model ([`ClassFile`], [`CodeAttribute`],
//! label-based [`Instruction`] streams and expanded stack map [`Frame`]s) and
//! rewrites selected methods so that every invocation calls a begin hook on
//! entry and an end hook on every exit, normal or exceptional.
//!
//! [`rewrite_unit`] is the entry point used by the pipeline: it decides
//! whether a compiled unit is a class at all, and returns the input bytes
//! untouched whenever nothing was instrumented.

#![warn(missing_docs)]

mod bytes;
pub mod class;
pub mod code;
pub mod constant_pool;
pub mod descriptor;
pub mod error;
pub mod frames;
pub mod instrument;
mod opcodes;
pub mod stack;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use class::{Attribute, ClassFile, Member};
pub use code::{CodeAttribute, Instruction, Label};
pub use error::ClassFileError;
pub use frames::{Frame, VerificationType};
pub use instrument::{instrument, trace_tag, Instrumented};

use tracex_config::TraceHooks;
use tracex_filter::TagFilter;

/// Output of [`rewrite_unit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    /// Unit bytes to publish.
    pub bytes: Vec<u8>,
    /// Tags of the methods that received trace markers.
    pub instrumented: Vec<String>,
}

/// Returns `true` if the unit at `identity` is a class the rewriter should
/// parse.
///
/// Files without a `.class` extension, module descriptors and anything under
/// `META-INF/` (including multi-release and signature entries) are passed
/// through as resources.
pub fn is_class_unit(identity: &str) -> bool {
    let lower = identity.to_ascii_lowercase();
    let lower = lower.trim_start_matches('/');
    lower.ends_with(".class")
        && lower != "module-info.class"
        && !lower.ends_with("/module-info.class")
        && !lower.starts_with("meta-inf/")
}

/// Rewrites one compiled unit.
///
/// Non-class units, and every unit when `filter` is disabled, are returned
/// unchanged without being parsed. A class in which no method was selected
/// is returned byte-identical. Parse and rewrite failures are errors; the
/// unit is never silently passed through.
pub fn rewrite_unit(
    identity: &str,
    bytes: Vec<u8>,
    filter: &TagFilter,
    hooks: &TraceHooks,
) -> Result<Rewritten, ClassFileError> {
    if !filter.is_enabled() || !is_class_unit(identity) {
        return Ok(Rewritten {
            bytes,
            instrumented: Vec::new(),
        });
    }
    let class = ClassFile::parse(&bytes)?;
    match instrument(&class, filter, hooks)? {
        Some(result) => Ok(Rewritten {
            bytes: result.class.to_bytes(),
            instrumented: result.methods,
        }),
        None => Ok(Rewritten {
            bytes,
            instrumented: Vec::new(),
        }),
    }
}
