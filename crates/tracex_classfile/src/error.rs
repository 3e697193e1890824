//! Error types for class file parsing and rewriting.

/// Errors raised while parsing or rewriting a class file.
///
/// Any of these fails the unit, and with it the whole invocation: a unit
/// is never silently passed through once it has been selected for parsing.
#[derive(Debug, thiserror::Error)]
pub enum ClassFileError {
    /// The data ended before a complete structure was read.
    #[error("unexpected end of class data at offset {offset}")]
    Truncated {
        /// Byte offset where more data was expected.
        offset: usize,
    },

    /// The file does not start with `0xCAFEBABE`.
    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    /// A constant pool entry has an unknown tag.
    #[error("unknown constant pool tag {tag} at index {index}")]
    BadConstantTag {
        /// The tag byte.
        tag: u8,
        /// The constant pool slot.
        index: u16,
    },

    /// A constant pool reference points at the wrong kind of entry.
    #[error("constant pool index {index} is not a {expected}")]
    BadConstantIndex {
        /// The referenced slot.
        index: u16,
        /// What the reference should have pointed at.
        expected: &'static str,
    },

    /// A descriptor string is not well formed.
    #[error("malformed descriptor '{0}'")]
    BadDescriptor(String),

    /// A `Code` attribute is inconsistent.
    #[error("malformed code in method '{method}': {reason}")]
    MalformedCode {
        /// Method name, when known.
        method: String,
        /// What is wrong.
        reason: String,
    },

    /// Injected instructions pushed a method past a format limit.
    #[error("method '{method}' exceeds code limits after instrumentation: {reason}")]
    CodeTooLarge {
        /// Method name, when known.
        method: String,
        /// Which limit was exceeded.
        reason: String,
    },

    /// No room left in the constant pool for the trace hook references.
    #[error("constant pool overflow: more than 65535 entries")]
    ConstantPoolOverflow,

    /// Bytes remain after the last class attribute.
    #[error("{0} trailing bytes after end of class file")]
    TrailingBytes(usize),
}

impl ClassFileError {
    pub(crate) fn code(reason: impl Into<String>) -> Self {
        Self::MalformedCode {
            method: String::new(),
            reason: reason.into(),
        }
    }

    pub(crate) fn too_large(reason: impl Into<String>) -> Self {
        Self::CodeTooLarge {
            method: String::new(),
            reason: reason.into(),
        }
    }

    /// Attaches the method name to code-level errors.
    pub(crate) fn in_method(self, name: &str) -> Self {
        match self {
            Self::MalformedCode { reason, .. } => Self::MalformedCode {
                method: name.to_string(),
                reason,
            },
            Self::CodeTooLarge { reason, .. } => Self::CodeTooLarge {
                method: name.to_string(),
                reason,
            },
            other => other,
        }
    }
}
