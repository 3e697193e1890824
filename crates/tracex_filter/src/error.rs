//! Error types for filter construction.

/// Errors that can occur while compiling a rule set.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// A pattern is not a valid regular expression.
    #[error("invalid trace pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern as written by the user.
        pattern: String,
        /// The regex compiler's message.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pattern_display() {
        let err = FilterError::InvalidPattern {
            pattern: "com.(app".to_string(),
            reason: "unclosed group".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("com.(app"));
        assert!(msg.contains("unclosed group"));
    }
}
