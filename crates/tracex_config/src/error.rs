//! Error types for configuration loading and validation.

use tracex_filter::FilterError;

/// Errors that can occur when loading or validating a `tracex.toml` configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// An include or exclude pattern failed to compile.
    #[error("invalid trace rule: {0}")]
    InvalidPattern(#[from] FilterError),

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}
