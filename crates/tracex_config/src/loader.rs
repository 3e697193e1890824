//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::{CompressionMode, TraceConfig};
use std::path::Path;

/// File name looked up by [`load_config`].
pub const CONFIG_FILE: &str = "tracex.toml";

/// Loads and validates a `tracex.toml` configuration from a directory.
///
/// Reads `<dir>/tracex.toml`, parses it, and validates it.
pub fn load_config(dir: &Path) -> Result<TraceConfig, ConfigError> {
    let content = std::fs::read_to_string(dir.join(CONFIG_FILE))?;
    load_config_from_str(&content)
}

/// Parses and validates a `tracex.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<TraceConfig, ConfigError> {
    let config: TraceConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates hook names, archive settings, and rule patterns.
pub fn validate_config(config: &TraceConfig) -> Result<(), ConfigError> {
    let hooks = &config.hooks;
    for (field, value) in [
        ("hooks.owner", &hooks.owner),
        ("hooks.begin", &hooks.begin),
        ("hooks.end", &hooks.end),
    ] {
        if value.is_empty() {
            return Err(ConfigError::ValidationError(format!("{field} is empty")));
        }
    }
    if hooks.owner.contains('.') {
        return Err(ConfigError::ValidationError(format!(
            "hooks.owner must use '/' separators, got '{}'",
            hooks.owner
        )));
    }
    if config.archive.compression == CompressionMode::Deflate && config.archive.level > 9 {
        return Err(ConfigError::ValidationError(format!(
            "archive.level must be 0-9, got {}",
            config.archive.level
        )));
    }
    // Compile even when disabled so typos surface before they matter.
    tracex_filter::TagFilter::new(&config.trace.include, &config.trace.exclude)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let config = load_config_from_str("").unwrap();
        assert!(config.trace.enabled);
        assert_eq!(config.hooks.owner, "android/os/Trace");
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[trace]
enabled = true
include = ["com\\.app\\..*"]
exclude = ["com\\.app\\.gen\\..*", ".*#<clinit>"]

[hooks]
owner = "com/example/Tracer"
begin = "push"
end = "pop"

[archive]
compression = "deflate"
level = 9

[executor]
jobs = 4
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.trace.include, vec![r"com\.app\..*"]);
        assert_eq!(config.trace.exclude.len(), 2);
        assert_eq!(config.hooks.owner, "com/example/Tracer");
        assert_eq!(config.hooks.begin, "push");
        assert_eq!(config.hooks.end, "pop");
        assert_eq!(config.archive.compression, CompressionMode::Deflate);
        assert_eq!(config.archive.level, 9);
        assert_eq!(config.executor.jobs, 4);

        let filter = config.filter().unwrap();
        assert!(filter.matches("com.app.Foo#bar"));
        assert!(!filter.matches("com.app.gen.R#x"));
        assert!(!filter.matches("com.app.Foo#<clinit>"));
    }

    #[test]
    fn disabled_section() {
        let config = load_config_from_str("[trace]\nenabled = false\n").unwrap();
        assert!(!config.trace.enabled);
        assert!(!config.filter().unwrap().matches("a#b"));
    }

    #[test]
    fn invalid_pattern_errors() {
        let err = load_config_from_str("[trace]\ninclude = [\"com.(app\"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern(_)));
    }

    #[test]
    fn empty_hook_errors() {
        let err = load_config_from_str("[hooks]\nend = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn dotted_owner_errors() {
        let err = load_config_from_str("[hooks]\nowner = \"android.os.Trace\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn deflate_level_out_of_range_errors() {
        let err = load_config_from_str("[archive]\ncompression = \"deflate\"\nlevel = 12\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn unknown_field_errors() {
        let err = load_config_from_str("[trace]\ninclue = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[executor]\njobs = 2\n").unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.executor.jobs, 2);
    }

    #[test]
    fn io_error_from_nonexistent_dir() {
        let err = load_config(Path::new("/nonexistent/dir")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
