//! Configuration resolution shared by the CLI commands.

use std::path::Path;

use tracex_config::{load_config, load_config_from_str, ConfigError, TraceConfig, CONFIG_FILE};

use crate::GlobalArgs;

/// Loads the trace configuration for this invocation.
///
/// `--config` names a file explicitly. Otherwise `tracex.toml` in the
/// current directory is used when present, and the defaults when not.
pub fn resolve_config(global: &GlobalArgs) -> Result<TraceConfig, ConfigError> {
    match &global.config {
        Some(path) => load_config_file(path),
        None if Path::new(CONFIG_FILE).is_file() => load_config(Path::new(".")),
        None => Ok(TraceConfig::default()),
    }
}

/// Loads a configuration file at an explicit path.
pub fn load_config_file(path: &Path) -> Result<TraceConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Replaces the configured rule lists with those given on the command line.
/// An empty list leaves the configured one in place.
pub fn override_rules(config: &mut TraceConfig, include: &[String], exclude: &[String]) {
    if !include.is_empty() {
        config.trace.include = include.to_vec();
    }
    if !exclude.is_empty() {
        config.trace.exclude = exclude.to_vec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ci.toml");
        std::fs::write(&path, "[trace]\ninclude = [\"com\\\\.app\\\\..*\"]\n").unwrap();
        let config = load_config_file(&path).unwrap();
        assert_eq!(config.trace.include, vec![r"com\.app\..*"]);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_config_file(&dir.path().join("nope.toml")),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn overrides_replace_only_given_lists() {
        let mut config = TraceConfig::default();
        config.trace.exclude = vec!["keep".to_string()];
        override_rules(&mut config, &["a.*".to_string()], &[]);
        assert_eq!(config.trace.include, vec!["a.*"]);
        assert_eq!(config.trace.exclude, vec!["keep"]);
    }
}
