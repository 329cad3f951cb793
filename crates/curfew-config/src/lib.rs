//! Configuration parsing and validation for curfew
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Engine timing (rebuild, usage poll and flush periods)
//! - Static whitelist merged with built-in system packages
//! - Emergency bypass allowance
//!
//! The maintenance window is not part of the configuration.

mod schema;
mod settings;
mod validation;

pub use schema::*;
pub use settings::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Load configuration, falling back to defaults when the file does not exist
pub fn load_config_or_default(path: impl AsRef<Path>) -> ConfigResult<EngineConfig> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file, using defaults");
        return Ok(EngineConfig::default());
    }
    load_config(path)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<EngineConfig> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(EngineConfig::from_raw(raw))
}

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_minimal_config() {
        let config = parse_config("config_version = 1").unwrap();
        assert_eq!(config.engine.rebuild_interval, Duration::from_secs(180));
        assert_eq!(config.engine.self_package.as_str(), DEFAULT_SELF_PACKAGE);
        assert_eq!(config.emergency.daily_uses, 3);
        assert_eq!(config.emergency.session_length, Duration::from_secs(300));
        assert!(config.is_whitelisted("com.android.dialer"));
        assert!(config.is_whitelisted(DEFAULT_SELF_PACKAGE));
    }

    #[test]
    fn parse_full_config() {
        let config = parse_config(
            r#"
            config_version = 1

            [engine]
            self_package = "org.example.blocker"
            rebuild_interval_seconds = 60
            usage_poll_seconds = 2
            usage_flush_seconds = 30
            data_dir = "/tmp/curfew-test"

            [whitelist]
            packages = ["com.bank.app"]
            replace_builtin = true

            [emergency]
            daily_uses = 5
            session_minutes = 10
        "#,
        )
        .unwrap();

        assert_eq!(config.engine.rebuild_interval, Duration::from_secs(60));
        assert_eq!(config.engine.usage_poll, Duration::from_secs(2));
        assert_eq!(config.engine.data_dir, std::path::PathBuf::from("/tmp/curfew-test"));
        assert_eq!(config.whitelist.len(), 2);
        assert!(config.is_whitelisted("com.bank.app"));
        assert!(config.is_whitelisted("org.example.blocker"));
        assert!(!config.is_whitelisted("com.android.dialer"));
        assert_eq!(config.emergency.daily_uses, 5);
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_invalid_values() {
        let result = parse_config(
            r#"
            config_version = 1

            [emergency]
            daily_uses = 11
        "#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::ValidationFailed { ref errors }) if errors.len() == 1
        ));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.engine.usage_flush, Duration::from_secs(60));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "config_version = 1\n[engine]\nrebuild_interval_seconds = 90\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.engine.rebuild_interval, Duration::from_secs(90));
    }
}
