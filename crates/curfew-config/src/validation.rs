//! Configuration validation

use crate::schema::RawConfig;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("[engine] {field} must be greater than zero")]
    ZeroInterval { field: &'static str },

    #[error("[engine] usage_flush_seconds ({flush}s) is shorter than usage_poll_seconds ({poll}s)")]
    FlushShorterThanPoll { flush: u64, poll: u64 },

    #[error("Invalid package name '{value}': {message}")]
    InvalidPackageName { value: String, message: String },

    #[error("Duplicate whitelist package: {0}")]
    DuplicatePackage(String),

    #[error("[emergency] {field} = {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Validate a raw configuration, collecting every problem found
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let engine = &config.engine;
    for (field, value) in [
        ("rebuild_interval_seconds", engine.rebuild_interval_seconds),
        ("usage_poll_seconds", engine.usage_poll_seconds),
        ("usage_flush_seconds", engine.usage_flush_seconds),
    ] {
        if value == Some(0) {
            errors.push(ValidationError::ZeroInterval { field });
        }
    }

    if let (Some(flush), Some(poll)) = (engine.usage_flush_seconds, engine.usage_poll_seconds)
        && flush > 0
        && flush < poll
    {
        errors.push(ValidationError::FlushShorterThanPoll { flush, poll });
    }

    if let Some(name) = &engine.self_package
        && let Err(message) = check_package_name(name)
    {
        errors.push(ValidationError::InvalidPackageName {
            value: name.clone(),
            message,
        });
    }

    let mut seen = HashSet::new();
    for name in &config.whitelist.packages {
        if let Err(message) = check_package_name(name) {
            errors.push(ValidationError::InvalidPackageName {
                value: name.clone(),
                message,
            });
        } else if !seen.insert(name.as_str()) {
            errors.push(ValidationError::DuplicatePackage(name.clone()));
        }
    }

    if let Some(uses) = config.emergency.daily_uses
        && !(1..=10).contains(&uses)
    {
        errors.push(ValidationError::OutOfRange {
            field: "daily_uses",
            value: uses as u64,
            min: 1,
            max: 10,
        });
    }

    if let Some(minutes) = config.emergency.session_minutes
        && !(1..=60).contains(&minutes)
    {
        errors.push(ValidationError::OutOfRange {
            field: "session_minutes",
            value: minutes as u64,
            min: 1,
            max: 60,
        });
    }

    errors
}

/// Check a package name is non-empty and has no whitespace
pub fn check_package_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("cannot be empty".into());
    }
    if name.chars().any(char::is_whitespace) {
        return Err("must not contain whitespace".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{RawEmergency, RawEngineConfig, RawWhitelist};

    fn raw() -> RawConfig {
        RawConfig {
            config_version: 1,
            engine: RawEngineConfig::default(),
            whitelist: RawWhitelist::default(),
            emergency: RawEmergency::default(),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&raw()).is_empty());
    }

    #[test]
    fn test_check_package_name() {
        assert!(check_package_name("com.example.app").is_ok());
        assert!(check_package_name("").is_err());
        assert!(check_package_name("com.example app").is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = raw();
        config.engine.rebuild_interval_seconds = Some(0);
        let errors = validate_config(&config);
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::ZeroInterval { field: "rebuild_interval_seconds" }]
        ));
    }

    #[test]
    fn test_all_errors_collected() {
        let mut config = raw();
        config.engine.usage_poll_seconds = Some(0);
        config.whitelist.packages = vec!["com.a".into(), "com.a".into(), "bad name".into()];
        config.emergency.daily_uses = Some(0);
        config.emergency.session_minutes = Some(61);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 5);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::DuplicatePackage(p) if p == "com.a")));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::OutOfRange { field: "session_minutes", .. })));
    }

    #[test]
    fn test_flush_must_not_undercut_poll() {
        let mut config = raw();
        config.engine.usage_poll_seconds = Some(30);
        config.engine.usage_flush_seconds = Some(10);
        let errors = validate_config(&config);
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::FlushShorterThanPoll { flush: 10, poll: 30 }]
        ));
    }
}
