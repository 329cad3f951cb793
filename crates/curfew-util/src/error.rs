//! Error types for curfew

use thiserror::Error;

use crate::PackageName;

/// Core error type for curfew operations
#[derive(Debug, Error)]
pub enum CurfewError {
    #[error("Unknown package: {0}")]
    UnknownPackage(PackageName),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Mutation locked by strict mode: {0}")]
    Locked(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CurfewError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreError(msg.into())
    }

    pub fn locked(msg: impl Into<String>) -> Self {
        Self::Locked(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type CurfewResult<T> = std::result::Result<T, CurfewError>;
