//! Persistence layer for curfew
//!
//! Provides:
//! - Keyed policy entities (each loadable and savable on its own)
//! - Usage totals (per package/day), read by the nightly protocol
//! - Audit log (append-only)
//!
//! Limit rules cross this boundary with their active periods in the
//! stored string form; decoding never fails (see [`decode_periods`]).

mod audit;
mod entity;
mod periods;
mod sqlite;
mod traits;

pub use audit::*;
pub use entity::*;
pub use periods::*;
pub use sqlite::*;
pub use traits::*;

use curfew_util::CurfewError;
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for CurfewError {
    fn from(e: StoreError) -> Self {
        CurfewError::store(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
