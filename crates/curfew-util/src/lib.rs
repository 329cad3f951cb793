//! Shared utilities for curfew
//!
//! This crate provides:
//! - ID types (PackageName, GroupId, SessionId)
//! - Wall-clock access with mock time support in debug builds
//! - Time-of-day window arithmetic shared by every policy type
//! - Error types
//! - Default paths for config and data directories

mod error;
mod ids;
mod paths;
mod time;
mod window;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
pub use window::*;
