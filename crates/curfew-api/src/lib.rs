//! Data model and protocol types for curfew
//!
//! This crate defines the types shared between the engine, the store and
//! the host bridge:
//! - Policy entities (focus, bedtime, schedules, calendar, limits, strict mode)
//! - Block decisions and reasons
//! - Host events (foreground changes, usage ticks) and replies

mod decision;
mod events;
mod strict;
mod types;

pub use decision::*;
pub use events::*;
pub use strict::*;
pub use types::*;

/// Current host protocol version
pub const API_VERSION: u32 = 1;
