//! Policy engine for curfew
//!
//! This crate is the heart of curfewd, containing:
//! - Usage accounting with lazy midnight reset
//! - The policy store, with strict-mode guarded mutations
//! - The evaluator that turns policies into a decision snapshot
//! - The hot-path gate answering foreground changes from that snapshot
//! - The recompute actor that keeps the snapshot fresh

mod cache;
mod emergency;
mod engine;
mod evaluator;
mod events;
mod gate;
mod group_index;
mod policy_store;
mod scheduler;
mod strict;
mod usage;

pub use cache::*;
pub use emergency::*;
pub use engine::*;
pub use evaluator::*;
pub use events::*;
pub use gate::*;
pub use group_index::*;
pub use policy_store::*;
pub use scheduler::*;
pub use strict::*;
pub use usage::*;
