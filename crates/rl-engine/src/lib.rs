//! Contextual bandit for content-optimization strategy selection: feature
//! extraction, per-arm online linear models with Thompson-style exploration,
//! and the built-in strategy arms.

#![warn(clippy::unwrap_used)]

pub mod arms;
pub mod contextual;
pub mod features;
pub mod store;

pub use contextual::{ArmStats, ContextualBandit};
pub use features::extract_features;
pub use store::MemoryBanditStore;
