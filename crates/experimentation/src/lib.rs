//! Experiment management: lifecycle, deterministic assignment, outcome
//! ingestion and Bayesian/frequentist analysis of A/B/n experiments.

#![warn(clippy::unwrap_used)]

pub mod analysis;
pub mod assignment;
pub mod manager;
pub mod store;
pub mod validation;

pub use analysis::{AnalysisPolicy, VariantTally};
pub use manager::ExperimentManager;
pub use store::MemoryExperimentStore;
