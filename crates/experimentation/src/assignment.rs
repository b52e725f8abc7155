//! Deterministic subject → variant assignment.
//!
//! The bucket is `stable_hash(subject_id + experiment_id) % 100`, so the same
//! subject lands in the same variant for the life of the experiment, across
//! calls and process restarts, as long as the variant list is unchanged.

use engage_core::stats::stable_hash;
use engage_core::types::{Experiment, ExperimentStatus, Variant};

/// Bucket in `0..100` for a subject in an experiment.
pub fn bucket(experiment: &Experiment, subject_id: &str) -> u64 {
    let key = format!("{subject_id}{}", experiment.id);
    stable_hash(&key) % 100
}

/// Variant for a subject, or None unless the experiment is running.
pub fn assign_variant<'a>(experiment: &'a Experiment, subject_id: &str) -> Option<&'a Variant> {
    if experiment.status != ExperimentStatus::Running {
        return None;
    }
    let hash = bucket(experiment, subject_id) as f64;

    let mut cumulative = 0.0;
    for variant in &experiment.variants {
        cumulative += variant.weight;
        if cumulative > hash {
            return Some(variant);
        }
    }
    // Rounding can leave the walk short of the last bucket.
    experiment.variants.first()
}
