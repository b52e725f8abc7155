//! Persistence seams for the engine.
//!
//! The engine never assumes a storage technology. Experiment definitions,
//! outcomes and analysis snapshots go through [`ExperimentStore`]; bandit arms,
//! weights and the reward audit log go through [`BanditStore`]. Every write
//! carries a [`Durability`] so adapters know whether the caller needs the
//! write acknowledged, and callers settle the result with
//! [`Durability::settle`].

use crate::error::{EngineError, EngineResult};
use crate::types::{
    ArmModel, BanditArm, Experiment, ExperimentAnalysis, ExperimentFilter, OutcomeRecord,
    RewardRecord,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// How much the caller depends on a write landing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Failure is logged and swallowed.
    BestEffort,
    /// Failure propagates to the caller.
    Required,
}

impl Durability {
    /// Apply this policy to the result of a store write.
    ///
    /// Returns `Ok(true)` when the write landed, `Ok(false)` when a
    /// best-effort write failed, and the error for a failed required write.
    pub fn settle(self, operation: &str, result: EngineResult<()>) -> EngineResult<bool> {
        match (self, result) {
            (_, Ok(())) => Ok(true),
            (Durability::BestEffort, Err(e)) => {
                warn!(operation = operation, error = %e, "Best-effort write failed");
                metrics::counter!("store.best_effort_failures").increment(1);
                Ok(false)
            }
            (Durability::Required, Err(e)) => Err(e),
        }
    }
}

/// Experiment definitions, outcome records and analysis snapshots.
pub trait ExperimentStore: Send + Sync {
    fn insert(&self, experiment: &Experiment, durability: Durability) -> EngineResult<()>;

    fn update(&self, id: Uuid, experiment: &Experiment, durability: Durability) -> EngineResult<()>;

    fn get_by_id(&self, id: Uuid) -> EngineResult<Option<Experiment>>;

    fn list(&self, filter: &ExperimentFilter) -> EngineResult<Vec<Experiment>>;

    fn insert_outcome(&self, record: &OutcomeRecord, durability: Durability) -> EngineResult<()>;

    fn list_outcomes(&self, experiment_id: Uuid) -> EngineResult<Vec<OutcomeRecord>>;

    fn update_analysis_snapshot(
        &self,
        experiment_id: Uuid,
        analysis: &ExperimentAnalysis,
        durability: Durability,
    ) -> EngineResult<()>;
}

/// Bandit arms, per-arm models and the append-only reward log.
pub trait BanditStore: Send + Sync {
    fn get_arm(&self, id: &str) -> EngineResult<Option<BanditArm>>;

    fn put_arm(&self, arm: &BanditArm, durability: Durability) -> EngineResult<()>;

    fn get_weights(&self, id: &str) -> EngineResult<Option<ArmModel>>;

    fn put_weights(&self, id: &str, model: &ArmModel, durability: Durability) -> EngineResult<()>;

    fn list_arms(&self) -> EngineResult<Vec<BanditArm>>;

    fn list_weights(&self) -> EngineResult<Vec<(String, ArmModel)>>;

    /// Append-only; never read back by the online path.
    fn append_reward_log(&self, record: &RewardRecord, durability: Durability) -> EngineResult<()>;
}

/// Store that rejects every call. Used to exercise degraded paths.
pub struct UnavailableStore;

impl UnavailableStore {
    fn err<T>() -> EngineResult<T> {
        Err(EngineError::persistence("store unavailable"))
    }
}

impl ExperimentStore for UnavailableStore {
    fn insert(&self, _: &Experiment, _: Durability) -> EngineResult<()> {
        Self::err()
    }
    fn update(&self, _: Uuid, _: &Experiment, _: Durability) -> EngineResult<()> {
        Self::err()
    }
    fn get_by_id(&self, _: Uuid) -> EngineResult<Option<Experiment>> {
        Self::err()
    }
    fn list(&self, _: &ExperimentFilter) -> EngineResult<Vec<Experiment>> {
        Self::err()
    }
    fn insert_outcome(&self, _: &OutcomeRecord, _: Durability) -> EngineResult<()> {
        Self::err()
    }
    fn list_outcomes(&self, _: Uuid) -> EngineResult<Vec<OutcomeRecord>> {
        Self::err()
    }
    fn update_analysis_snapshot(
        &self,
        _: Uuid,
        _: &ExperimentAnalysis,
        _: Durability,
    ) -> EngineResult<()> {
        Self::err()
    }
}

impl BanditStore for UnavailableStore {
    fn get_arm(&self, _: &str) -> EngineResult<Option<BanditArm>> {
        Self::err()
    }
    fn put_arm(&self, _: &BanditArm, _: Durability) -> EngineResult<()> {
        Self::err()
    }
    fn get_weights(&self, _: &str) -> EngineResult<Option<ArmModel>> {
        Self::err()
    }
    fn put_weights(&self, _: &str, _: &ArmModel, _: Durability) -> EngineResult<()> {
        Self::err()
    }
    fn list_arms(&self) -> EngineResult<Vec<BanditArm>> {
        Self::err()
    }
    fn list_weights(&self) -> EngineResult<Vec<(String, ArmModel)>> {
        Self::err()
    }
    fn append_reward_log(&self, _: &RewardRecord, _: Durability) -> EngineResult<()> {
        Self::err()
    }
}
