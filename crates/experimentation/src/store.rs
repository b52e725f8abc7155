//! In-memory experiment store backed by DashMap.
//!
//! Production: replace with PostgreSQL or another ACID store behind the same
//! [`ExperimentStore`] trait.

use dashmap::DashMap;
use engage_core::error::{EngineError, EngineResult};
use engage_core::store::{Durability, ExperimentStore};
use engage_core::types::{Experiment, ExperimentAnalysis, ExperimentFilter, OutcomeRecord};
use tracing::info;
use uuid::Uuid;

/// Thread-safe in-memory store for experiments, outcomes and analysis snapshots.
pub struct MemoryExperimentStore {
    experiments: DashMap<Uuid, Experiment>,
    outcomes: DashMap<Uuid, Vec<OutcomeRecord>>,
    snapshots: DashMap<Uuid, ExperimentAnalysis>,
}

impl MemoryExperimentStore {
    pub fn new() -> Self {
        info!("Experiment store initialized (in-memory, development mode)");
        Self {
            experiments: DashMap::new(),
            outcomes: DashMap::new(),
            snapshots: DashMap::new(),
        }
    }

    /// Latest persisted analysis for an experiment.
    pub fn snapshot(&self, experiment_id: Uuid) -> Option<ExperimentAnalysis> {
        self.snapshots.get(&experiment_id).map(|r| r.value().clone())
    }

    pub fn outcome_count(&self, experiment_id: Uuid) -> usize {
        self.outcomes
            .get(&experiment_id)
            .map(|r| r.value().len())
            .unwrap_or(0)
    }
}

impl Default for MemoryExperimentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentStore for MemoryExperimentStore {
    fn insert(&self, experiment: &Experiment, _durability: Durability) -> EngineResult<()> {
        if self.experiments.contains_key(&experiment.id) {
            return Err(EngineError::persistence(format!(
                "experiment {} already exists",
                experiment.id
            )));
        }
        self.experiments.insert(experiment.id, experiment.clone());
        Ok(())
    }

    fn update(&self, id: Uuid, experiment: &Experiment, _durability: Durability) -> EngineResult<()> {
        match self.experiments.get_mut(&id) {
            Some(mut entry) => {
                *entry = experiment.clone();
                Ok(())
            }
            None => Err(EngineError::not_found(format!("experiment {id}"))),
        }
    }

    fn get_by_id(&self, id: Uuid) -> EngineResult<Option<Experiment>> {
        Ok(self.experiments.get(&id).map(|r| r.value().clone()))
    }

    fn list(&self, filter: &ExperimentFilter) -> EngineResult<Vec<Experiment>> {
        let mut experiments: Vec<Experiment> = self
            .experiments
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        experiments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(experiments)
    }

    fn insert_outcome(&self, record: &OutcomeRecord, _durability: Durability) -> EngineResult<()> {
        self.outcomes
            .entry(record.experiment_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    fn list_outcomes(&self, experiment_id: Uuid) -> EngineResult<Vec<OutcomeRecord>> {
        Ok(self
            .outcomes
            .get(&experiment_id)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    fn update_analysis_snapshot(
        &self,
        experiment_id: Uuid,
        analysis: &ExperimentAnalysis,
        _durability: Durability,
    ) -> EngineResult<()> {
        self.snapshots.insert(experiment_id, analysis.clone());
        Ok(())
    }
}
