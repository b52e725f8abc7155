//! Experiment manager: lifecycle, assignment, outcome ingestion and analysis.
//!
//! Definitions are cached in front of the store (cache first, store on miss).
//! Outcome tallies are cached per `(experiment, variant)` so an analysis can
//! still run from memory when the store cannot be read.

use crate::analysis::{analyze_tallies, tally_outcomes, AnalysisPolicy, VariantTally};
use crate::assignment;
use crate::validation::validate_definition;
use chrono::Utc;
use engage_cache::TtlCache;
use engage_core::config::ExperimentConfig;
use engage_core::error::{EngineError, EngineResult};
use engage_core::store::{Durability, ExperimentStore};
use engage_core::types::{
    Experiment, ExperimentAnalysis, ExperimentFilter, ExperimentStatus, ExperimentUpdate,
    NewExperiment, OutcomeRecord, OutcomeSample, Variant,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct ExperimentManager {
    store: Arc<dyn ExperimentStore>,
    experiments: TtlCache<Uuid, Experiment>,
    tallies: TtlCache<(Uuid, String), VariantTally>,
    policy: AnalysisPolicy,
    rng: Mutex<StdRng>,
}

impl ExperimentManager {
    pub fn new(store: Arc<dyn ExperimentStore>, config: &ExperimentConfig) -> Self {
        Self::with_rng(store, config, StdRng::from_entropy())
    }

    /// Deterministic Thompson sampling, for tests and replays.
    pub fn with_seed(store: Arc<dyn ExperimentStore>, config: &ExperimentConfig, seed: u64) -> Self {
        Self::with_rng(store, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(store: Arc<dyn ExperimentStore>, config: &ExperimentConfig, rng: StdRng) -> Self {
        Self {
            store,
            experiments: TtlCache::with_ttl_secs(config.cache_ttl_secs, config.cache_capacity),
            tallies: TtlCache::with_ttl_secs(config.cache_ttl_secs, config.cache_capacity),
            policy: AnalysisPolicy::from(config),
            rng: Mutex::new(rng),
        }
    }

    /// Validate, assign an id and persist. Persistence failure propagates:
    /// the caller needs the authoritative id.
    pub fn create_experiment(&self, definition: NewExperiment) -> EngineResult<Experiment> {
        validate_definition(
            &definition.name,
            &definition.variants,
            definition.confidence_level,
            definition.prior.as_ref(),
        )?;

        let now = Utc::now();
        let experiment = Experiment {
            id: Uuid::new_v4(),
            name: definition.name,
            description: definition.description,
            platform: definition.platform,
            owner_id: definition.owner_id,
            status: ExperimentStatus::Draft,
            variants: definition.variants,
            target_metric: definition.target_metric,
            min_sample_size: definition.min_sample_size,
            confidence_level: definition.confidence_level,
            prior: definition.prior,
            information_gain: None,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
        };

        let durability = Durability::Required;
        durability.settle(
            "experiment.insert",
            self.store.insert(&experiment, durability),
        )?;
        self.experiments.put(experiment.id, experiment.clone());

        metrics::counter!("experiments.created").increment(1);
        info!(
            experiment_id = %experiment.id,
            name = %experiment.name,
            variants = experiment.variants.len(),
            "Experiment created"
        );
        Ok(experiment)
    }

    /// Merge a partial update, re-validate and persist.
    pub fn update_experiment(&self, id: Uuid, update: ExperimentUpdate) -> EngineResult<Experiment> {
        let mut experiment = self
            .load_required(id)?
            .ok_or_else(|| EngineError::not_found(format!("experiment {id}")))?;

        let now = Utc::now();
        if let Some(next) = update.status {
            if !experiment.status.can_transition_to(next) {
                return Err(EngineError::validation(format!(
                    "invalid status transition {:?} -> {:?}",
                    experiment.status, next
                )));
            }
            if next != experiment.status {
                if next == ExperimentStatus::Running && experiment.started_at.is_none() {
                    experiment.started_at = Some(now);
                }
                if next.is_terminal() {
                    experiment.ended_at = Some(now);
                }
            }
            experiment.status = next;
        }
        if let Some(name) = update.name {
            experiment.name = name;
        }
        if let Some(description) = update.description {
            experiment.description = description;
        }
        if let Some(variants) = update.variants {
            experiment.variants = variants;
        }
        if let Some(metric) = update.target_metric {
            experiment.target_metric = metric;
        }
        if let Some(min) = update.min_sample_size {
            experiment.min_sample_size = min;
        }
        if let Some(confidence) = update.confidence_level {
            experiment.confidence_level = confidence;
        }
        if let Some(prior) = update.prior {
            experiment.prior = Some(prior);
        }

        validate_definition(
            &experiment.name,
            &experiment.variants,
            experiment.confidence_level,
            experiment.prior.as_ref(),
        )?;
        experiment.updated_at = now;

        let durability = Durability::BestEffort;
        durability.settle(
            "experiment.update",
            self.store.update(id, &experiment, durability),
        )?;
        self.experiments.put(id, experiment.clone());

        info!(experiment_id = %id, status = ?experiment.status, "Experiment updated");
        Ok(experiment)
    }

    pub fn start_experiment(&self, id: Uuid) -> EngineResult<Experiment> {
        self.update_experiment(id, ExperimentUpdate::status(ExperimentStatus::Running))
    }

    pub fn pause_experiment(&self, id: Uuid) -> EngineResult<Experiment> {
        self.update_experiment(id, ExperimentUpdate::status(ExperimentStatus::Paused))
    }

    pub fn complete_experiment(&self, id: Uuid) -> EngineResult<Experiment> {
        self.update_experiment(id, ExperimentUpdate::status(ExperimentStatus::Completed))
    }

    pub fn cancel_experiment(&self, id: Uuid) -> EngineResult<Experiment> {
        self.update_experiment(id, ExperimentUpdate::status(ExperimentStatus::Cancelled))
    }

    /// Cache first, then store. A failed store read degrades to None.
    pub fn get_experiment(&self, id: Uuid) -> Option<Experiment> {
        match self.load_required(id) {
            Ok(found) => found,
            Err(e) => {
                warn!(experiment_id = %id, error = %e, "Experiment read failed, treating as missing");
                None
            }
        }
    }

    pub fn list_experiments(&self, filter: &ExperimentFilter) -> Vec<Experiment> {
        self.store.list(filter).unwrap_or_else(|e| {
            warn!(error = %e, "Experiment listing failed");
            Vec::new()
        })
    }

    fn load_required(&self, id: Uuid) -> EngineResult<Option<Experiment>> {
        if let Some(experiment) = self.experiments.get(&id) {
            return Ok(Some(experiment));
        }
        let found = self.store.get_by_id(id)?;
        if let Some(experiment) = &found {
            self.experiments.put(id, experiment.clone());
        }
        Ok(found)
    }

    /// See [`assignment::assign_variant`].
    pub fn assign_variant<'a>(&self, experiment: &'a Experiment, subject_id: &str) -> Option<&'a Variant> {
        assignment::assign_variant(experiment, subject_id)
    }

    /// Load the experiment and assign the subject.
    pub fn assign_subject(&self, experiment_id: Uuid, subject_id: &str) -> Option<Variant> {
        let experiment = self.get_experiment(experiment_id)?;
        let variant = assignment::assign_variant(&experiment, subject_id)?.clone();
        metrics::counter!("experiments.assignments").increment(1);
        debug!(
            experiment_id = %experiment_id,
            subject_id = subject_id,
            variant_id = %variant.id,
            "Subject assigned"
        );
        Some(variant)
    }

    /// Record one outcome. Returns false (and records nothing) unless the
    /// experiment exists, is running and owns the variant.
    pub fn record_outcome(
        &self,
        experiment_id: Uuid,
        variant_id: &str,
        sample: OutcomeSample,
    ) -> EngineResult<bool> {
        let Some(experiment) = self.get_experiment(experiment_id) else {
            debug!(experiment_id = %experiment_id, "Outcome for unknown experiment ignored");
            return Ok(false);
        };
        if experiment.status != ExperimentStatus::Running {
            debug!(
                experiment_id = %experiment_id,
                status = ?experiment.status,
                "Outcome ignored, experiment not running"
            );
            return Ok(false);
        }
        if experiment.variant(variant_id).is_none() {
            warn!(experiment_id = %experiment_id, variant_id = variant_id, "Outcome for unknown variant ignored");
            return Ok(false);
        }

        let value = sample.metrics.value_for(experiment.target_metric);
        let record = OutcomeRecord {
            id: Uuid::new_v4(),
            experiment_id,
            variant_id: variant_id.to_string(),
            subject_id: sample.subject_id,
            value,
            converted: value > 0.0,
            recorded_at: Utc::now(),
            metadata: sample.metadata,
        };

        let durability = Durability::BestEffort;
        durability.settle(
            "experiment.insert_outcome",
            self.store.insert_outcome(&record, durability),
        )?;
        self.tallies.upsert(
            (experiment_id, record.variant_id.clone()),
            VariantTally::default,
            |t| t.record(record.value, record.converted),
        );

        metrics::counter!("experiments.outcomes_recorded").increment(1);
        Ok(true)
    }

    /// Recompute the analysis from the full outcome set. None if the
    /// experiment does not exist. Persisting the snapshot is best-effort.
    pub fn analyze(&self, experiment_id: Uuid) -> Option<ExperimentAnalysis> {
        let start = std::time::Instant::now();
        let experiment = self.get_experiment(experiment_id)?;

        let tallies = match self.store.list_outcomes(experiment_id) {
            Ok(records) => {
                let tallies = tally_outcomes(&experiment, &records);
                for (variant_id, tally) in &tallies {
                    self.tallies.put((experiment_id, variant_id.clone()), *tally);
                }
                tallies
            }
            Err(e) => {
                warn!(
                    experiment_id = %experiment_id,
                    error = %e,
                    "Outcome read failed, analysing cached tallies"
                );
                experiment
                    .variants
                    .iter()
                    .map(|v| {
                        let tally = self
                            .tallies
                            .get(&(experiment_id, v.id.clone()))
                            .unwrap_or_default();
                        (v.id.clone(), tally)
                    })
                    .collect()
            }
        };

        let analysis = {
            let mut rng = self.rng.lock();
            analyze_tallies(&experiment, &tallies, &self.policy, &mut *rng)
        };

        self.persist_analysis(&experiment, &analysis);

        metrics::counter!("experiments.analyses").increment(1);
        metrics::histogram!("experiments.analysis_latency_us").record(start.elapsed().as_micros() as f64);
        info!(
            experiment_id = %experiment_id,
            status = ?analysis.status,
            winner = ?analysis.winning_variant,
            "Experiment analysed"
        );
        Some(analysis)
    }

    fn persist_analysis(&self, experiment: &Experiment, analysis: &ExperimentAnalysis) {
        let durability = Durability::BestEffort;
        let _ = durability.settle(
            "experiment.update_analysis_snapshot",
            self.store
                .update_analysis_snapshot(experiment.id, analysis, durability),
        );

        if let Some(gain) = analysis.information_gain {
            // Re-read so a lifecycle change made during the analysis survives.
            let mut tracked = match self.load_required(experiment.id) {
                Ok(Some(current)) => current,
                Ok(None) => return,
                Err(e) => {
                    warn!(experiment_id = %experiment.id, error = %e, "Skipping information gain write-back");
                    return;
                }
            };
            tracked.information_gain = Some(gain);
            let _ = durability.settle(
                "experiment.update",
                self.store.update(tracked.id, &tracked, durability),
            );
            self.experiments.put(tracked.id, tracked);
        }
    }
}
