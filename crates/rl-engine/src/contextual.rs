//! Contextual bandit: one online linear reward model per arm, Thompson-style
//! exploration around the model's point prediction.
//!
//! Selection draws `N(prediction, exploration × confidence)` per arm and picks
//! the highest draw. Confidence is `1/sqrt(n)`, so exploration decays as an arm
//! accumulates feedback. Rewards must already be normalised into `[0, 1]`.

use crate::arms::default_strategy_arms;
use crate::features::extract_features;
use chrono::Utc;
use dashmap::DashMap;
use engage_cache::TtlCache;
use engage_core::config::BanditConfig;
use engage_core::error::{EngineError, EngineResult};
use engage_core::stats::sample_normal;
use engage_core::store::{BanditStore, Durability};
use engage_core::types::{ArmModel, BanditArm, BanditContext, ContentType, Platform, RewardRecord};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArmStats {
    pub arm_id: String,
    pub name: String,
    pub training_examples: u64,
    pub confidence: f64,
    pub weight_norm: f64,
}

/// Selection-cache key: every context field, the float compared bitwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SelectionKey {
    platform: Platform,
    content_type: ContentType,
    audience_segment: String,
    hour_of_day: u32,
    day_of_week: u32,
    historical_engagement: u64,
    content_length: usize,
    has_hashtags: bool,
    has_thumbnail: bool,
    subject_id: Option<String>,
}

impl From<&BanditContext> for SelectionKey {
    fn from(context: &BanditContext) -> Self {
        Self {
            platform: context.platform,
            content_type: context.content_type,
            audience_segment: context.audience_segment.clone(),
            hour_of_day: context.hour_of_day,
            day_of_week: context.day_of_week,
            historical_engagement: context.historical_engagement.to_bits(),
            content_length: context.content_length,
            has_hashtags: context.has_hashtags,
            has_thumbnail: context.has_thumbnail,
            subject_id: context.subject_id.clone(),
        }
    }
}

pub struct ContextualBandit {
    config: BanditConfig,
    arms: DashMap<String, BanditArm>,
    // The entry write lock serialises read-modify-write of one arm's model.
    models: DashMap<String, ArmModel>,
    store: Arc<dyn BanditStore>,
    selection_cache: TtlCache<SelectionKey, String>,
    rng: Mutex<StdRng>,
}

impl ContextualBandit {
    pub fn new(config: BanditConfig, store: Arc<dyn BanditStore>) -> Self {
        Self::with_rng(config, store, StdRng::from_entropy())
    }

    pub fn with_seed(config: BanditConfig, store: Arc<dyn BanditStore>, seed: u64) -> Self {
        Self::with_rng(config, store, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut config: BanditConfig, store: Arc<dyn BanditStore>, rng: StdRng) -> Self {
        if config.regularization <= 0.0 || !config.regularization.is_finite() {
            warn!(regularization = config.regularization, "Non-positive regularization, using 1.0");
            config.regularization = 1.0;
        }
        let selection_cache =
            TtlCache::with_ttl_secs(config.selection_cache_ttl_secs, config.selection_cache_capacity);
        Self {
            config,
            arms: DashMap::new(),
            models: DashMap::new(),
            store,
            selection_cache,
            rng: Mutex::new(rng),
        }
    }

    pub fn dimension(&self) -> usize {
        self.config.feature_dimension
    }

    /// Restore persisted state, then register the built-in strategies if
    /// nothing was restored.
    pub fn initialize(&self) -> usize {
        self.load_from_persistence();
        if self.arms.is_empty() {
            for arm in default_strategy_arms(&self.config.model_version) {
                self.add_arm(arm);
            }
            info!(arms = self.arms.len(), "Registered default strategy arms");
        }
        self.arms.len()
    }

    /// Register (or replace) an arm with a fresh zero model.
    pub fn add_arm(&self, arm: BanditArm) {
        let model = ArmModel::zeroed(self.config.feature_dimension, self.config.initial_confidence);
        let durability = Durability::BestEffort;
        let _ = durability.settle("bandit.put_arm", self.store.put_arm(&arm, durability));
        let _ = durability.settle(
            "bandit.put_weights",
            self.store.put_weights(&arm.id, &model, durability),
        );

        debug!(arm_id = %arm.id, "Arm registered");
        self.models.insert(arm.id.clone(), model);
        self.arms.insert(arm.id.clone(), arm);
    }

    pub fn extract_features(&self, context: &BanditContext) -> Vec<f64> {
        extract_features(context, self.config.feature_dimension)
    }

    /// Pick an arm for this context.
    pub fn select_arm(&self, context: &BanditContext) -> EngineResult<String> {
        let key = SelectionKey::from(context);
        let mut rng = self.rng.lock();

        let bypass = rng.gen::<f64>() < self.config.cache_bypass_probability;
        if !bypass {
            if let Some(arm_id) = self.selection_cache.get(&key) {
                if self.arms.contains_key(&arm_id) {
                    metrics::counter!("bandit.selection_cache.hit").increment(1);
                    return Ok(arm_id);
                }
            }
        }

        let mut arm_ids: Vec<String> = self.arms.iter().map(|r| r.key().clone()).collect();
        if arm_ids.is_empty() {
            return Err(EngineError::not_found("no bandit arms registered"));
        }
        arm_ids.sort();

        let features = self.extract_features(context);
        let mut best: Option<(String, f64)> = None;
        for arm_id in &arm_ids {
            let Some((prediction, confidence)) = self
                .models
                .get(arm_id)
                .map(|m| (m.predict(&features), m.confidence))
            else {
                continue;
            };
            let std_dev = (self.config.exploration_parameter * confidence).max(0.0).sqrt();
            let sample = sample_normal(&mut *rng, prediction, std_dev);
            if best.as_ref().map_or(true, |(_, s)| sample > *s) {
                best = Some((arm_id.clone(), sample));
            }
        }

        let arm_id = match best {
            Some((arm_id, _)) => arm_id,
            None => {
                warn!("No arm has a model, choosing uniformly");
                arm_ids[rng.gen_range(0..arm_ids.len())].clone()
            }
        };

        self.selection_cache.put(key, arm_id.clone());
        metrics::counter!("bandit.selections").increment(1);
        Ok(arm_id)
    }

    /// One streaming gradient step on the arm's model.
    pub fn update_reward(&self, arm_id: &str, context: &BanditContext, reward: f64) -> EngineResult<()> {
        self.update_reward_with_correlation(arm_id, context, reward, None)
    }

    /// Same as [`update_reward`](Self::update_reward), tagging the reward log
    /// entry with the task or content id the reward was attributed through.
    pub fn update_reward_with_correlation(
        &self,
        arm_id: &str,
        context: &BanditContext,
        reward: f64,
        correlation_id: Option<&str>,
    ) -> EngineResult<()> {
        if !reward.is_finite() {
            return Err(EngineError::validation(format!("reward {reward} is not finite")));
        }
        if !self.arms.contains_key(arm_id) {
            return Err(EngineError::not_found(format!("bandit arm {arm_id}")));
        }
        if !(0.0..=1.0).contains(&reward) {
            warn!(arm_id = arm_id, reward = reward, "Reward outside [0, 1]");
        }

        let features = self.extract_features(context);
        let (snapshot, prediction) = {
            let mut model = self
                .models
                .entry(arm_id.to_string())
                .or_insert_with(|| {
                    ArmModel::zeroed(self.config.feature_dimension, self.config.initial_confidence)
                });
            let prediction = model.predict(&features);
            let error = reward - prediction;
            let learning_rate = 1.0 / (model.training_examples as f64 + self.config.regularization);
            for (w, x) in model.weights.iter_mut().zip(features.iter()) {
                *w += learning_rate * error * x;
            }
            model.training_examples += 1;
            model.confidence = 1.0 / (model.training_examples as f64).sqrt();
            model.last_updated = Utc::now();
            (model.clone(), prediction)
        };

        let durability = Durability::BestEffort;
        let _ = durability.settle(
            "bandit.put_weights",
            self.store.put_weights(arm_id, &snapshot, durability),
        );
        let record = RewardRecord {
            arm_id: arm_id.to_string(),
            features,
            reward,
            prediction,
            correlation_id: correlation_id.map(str::to_string),
            recorded_at: snapshot.last_updated,
        };
        let _ = durability.settle(
            "bandit.append_reward_log",
            self.store.append_reward_log(&record, durability),
        );

        metrics::counter!("bandit.reward_updates").increment(1);
        debug!(
            arm_id = arm_id,
            reward = reward,
            prediction = prediction,
            examples = snapshot.training_examples,
            "Arm model updated"
        );
        Ok(())
    }

    /// Best-effort restore of arms and models. Returns the number of arms
    /// restored; failures are logged and leave in-memory state untouched.
    pub fn load_from_persistence(&self) -> usize {
        let arms = match self.store.list_arms() {
            Ok(arms) => arms,
            Err(e) => {
                warn!(error = %e, "Bandit arms unavailable, continuing from memory");
                return 0;
            }
        };
        let restored = arms.len();
        for arm in arms {
            self.models
                .entry(arm.id.clone())
                .or_insert_with(|| {
                    ArmModel::zeroed(self.config.feature_dimension, self.config.initial_confidence)
                });
            self.arms.insert(arm.id.clone(), arm);
        }

        match self.store.list_weights() {
            Ok(weights) => {
                for (arm_id, mut model) in weights {
                    if !self.arms.contains_key(&arm_id) {
                        continue;
                    }
                    if model.weights.len() != self.config.feature_dimension {
                        debug!(
                            arm_id = %arm_id,
                            stored = model.weights.len(),
                            expected = self.config.feature_dimension,
                            "Resizing persisted weights"
                        );
                        model.weights.resize(self.config.feature_dimension, 0.0);
                    }
                    self.models.insert(arm_id, model);
                }
            }
            Err(e) => warn!(error = %e, "Bandit weights unavailable, arms start untrained"),
        }

        info!(arms = restored, "Bandit state restored");
        restored
    }

    pub fn arm(&self, arm_id: &str) -> Option<BanditArm> {
        self.arms.get(arm_id).map(|r| r.value().clone())
    }

    pub fn arms(&self) -> Vec<BanditArm> {
        let mut arms: Vec<BanditArm> = self.arms.iter().map(|r| r.value().clone()).collect();
        arms.sort_by(|a, b| a.id.cmp(&b.id));
        arms
    }

    pub fn model(&self, arm_id: &str) -> Option<ArmModel> {
        self.models.get(arm_id).map(|r| r.value().clone())
    }

    pub fn arm_stats(&self) -> Vec<ArmStats> {
        self.arms()
            .into_iter()
            .map(|arm| {
                let model = self.model(&arm.id);
                ArmStats {
                    training_examples: model.as_ref().map_or(0, |m| m.training_examples),
                    confidence: model.as_ref().map_or(0.0, |m| m.confidence),
                    weight_norm: model
                        .as_ref()
                        .map_or(0.0, |m| m.weights.iter().map(|w| w * w).sum::<f64>().sqrt()),
                    arm_id: arm.id,
                    name: arm.name,
                }
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryBanditStore;
    use engage_core::store::UnavailableStore;
    use std::collections::HashMap;

    fn arm(id: &str) -> BanditArm {
        BanditArm {
            id: id.into(),
            name: id.to_uppercase(),
            parameters: HashMap::new(),
            features: Vec::new(),
            created_at: Utc::now(),
            model_version: "linear-v1".into(),
        }
    }

    fn context() -> BanditContext {
        BanditContext {
            platform: Platform::Twitter,
            content_type: ContentType::Text,
            audience_segment: "developers".into(),
            hour_of_day: 12,
            day_of_week: 2,
            historical_engagement: 0.04,
            content_length: 180,
            has_hashtags: true,
            has_thumbnail: false,
            subject_id: None,
        }
    }

    #[test]
    fn test_add_arm_initial_state() {
        let store = Arc::new(MemoryBanditStore::new());
        let bandit = ContextualBandit::new(BanditConfig::default(), store.clone());
        bandit.add_arm(arm("a"));

        let model = bandit.model("a").unwrap();
        assert_eq!(model.weights, vec![0.0; 20]);
        assert!((model.confidence - 0.1).abs() < f64::EPSILON);
        assert_eq!(model.training_examples, 0);
        assert!(store.get_arm("a").unwrap().is_some());
        assert!(store.get_weights("a").unwrap().is_some());
    }

    #[test]
    fn test_update_reward_gradient_step() {
        let store = Arc::new(MemoryBanditStore::new());
        let bandit = ContextualBandit::new(BanditConfig::default(), store.clone());
        bandit.add_arm(arm("a"));
        let ctx = context();
        let features = bandit.extract_features(&ctx);

        bandit.update_reward("a", &ctx, 0.8).unwrap();

        let model = bandit.model("a").unwrap();
        assert_eq!(model.training_examples, 1);
        assert!((model.confidence - 1.0).abs() < f64::EPSILON);
        // First step: learning rate 1/(0 + 1), prediction 0.
        for (w, x) in model.weights.iter().zip(features.iter()) {
            assert!((w - 0.8 * x).abs() < 1e-12);
        }

        bandit.update_reward("a", &ctx, 0.8).unwrap();
        let model = bandit.model("a").unwrap();
        assert_eq!(model.training_examples, 2);
        assert!((model.confidence - 1.0 / 2f64.sqrt()).abs() < 1e-12);

        let log = store.reward_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].prediction, 0.0);
    }

    #[test]
    fn test_update_reward_rejects_bad_input() {
        let bandit = ContextualBandit::new(BanditConfig::default(), Arc::new(MemoryBanditStore::new()));
        bandit.add_arm(arm("a"));
        assert!(bandit.update_reward("missing", &context(), 0.5).unwrap_err().is_not_found());
        assert!(matches!(
            bandit.update_reward("a", &context(), f64::NAN).unwrap_err(),
            EngineError::Validation(_)
        ));
    }

    #[test]
    fn test_select_without_arms_fails() {
        let bandit = ContextualBandit::new(BanditConfig::default(), Arc::new(MemoryBanditStore::new()));
        assert!(bandit.select_arm(&context()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_convergence_smoke() {
        let bandit = ContextualBandit::with_seed(
            BanditConfig::default(),
            Arc::new(MemoryBanditStore::new()),
            2024,
        );
        bandit.add_arm(arm("a"));
        bandit.add_arm(arm("b"));
        let ctx = context();

        for i in 0..500 {
            if i % 2 == 0 {
                bandit.update_reward("a", &ctx, 1.0).unwrap();
            } else {
                bandit.update_reward("b", &ctx, 0.0).unwrap();
            }
        }

        let picks_a = (0..200)
            .filter(|_| bandit.select_arm(&ctx).unwrap() == "a")
            .count();
        assert!(picks_a >= 180, "arm a picked {picks_a}/200");

        let model_a = bandit.model("a").unwrap();
        assert!((model_a.predict(&bandit.extract_features(&ctx)) - 1.0).abs() < 0.05);
    }

    #[test]
    fn test_untrained_arms_all_get_explored() {
        let config = BanditConfig {
            cache_bypass_probability: 1.0,
            ..BanditConfig::default()
        };
        let bandit = ContextualBandit::with_seed(config, Arc::new(MemoryBanditStore::new()), 5);
        for id in ["a", "b", "c"] {
            bandit.add_arm(arm(id));
        }
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(bandit.select_arm(&context()).unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_cached_selection_is_reused_without_bypass() {
        let config = BanditConfig {
            cache_bypass_probability: 0.0,
            ..BanditConfig::default()
        };
        let bandit = ContextualBandit::with_seed(config, Arc::new(MemoryBanditStore::new()), 21);
        for id in ["a", "b", "c", "d", "e"] {
            bandit.add_arm(arm(id));
        }
        let first = bandit.select_arm(&context()).unwrap();
        for _ in 0..100 {
            assert_eq!(bandit.select_arm(&context()).unwrap(), first);
        }
        assert_eq!(bandit.selection_cache.len(), 1);
    }

    #[test]
    fn test_default_bypass_keeps_exploring_cached_context() {
        let bandit = ContextualBandit::with_seed(
            BanditConfig::default(),
            Arc::new(MemoryBanditStore::new()),
            8,
        );
        for id in ["a", "b", "c", "d", "e"] {
            bandit.add_arm(arm(id));
        }
        let mut seen = std::collections::HashSet::new();
        for _ in 0..300 {
            seen.insert(bandit.select_arm(&context()).unwrap());
        }
        assert!(seen.len() > 1, "only {seen:?} selected");
    }

    #[test]
    fn test_distinct_contexts_get_distinct_cache_entries() {
        // "Aa" and "BB" share a base-31 string hash.
        let mut first = context();
        first.audience_segment = "Aa".into();
        let mut second = context();
        second.audience_segment = "BB".into();
        assert_ne!(SelectionKey::from(&first), SelectionKey::from(&second));

        let config = BanditConfig {
            cache_bypass_probability: 0.0,
            ..BanditConfig::default()
        };
        let bandit = ContextualBandit::with_seed(config, Arc::new(MemoryBanditStore::new()), 4);
        bandit.add_arm(arm("a"));
        bandit.add_arm(arm("b"));
        bandit.select_arm(&first).unwrap();
        bandit.select_arm(&second).unwrap();
        assert_eq!(bandit.selection_cache.len(), 2);
    }

    #[test]
    fn test_persistence_round_trip() {
        let store = Arc::new(MemoryBanditStore::new());
        let first = ContextualBandit::new(BanditConfig::default(), store.clone());
        first.add_arm(arm("a"));
        first.add_arm(arm("b"));
        first.update_reward("a", &context(), 0.6).unwrap();

        let second = ContextualBandit::new(BanditConfig::default(), store);
        assert_eq!(second.initialize(), 2);
        assert_eq!(second.model("a").unwrap(), first.model("a").unwrap());
        assert_eq!(second.model("b").unwrap().training_examples, 0);
    }

    #[test]
    fn test_persisted_weights_are_resized() {
        let store = Arc::new(MemoryBanditStore::new());
        store.put_arm(&arm("a"), Durability::Required).unwrap();
        store
            .put_weights("a", &ArmModel::zeroed(8, 0.1), Durability::Required)
            .unwrap();

        let bandit = ContextualBandit::new(BanditConfig::default(), store);
        assert_eq!(bandit.load_from_persistence(), 1);
        assert_eq!(bandit.model("a").unwrap().weights.len(), 20);
    }

    #[test]
    fn test_operates_without_persistence() {
        let bandit = ContextualBandit::new(BanditConfig::default(), Arc::new(UnavailableStore));
        assert_eq!(bandit.initialize(), 5);
        let chosen = bandit.select_arm(&context()).unwrap();
        bandit.update_reward(&chosen, &context(), 0.4).unwrap();
        assert_eq!(bandit.model(&chosen).unwrap().training_examples, 1);
    }

    #[test]
    fn test_arm_stats() {
        let bandit = ContextualBandit::new(BanditConfig::default(), Arc::new(MemoryBanditStore::new()));
        bandit.add_arm(arm("b"));
        bandit.add_arm(arm("a"));
        bandit.update_reward("a", &context(), 1.0).unwrap();
        let stats = bandit.arm_stats();
        assert_eq!(stats[0].arm_id, "a");
        assert_eq!(stats[0].training_examples, 1);
        assert!(stats[0].weight_norm > 0.0);
        assert_eq!(stats[1].weight_norm, 0.0);
    }
}
