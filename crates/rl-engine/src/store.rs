//! In-memory bandit persistence backed by DashMap.

use dashmap::DashMap;
use engage_core::error::EngineResult;
use engage_core::store::{BanditStore, Durability};
use engage_core::types::{ArmModel, BanditArm, RewardRecord};
use parking_lot::Mutex;

#[derive(Default)]
pub struct MemoryBanditStore {
    arms: DashMap<String, BanditArm>,
    weights: DashMap<String, ArmModel>,
    rewards: Mutex<Vec<RewardRecord>>,
}

impl MemoryBanditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Audit log contents, oldest first.
    pub fn reward_log(&self) -> Vec<RewardRecord> {
        self.rewards.lock().clone()
    }
}

impl BanditStore for MemoryBanditStore {
    fn get_arm(&self, id: &str) -> EngineResult<Option<BanditArm>> {
        Ok(self.arms.get(id).map(|r| r.value().clone()))
    }

    fn put_arm(&self, arm: &BanditArm, _durability: Durability) -> EngineResult<()> {
        self.arms.insert(arm.id.clone(), arm.clone());
        Ok(())
    }

    fn get_weights(&self, id: &str) -> EngineResult<Option<ArmModel>> {
        Ok(self.weights.get(id).map(|r| r.value().clone()))
    }

    fn put_weights(&self, id: &str, model: &ArmModel, _durability: Durability) -> EngineResult<()> {
        self.weights.insert(id.to_string(), model.clone());
        Ok(())
    }

    fn list_arms(&self) -> EngineResult<Vec<BanditArm>> {
        let mut arms: Vec<BanditArm> = self.arms.iter().map(|r| r.value().clone()).collect();
        arms.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(arms)
    }

    fn list_weights(&self) -> EngineResult<Vec<(String, ArmModel)>> {
        let mut weights: Vec<(String, ArmModel)> = self
            .weights
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        weights.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(weights)
    }

    fn append_reward_log(&self, record: &RewardRecord, _durability: Durability) -> EngineResult<()> {
        self.rewards.lock().push(record.clone());
        Ok(())
    }
}
