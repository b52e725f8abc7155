//! Redis-backed bandit persistence.
//!
//! Arms and models live in two hashes keyed by arm id, values are JSON. The
//! reward log is a list that only ever grows through `RPUSH`.
//!
//! Calls are blocking and share one connection, reopened after an I/O error.
//! Callers on a tokio runtime must drive this store from
//! `tokio::task::spawn_blocking`.

use engage_core::config::RedisConfig;
use engage_core::error::{EngineError, EngineResult};
use engage_core::store::{BanditStore, Durability};
use engage_core::types::{ArmModel, BanditArm, RewardRecord};
use parking_lot::Mutex;
use redis::Commands;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub struct RedisBanditStore {
    client: redis::Client,
    conn: Mutex<Option<redis::Connection>>,
    arms_key: String,
    weights_key: String,
    rewards_key: String,
}

fn persistence(e: redis::RedisError) -> EngineError {
    EngineError::persistence(format!("redis: {e}"))
}

impl RedisBanditStore {
    /// Connect to Redis and verify connectivity.
    pub fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str())?;

        let mut conn = client.get_connection()?;
        let pong: String = redis::cmd("PING").query(&mut conn)?;
        info!(response = %pong, "Redis connection established");

        let prefix = &config.key_prefix;
        Ok(Self {
            client,
            conn: Mutex::new(Some(conn)),
            arms_key: format!("{prefix}:bandit:arms"),
            weights_key: format!("{prefix}:bandit:weights"),
            rewards_key: format!("{prefix}:bandit:rewards"),
        })
    }

    /// Run `op` on the shared connection, opening it if needed. The
    /// connection is discarded after an I/O failure so the next call
    /// reconnects.
    fn with_conn<T, F>(&self, op: F) -> EngineResult<T>
    where
        F: FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.client.get_connection().map_err(persistence)?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(EngineError::persistence("redis connection unavailable"));
        };
        match op(conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() {
                    warn!(error = %e, "Redis connection lost, reconnecting on next call");
                    *guard = None;
                }
                Err(persistence(e))
            }
        }
    }

    fn hget<T: serde::de::DeserializeOwned>(&self, key: &str, field: &str) -> EngineResult<Option<T>> {
        let data: Option<String> = self.with_conn(|conn| conn.hget(key, field))?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => {
                debug!(key = key, field = field, "Redis miss");
                Ok(None)
            }
        }
    }

    fn hset<T: serde::Serialize>(&self, key: &str, field: &str, value: &T) -> EngineResult<()> {
        let json = serde_json::to_string(value)?;
        self.with_conn(|conn| conn.hset::<_, _, _, ()>(key, field, json))
    }

    fn hgetall<T: serde::de::DeserializeOwned>(&self, key: &str) -> EngineResult<Vec<(String, T)>> {
        let raw: HashMap<String, String> = self.with_conn(|conn| conn.hgetall(key))?;
        let mut out = Vec::with_capacity(raw.len());
        for (field, json) in raw {
            out.push((field, serde_json::from_str(&json)?));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

impl BanditStore for RedisBanditStore {
    fn get_arm(&self, id: &str) -> EngineResult<Option<BanditArm>> {
        self.hget(&self.arms_key, id)
    }

    fn put_arm(&self, arm: &BanditArm, _durability: Durability) -> EngineResult<()> {
        self.hset(&self.arms_key, &arm.id, arm)
    }

    fn get_weights(&self, id: &str) -> EngineResult<Option<ArmModel>> {
        self.hget(&self.weights_key, id)
    }

    fn put_weights(&self, id: &str, model: &ArmModel, _durability: Durability) -> EngineResult<()> {
        self.hset(&self.weights_key, id, model)
    }

    fn list_arms(&self) -> EngineResult<Vec<BanditArm>> {
        Ok(self
            .hgetall::<BanditArm>(&self.arms_key)?
            .into_iter()
            .map(|(_, arm)| arm)
            .collect())
    }

    fn list_weights(&self) -> EngineResult<Vec<(String, ArmModel)>> {
        self.hgetall(&self.weights_key)
    }

    fn append_reward_log(&self, record: &RewardRecord, _durability: Durability) -> EngineResult<()> {
        let json = serde_json::to_string(record)?;
        self.with_conn(|conn| conn.rpush::<_, _, ()>(&self.rewards_key, json))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_config() -> RedisConfig {
        RedisConfig {
            key_prefix: format!("engage-test-{}", uuid::Uuid::new_v4()),
            ..RedisConfig::default()
        }
    }

    #[test]
    #[ignore = "requires a running Redis server"]
    fn test_arm_and_weights_round_trip() {
        let store = RedisBanditStore::new(&test_config()).unwrap();
        let arm = BanditArm {
            id: "hashtags".into(),
            name: "Hashtag optimization".into(),
            parameters: Default::default(),
            features: vec![1.0, 0.0],
            created_at: Utc::now(),
            model_version: "linear-v1".into(),
        };
        store.put_arm(&arm, Durability::Required).unwrap();
        store
            .put_weights("hashtags", &ArmModel::zeroed(4, 0.1), Durability::Required)
            .unwrap();

        assert_eq!(store.get_arm("hashtags").unwrap(), Some(arm));
        assert_eq!(store.list_arms().unwrap().len(), 1);
        let weights = store.list_weights().unwrap();
        assert_eq!(weights[0].0, "hashtags");
        assert_eq!(weights[0].1.weights.len(), 4);
        assert!(store.get_weights("missing").unwrap().is_none());
    }
}
