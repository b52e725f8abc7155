//! Background ingestion of engagement reports.
//! Reports are queued on a bounded channel and turned into bandit rewards by
//! a single worker task.

use crate::agent::OptimizationAgent;
use engage_core::error::{EngineError, EngineResult};
use engage_core::types::{BanditContext, EngagementMetrics};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Engagement observed for published content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementReport {
    pub content_id: String,
    pub metrics: EngagementMetrics,
    #[serde(default)]
    pub context: Option<BanditContext>,
    #[serde(default)]
    pub arm_id: Option<String>,
}

/// Handle for submitting reports. Dropping every handle stops the worker.
#[derive(Clone)]
pub struct EngagementIngestor {
    sender: mpsc::Sender<EngagementReport>,
}

impl EngagementIngestor {
    /// Spawn the worker. The handle resolves to the number of reports that
    /// produced a reward.
    pub fn spawn(agent: Arc<OptimizationAgent>, buffer: usize) -> (Self, JoinHandle<u64>) {
        let (sender, receiver) = mpsc::channel::<EngagementReport>(buffer.max(1));
        let handle = tokio::spawn(async move { run(agent, receiver).await });
        info!(buffer = buffer, "Engagement ingestor started");
        (Self { sender }, handle)
    }

    /// Queue a report, waiting for channel capacity.
    pub async fn submit(&self, report: EngagementReport) -> EngineResult<()> {
        self.sender
            .send(report)
            .await
            .map_err(|_| EngineError::Internal(anyhow::anyhow!("engagement ingestor stopped")))
    }

    /// Queue without waiting. Returns `false` if the report was dropped.
    pub fn try_submit(&self, report: EngagementReport) -> bool {
        match self.sender.try_send(report) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Engagement report dropped");
                metrics::counter!("agent.ingest.dropped").increment(1);
                false
            }
        }
    }
}

async fn run(agent: Arc<OptimizationAgent>, mut receiver: mpsc::Receiver<EngagementReport>) -> u64 {
    let mut applied = 0u64;
    while let Some(report) = receiver.recv().await {
        let content_id = report.content_id.clone();
        let worker = agent.clone();
        // Reward updates write through the bandit store, which may block.
        let outcome = tokio::task::spawn_blocking(move || {
            worker.record_content_reward(
                &report.content_id,
                &report.metrics,
                report.context,
                report.arm_id.as_deref(),
            )
        })
        .await;

        match outcome {
            Ok(Ok(reward)) => {
                applied += 1;
                debug!(content_id = %content_id, reward = reward, "Engagement ingested");
            }
            Ok(Err(e)) => {
                warn!(content_id = %content_id, error = %e, "Failed to ingest engagement");
                metrics::counter!("agent.ingest.errors").increment(1);
            }
            Err(e) => {
                error!(content_id = %content_id, error = %e, "Reward update task failed");
                metrics::counter!("agent.ingest.errors").increment(1);
            }
        }
    }
    info!(applied = applied, "Engagement ingestor stopped");
    applied
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::content::{ContentTask, RuleBasedContentService};
    use engage_core::config::{AgentConfig, BanditConfig};
    use engage_core::store::{BanditStore, Durability};
    use engage_core::types::{ArmModel, BanditArm, ContentType, Platform, RewardRecord};
    use engage_rl_engine::{ContextualBandit, MemoryBanditStore};
    use parking_lot::Mutex;
    use std::thread::ThreadId;

    fn agent() -> Arc<OptimizationAgent> {
        let bandit = ContextualBandit::with_seed(
            BanditConfig::default(),
            Arc::new(MemoryBanditStore::new()),
            3,
        );
        bandit.initialize();
        Arc::new(OptimizationAgent::new(
            Arc::new(bandit),
            Arc::new(RuleBasedContentService),
            &AgentConfig::default(),
        ))
    }

    fn task(i: usize) -> ContentTask {
        ContentTask {
            platform: Platform::Tiktok,
            content_type: ContentType::Video,
            text: format!("clip {i}"),
            audience_segment: "gen_z".into(),
            historical_engagement: 0.08,
            has_thumbnail: false,
            scheduled_at: None,
            subject_id: None,
        }
    }

    fn report(content_id: &str) -> EngagementReport {
        EngagementReport {
            content_id: content_id.into(),
            metrics: EngagementMetrics {
                likes: 250.0,
                ..Default::default()
            },
            context: None,
            arm_id: None,
        }
    }

    #[tokio::test]
    async fn test_reports_become_rewards() {
        let agent = agent();
        for i in 0..3 {
            agent.optimize_content(&format!("clip-{i}"), &task(i)).unwrap();
        }
        let (ingestor, handle) = EngagementIngestor::spawn(agent.clone(), 16);

        for i in 0..3 {
            ingestor.submit(report(&format!("clip-{i}"))).await.unwrap();
        }
        // Unknown content is logged and skipped.
        ingestor.submit(report("unknown")).await.unwrap();
        drop(ingestor);

        assert_eq!(handle.await.unwrap(), 3);
        assert_eq!(agent.pending_count(), 0);
        let trained: u64 = agent
            .bandit()
            .arm_stats()
            .iter()
            .map(|s| s.training_examples)
            .sum();
        assert_eq!(trained, 3);
    }

    /// Records the thread each weight write runs on.
    struct ThreadRecordingStore {
        inner: MemoryBanditStore,
        write_threads: Mutex<Vec<ThreadId>>,
    }

    impl BanditStore for ThreadRecordingStore {
        fn get_arm(&self, id: &str) -> EngineResult<Option<BanditArm>> {
            self.inner.get_arm(id)
        }

        fn put_arm(&self, arm: &BanditArm, durability: Durability) -> EngineResult<()> {
            self.inner.put_arm(arm, durability)
        }

        fn get_weights(&self, id: &str) -> EngineResult<Option<ArmModel>> {
            self.inner.get_weights(id)
        }

        fn put_weights(&self, id: &str, model: &ArmModel, durability: Durability) -> EngineResult<()> {
            self.write_threads.lock().push(std::thread::current().id());
            self.inner.put_weights(id, model, durability)
        }

        fn list_arms(&self) -> EngineResult<Vec<BanditArm>> {
            self.inner.list_arms()
        }

        fn list_weights(&self) -> EngineResult<Vec<(String, ArmModel)>> {
            self.inner.list_weights()
        }

        fn append_reward_log(&self, record: &RewardRecord, durability: Durability) -> EngineResult<()> {
            self.inner.append_reward_log(record, durability)
        }
    }

    #[tokio::test]
    async fn test_store_writes_run_off_the_runtime_thread() {
        let store = Arc::new(ThreadRecordingStore {
            inner: MemoryBanditStore::new(),
            write_threads: Mutex::new(Vec::new()),
        });
        let bandit = ContextualBandit::with_seed(BanditConfig::default(), store.clone(), 9);
        bandit.initialize();
        let agent = Arc::new(OptimizationAgent::new(
            Arc::new(bandit),
            Arc::new(RuleBasedContentService),
            &AgentConfig::default(),
        ));
        agent.optimize_content("clip-0", &task(0)).unwrap();
        store.write_threads.lock().clear();

        let (ingestor, handle) = EngagementIngestor::spawn(agent, 4);
        ingestor.submit(report("clip-0")).await.unwrap();
        drop(ingestor);
        assert_eq!(handle.await.unwrap(), 1);

        // The current-thread test runtime drives the worker task on this thread.
        let runtime_thread = std::thread::current().id();
        let threads = store.write_threads.lock().clone();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], runtime_thread);
    }

    #[tokio::test]
    async fn test_try_submit_on_stopped_worker() {
        let (ingestor, handle) = EngagementIngestor::spawn(agent(), 1);
        handle.abort();
        let _ = handle.await;
        assert!(!ingestor.try_submit(report("x")));
        assert!(ingestor.submit(report("y")).await.is_err());
    }
}
