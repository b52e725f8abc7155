//! Optimization agent: turns content tasks into bandit selections now and
//! engagement reports into rewards later.
//!
//! Selection and reward are correlated only by the caller-supplied task id
//! (which doubles as the content id once published). The pending selection
//! lives in a bounded TTL cache until the reward arrives.

use crate::content::{ContentService, ContentTask, OptimizedContent};
use crate::reward::compute_reward;
use chrono::{Datelike, Timelike, Utc};
use engage_cache::TtlCache;
use engage_core::config::AgentConfig;
use engage_core::error::{EngineError, EngineResult};
use engage_core::types::{BanditContext, EngagementMetrics};
use engage_rl_engine::ContextualBandit;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentTask {
    OptimizeContent {
        task_id: String,
        task: ContentTask,
    },
    RecordEngagement {
        content_id: String,
        metrics: EngagementMetrics,
        #[serde(default)]
        context: Option<BanditContext>,
        #[serde(default)]
        arm_id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentOutcome {
    Optimized(OptimizationResult),
    RewardRecorded { content_id: String, reward: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub task_id: String,
    pub arm_id: String,
    pub strategy: String,
    pub context: BanditContext,
    pub content: OptimizedContent,
}

/// Selection awaiting its reward.
#[derive(Debug, Clone)]
pub struct PendingSelection {
    pub arm_id: String,
    pub context: BanditContext,
    pub task_id: String,
}

pub struct OptimizationAgent {
    bandit: Arc<ContextualBandit>,
    content: Arc<dyn ContentService>,
    pending: TtlCache<String, PendingSelection>,
}

impl OptimizationAgent {
    pub fn new(
        bandit: Arc<ContextualBandit>,
        content: Arc<dyn ContentService>,
        config: &AgentConfig,
    ) -> Self {
        info!(
            pending_capacity = config.pending_capacity,
            pending_ttl_secs = config.pending_ttl_secs,
            "Optimization agent initialized"
        );
        Self {
            bandit,
            content,
            pending: TtlCache::with_ttl_secs(config.pending_ttl_secs, config.pending_capacity),
        }
    }

    pub fn bandit(&self) -> &Arc<ContextualBandit> {
        &self.bandit
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self, task_id: &str) -> Option<PendingSelection> {
        self.pending.get(&task_id.to_string())
    }

    pub fn execute(&self, task: AgentTask) -> EngineResult<AgentOutcome> {
        match task {
            AgentTask::OptimizeContent { task_id, task } => {
                self.optimize_content(&task_id, &task).map(AgentOutcome::Optimized)
            }
            AgentTask::RecordEngagement {
                content_id,
                metrics,
                context,
                arm_id,
            } => {
                let reward =
                    self.record_content_reward(&content_id, &metrics, context, arm_id.as_deref())?;
                Ok(AgentOutcome::RewardRecorded { content_id, reward })
            }
        }
    }

    pub fn build_context(task: &ContentTask) -> BanditContext {
        let at = task.scheduled_at.unwrap_or_else(Utc::now);
        BanditContext {
            platform: task.platform,
            content_type: task.content_type,
            audience_segment: task.audience_segment.clone(),
            hour_of_day: at.hour(),
            day_of_week: at.weekday().num_days_from_sunday(),
            historical_engagement: task.historical_engagement,
            content_length: task.text.chars().count(),
            has_hashtags: task.has_hashtags(),
            has_thumbnail: task.has_thumbnail,
            subject_id: task.subject_id.clone(),
        }
    }

    /// Select a strategy for the task, apply it, and remember the selection
    /// under `task_id` for later reward attribution.
    pub fn optimize_content(&self, task_id: &str, task: &ContentTask) -> EngineResult<OptimizationResult> {
        if task_id.trim().is_empty() {
            return Err(EngineError::validation("task id must not be empty"));
        }

        let context = Self::build_context(task);
        let arm_id = self.bandit.select_arm(&context)?;
        let arm = self
            .bandit
            .arm(&arm_id)
            .ok_or_else(|| EngineError::not_found(format!("bandit arm {arm_id}")))?;

        let content = self.content.apply_strategy(&arm, task)?;

        self.pending.put(
            task_id.to_string(),
            PendingSelection {
                arm_id: arm_id.clone(),
                context: context.clone(),
                task_id: task_id.to_string(),
            },
        );
        metrics::counter!("agent.optimizations", "arm" => arm_id.clone()).increment(1);
        debug!(task_id = task_id, arm_id = %arm_id, changes = content.changes.len(), "Content optimized");

        Ok(OptimizationResult {
            task_id: task_id.to_string(),
            arm_id,
            strategy: arm.name,
            context,
            content,
        })
    }

    /// Attribute observed engagement to the selection made for `content_id`.
    /// Explicit `context`/`arm_id` take precedence over the pending entry.
    pub fn record_content_reward(
        &self,
        content_id: &str,
        metrics: &EngagementMetrics,
        context: Option<BanditContext>,
        arm_id: Option<&str>,
    ) -> EngineResult<f64> {
        let key = content_id.to_string();
        let pending = self.pending.get(&key);

        let arm_id = match (arm_id, pending.as_ref()) {
            (Some(id), _) => id.to_string(),
            (None, Some(p)) => p.arm_id.clone(),
            (None, None) => {
                warn!(content_id = content_id, "No selection recorded for content");
                return Err(EngineError::not_found(format!("selection for content {content_id}")));
            }
        };
        let context = match (context, pending) {
            (Some(ctx), _) => ctx,
            (None, Some(p)) => p.context,
            (None, None) => {
                return Err(EngineError::not_found(format!("context for content {content_id}")));
            }
        };

        let reward = compute_reward(metrics);
        self.bandit
            .update_reward_with_correlation(&arm_id, &context, reward, Some(content_id))?;
        self.pending.remove(&key);

        metrics::histogram!("agent.reward").record(reward);
        debug!(content_id = content_id, arm_id = %arm_id, reward = reward, "Reward recorded");
        Ok(reward)
    }
}
