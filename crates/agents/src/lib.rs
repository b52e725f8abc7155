//! Optimization agent: content tasks in, strategy selections out, engagement
//! fed back to the contextual bandit as normalised rewards.

#![warn(clippy::unwrap_used)]

pub mod agent;
pub mod content;
pub mod ingest;
pub mod reward;

pub use agent::{AgentOutcome, AgentTask, OptimizationAgent, OptimizationResult, PendingSelection};
pub use content::{ContentService, ContentTask, OptimizedContent, RuleBasedContentService};
pub use ingest::{EngagementIngestor, EngagementReport};
pub use reward::compute_reward;
