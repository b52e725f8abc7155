use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ─── Platforms & content ────────────────────────────────────────────────

/// Social platforms the dashboard publishes to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Twitter,
    Facebook,
    Instagram,
    Linkedin,
    Tiktok,
    Youtube,
}

impl Platform {
    /// Fixed vocabulary, in feature-vector order.
    pub const ALL: [Platform; 6] = [
        Platform::Twitter,
        Platform::Facebook,
        Platform::Instagram,
        Platform::Linkedin,
        Platform::Tiktok,
        Platform::Youtube,
    ];

    pub fn index(self) -> usize {
        match self {
            Platform::Twitter => 0,
            Platform::Facebook => 1,
            Platform::Instagram => 2,
            Platform::Linkedin => 3,
            Platform::Tiktok => 4,
            Platform::Youtube => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
    Video,
    Link,
}

impl ContentType {
    pub const ALL: [ContentType; 4] = [
        ContentType::Text,
        ContentType::Image,
        ContentType::Video,
        ContentType::Link,
    ];

    pub fn index(self) -> usize {
        match self {
            ContentType::Text => 0,
            ContentType::Image => 1,
            ContentType::Video => 2,
            ContentType::Link => 3,
        }
    }
}

// ─── Experimentation ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl ExperimentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// `draft → running → {paused ⇄ running} → {completed, cancelled}`.
    /// Staying in the same status is always allowed.
    pub fn can_transition_to(self, next: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Draft, Running)
                | (Draft, Cancelled)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Cancelled)
                | (Paused, Completed)
                | (Paused, Cancelled)
        )
    }
}

/// Metric an experiment optimizes for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetMetric {
    EngagementRate,
    Likes,
    Comments,
    Shares,
    Views,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BetaPrior {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for BetaPrior {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    /// Traffic share in percent.
    pub weight: f64,
}

impl Variant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            config: HashMap::new(),
            weight,
        }
    }
}

/// A/B/n experiment definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub platform: Platform,
    pub owner_id: Option<String>,
    pub status: ExperimentStatus,
    pub variants: Vec<Variant>,
    pub target_metric: TargetMetric,
    pub min_sample_size: u64,
    pub confidence_level: f64,
    pub prior: Option<BetaPrior>,
    pub information_gain: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Experiment {
    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    pub fn prior_or_default(&self) -> BetaPrior {
        self.prior.unwrap_or_default()
    }
}

/// Caller-supplied definition for a new experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExperiment {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub platform: Platform,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub variants: Vec<Variant>,
    pub target_metric: TargetMetric,
    pub min_sample_size: u64,
    pub confidence_level: f64,
    #[serde(default)]
    pub prior: Option<BetaPrior>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<ExperimentStatus>,
    pub variants: Option<Vec<Variant>>,
    pub target_metric: Option<TargetMetric>,
    pub min_sample_size: Option<u64>,
    pub confidence_level: Option<f64>,
    pub prior: Option<BetaPrior>,
}

impl ExperimentUpdate {
    pub fn status(status: ExperimentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentFilter {
    pub platform: Option<Platform>,
    pub status: Option<ExperimentStatus>,
    pub owner_id: Option<String>,
}

impl ExperimentFilter {
    pub fn matches(&self, experiment: &Experiment) -> bool {
        self.platform.map_or(true, |p| experiment.platform == p)
            && self.status.map_or(true, |s| experiment.status == s)
            && self
                .owner_id
                .as_ref()
                .map_or(true, |o| experiment.owner_id.as_ref() == Some(o))
    }
}

/// Raw post metrics reported for a subject exposed to a variant.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PostMetrics {
    #[serde(default)]
    pub likes: f64,
    #[serde(default)]
    pub comments: f64,
    #[serde(default)]
    pub shares: f64,
    #[serde(default)]
    pub views: f64,
    /// Supplied by the platform when available; otherwise derived from the counts.
    #[serde(default)]
    pub engagement_rate: Option<f64>,
}

impl PostMetrics {
    /// Scalar value of this sample under the given target metric.
    pub fn value_for(&self, metric: TargetMetric) -> f64 {
        let value = match metric {
            TargetMetric::EngagementRate => self.engagement_rate.unwrap_or_else(|| {
                if self.views > 0.0 {
                    (self.likes + self.comments + self.shares) / self.views
                } else {
                    0.0
                }
            }),
            TargetMetric::Likes => self.likes,
            TargetMetric::Comments => self.comments,
            TargetMetric::Shares => self.shares,
            TargetMetric::Views => self.views,
        };
        if value.is_finite() {
            value
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeSample {
    pub subject_id: String,
    pub metrics: PostMetrics,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Immutable per-subject outcome, owned by the experiment store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeRecord {
    pub id: Uuid,
    pub experiment_id: Uuid,
    pub variant_id: String,
    pub subject_id: String,
    pub value: f64,
    pub converted: bool,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    InsufficientData,
    NoSignificantDifference,
    SignificantDifference,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    /// Minimum sample size not reached; no test was run.
    None,
    TwoSampleTTest,
    ThompsonSampling,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantAnalysis {
    pub variant_id: String,
    pub sample_size: u64,
    pub conversions: u64,
    pub mean_value: f64,
    pub posterior_mean: f64,
    pub posterior_std: f64,
    pub interval_lower: f64,
    pub interval_upper: f64,
    pub probability_best: Option<f64>,
}

impl VariantAnalysis {
    pub fn empty(variant_id: impl Into<String>) -> Self {
        Self {
            variant_id: variant_id.into(),
            sample_size: 0,
            conversions: 0,
            mean_value: 0.0,
            posterior_mean: 0.0,
            posterior_std: 0.0,
            interval_lower: 0.0,
            interval_upper: 0.0,
            probability_best: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentAnalysis {
    pub experiment_id: Uuid,
    pub status: AnalysisStatus,
    pub method: AnalysisMethod,
    pub variants: Vec<VariantAnalysis>,
    pub winning_variant: Option<String>,
    pub effect_size: f64,
    pub p_value: Option<f64>,
    pub information_gain: Option<f64>,
    pub recommendations: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl ExperimentAnalysis {
    pub fn variant(&self, variant_id: &str) -> Option<&VariantAnalysis> {
        self.variants.iter().find(|v| v.variant_id == variant_id)
    }
}

// ─── Contextual bandit ──────────────────────────────────────────────────

/// One selectable content-optimization strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BanditArm {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Descriptive only; selection uses the learned model.
    #[serde(default)]
    pub features: Vec<f64>,
    pub created_at: DateTime<Utc>,
    pub model_version: String,
}

/// Online linear-regression state for one arm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArmModel {
    pub weights: Vec<f64>,
    pub confidence: f64,
    pub training_examples: u64,
    pub last_updated: DateTime<Utc>,
}

impl ArmModel {
    pub fn zeroed(dimension: usize, confidence: f64) -> Self {
        Self {
            weights: vec![0.0; dimension],
            confidence,
            training_examples: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(features.iter())
            .map(|(w, x)| w * x)
            .sum()
    }
}

/// Per-request selection context. Never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BanditContext {
    pub platform: Platform,
    pub content_type: ContentType,
    pub audience_segment: String,
    pub hour_of_day: u32,
    /// 0 = Sunday.
    pub day_of_week: u32,
    /// Historical engagement rate as a fraction.
    pub historical_engagement: f64,
    pub content_length: usize,
    pub has_hashtags: bool,
    pub has_thumbnail: bool,
    pub subject_id: Option<String>,
}

/// Append-only audit row written on every reward update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RewardRecord {
    pub arm_id: String,
    pub features: Vec<f64>,
    pub reward: f64,
    pub prediction: f64,
    pub correlation_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Engagement reported by a platform for a published piece of content.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngagementMetrics {
    #[serde(default)]
    pub likes: f64,
    #[serde(default)]
    pub comments: f64,
    #[serde(default)]
    pub shares: f64,
    #[serde(default)]
    pub click_through_rate: f64,
    #[serde(default)]
    pub reach_rate: f64,
}
