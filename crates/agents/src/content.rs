//! Content tasks and the service seam that applies a chosen strategy.

use chrono::{DateTime, Timelike, Utc};
use engage_core::types::{BanditArm, ContentType, Platform};
use engage_rl_engine::arms::{
    ENGAGEMENT_HOOK, HASHTAG_OPTIMIZATION, LENGTH_OPTIMIZATION, TIMING_OPTIMIZATION,
    VISUAL_ENHANCEMENT,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A piece of content awaiting optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentTask {
    pub platform: Platform,
    pub content_type: ContentType,
    pub text: String,
    #[serde(default)]
    pub audience_segment: String,
    #[serde(default)]
    pub historical_engagement: f64,
    #[serde(default)]
    pub has_thumbnail: bool,
    /// Publication time; defaults to now.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subject_id: Option<String>,
}

impl ContentTask {
    pub fn has_hashtags(&self) -> bool {
        self.text.split_whitespace().any(|w| w.starts_with('#') && w.len() > 1)
    }
}

/// Content after a strategy was applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizedContent {
    pub text: String,
    pub has_thumbnail: bool,
    pub suggested_hour: Option<u32>,
    /// Human-readable list of the edits made.
    pub changes: Vec<String>,
}

impl OptimizedContent {
    fn unchanged(task: &ContentTask) -> Self {
        Self {
            text: task.text.clone(),
            has_thumbnail: task.has_thumbnail,
            suggested_hour: None,
            changes: Vec::new(),
        }
    }
}

/// Applies a strategy arm to content. Implementations may call out to
/// generation or scheduling services.
pub trait ContentService: Send + Sync {
    fn apply_strategy(&self, arm: &BanditArm, task: &ContentTask) -> anyhow::Result<OptimizedContent>;
}

/// Deterministic text edits driven by the arm's parameters.
#[derive(Debug, Default, Clone)]
pub struct RuleBasedContentService;

impl RuleBasedContentService {
    pub fn new() -> Self {
        Self
    }
}

fn param_u64(arm: &BanditArm, key: &str) -> Option<u64> {
    arm.parameters.get(key).and_then(Value::as_u64)
}

fn param_str<'a>(arm: &'a BanditArm, key: &str) -> Option<&'a str> {
    arm.parameters.get(key).and_then(Value::as_str)
}

/// Cut at the last word boundary that keeps the text within `max_chars`.
fn trim_to(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out = String::new();
    for word in text.split_whitespace() {
        let extra = if out.is_empty() { 0 } else { 1 };
        if out.chars().count() + extra + word.chars().count() > max_chars {
            break;
        }
        if extra == 1 {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.is_empty() {
        out = text.chars().take(max_chars).collect();
    }
    out
}

impl ContentService for RuleBasedContentService {
    fn apply_strategy(&self, arm: &BanditArm, task: &ContentTask) -> anyhow::Result<OptimizedContent> {
        let mut content = OptimizedContent::unchanged(task);

        match arm.id.as_str() {
            HASHTAG_OPTIMIZATION => {
                let max = param_u64(arm, "max_hashtags").unwrap_or(3) as usize;
                let existing = content
                    .text
                    .split_whitespace()
                    .filter(|w| w.starts_with('#'))
                    .count();
                let candidates = arm
                    .parameters
                    .get("hashtags")
                    .and_then(Value::as_array)
                    .map(|tags| tags.iter().filter_map(Value::as_str).collect::<Vec<_>>())
                    .unwrap_or_default();
                let added: Vec<&str> = candidates
                    .into_iter()
                    .filter(|tag| !content.text.contains(tag))
                    .take(max.saturating_sub(existing))
                    .collect();
                if !added.is_empty() {
                    content.text = format!("{} {}", content.text.trim_end(), added.join(" "));
                    content.changes.push(format!("added hashtags {}", added.join(", ")));
                }
            }
            LENGTH_OPTIMIZATION => {
                let target = param_u64(arm, "target_length").unwrap_or(280) as usize;
                let trimmed = trim_to(&content.text, target);
                if trimmed != content.text {
                    content.changes.push(format!("trimmed to {target} characters"));
                    content.text = trimmed;
                }
            }
            VISUAL_ENHANCEMENT => {
                let add = arm
                    .parameters
                    .get("add_thumbnail")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                if add && !content.has_thumbnail {
                    content.has_thumbnail = true;
                    content.changes.push("attached thumbnail".to_string());
                }
            }
            ENGAGEMENT_HOOK => {
                if let Some(cta) = param_str(arm, "call_to_action") {
                    if !content.text.contains(cta) {
                        content.text = format!("{}\n\n{}", content.text.trim_end(), cta);
                        content.changes.push("appended call to action".to_string());
                    }
                }
            }
            TIMING_OPTIMIZATION => {
                let mut peaks: Vec<u32> = arm
                    .parameters
                    .get("peak_hours")
                    .and_then(Value::as_array)
                    .map(|hours| {
                        hours
                            .iter()
                            .filter_map(Value::as_u64)
                            .filter(|h| *h < 24)
                            .map(|h| h as u32)
                            .collect()
                    })
                    .unwrap_or_default();
                peaks.sort_unstable();
                let now = task.scheduled_at.unwrap_or_else(Utc::now).hour();
                let next = peaks.iter().copied().find(|h| *h >= now).or(peaks.first().copied());
                if let Some(hour) = next {
                    content.suggested_hour = Some(hour);
                    content.changes.push(format!("scheduled for {hour:02}:00"));
                }
            }
            other => {
                tracing::debug!(arm_id = other, "No rule for arm, content unchanged");
            }
        }

        Ok(content)
    }
}
