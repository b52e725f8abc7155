//! Engagement → bandit reward normalisation.

use engage_core::types::EngagementMetrics;

/// `(weight, saturation point)` per sub-metric. Weights sum to 1.
const LIKES: (f64, f64) = (0.30, 1000.0);
const COMMENTS: (f64, f64) = (0.25, 100.0);
const SHARES: (f64, f64) = (0.20, 50.0);
const CLICK_THROUGH: (f64, f64) = (0.15, 0.05);
const REACH: (f64, f64) = (0.10, 0.5);

fn term(value: f64, (weight, saturation): (f64, f64)) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    weight * (value / saturation).clamp(0.0, 1.0)
}

/// Weighted blend of capped sub-metrics. Always in `[0, 1]`.
pub fn compute_reward(metrics: &EngagementMetrics) -> f64 {
    let reward = term(metrics.likes, LIKES)
        + term(metrics.comments, COMMENTS)
        + term(metrics.shares, SHARES)
        + term(metrics.click_through_rate, CLICK_THROUGH)
        + term(metrics.reach_rate, REACH);
    reward.clamp(0.0, 1.0)
}
