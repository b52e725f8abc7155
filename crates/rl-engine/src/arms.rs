//! Built-in content-optimization strategies registered on first start.

use chrono::Utc;
use engage_core::types::BanditArm;
use serde_json::json;
use std::collections::HashMap;

pub const HASHTAG_OPTIMIZATION: &str = "hashtag_optimization";
pub const LENGTH_OPTIMIZATION: &str = "length_optimization";
pub const VISUAL_ENHANCEMENT: &str = "visual_enhancement";
pub const ENGAGEMENT_HOOK: &str = "engagement_hook";
pub const TIMING_OPTIMIZATION: &str = "timing_optimization";

fn arm(
    id: &str,
    name: &str,
    parameters: serde_json::Value,
    features: Vec<f64>,
    model_version: &str,
) -> BanditArm {
    let parameters: HashMap<String, serde_json::Value> = match parameters {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    };
    BanditArm {
        id: id.to_string(),
        name: name.to_string(),
        parameters,
        features,
        created_at: Utc::now(),
        model_version: model_version.to_string(),
    }
}

pub fn default_strategy_arms(model_version: &str) -> Vec<BanditArm> {
    vec![
        arm(
            HASHTAG_OPTIMIZATION,
            "Hashtag optimization",
            json!({ "max_hashtags": 5, "hashtags": ["#tips", "#howto", "#trending"] }),
            vec![1.0, 0.0, 0.0, 0.0, 0.0],
            model_version,
        ),
        arm(
            LENGTH_OPTIMIZATION,
            "Length optimization",
            json!({ "target_length": 280 }),
            vec![0.0, 1.0, 0.0, 0.0, 0.0],
            model_version,
        ),
        arm(
            VISUAL_ENHANCEMENT,
            "Visual enhancement",
            json!({ "add_thumbnail": true }),
            vec![0.0, 0.0, 1.0, 0.0, 0.0],
            model_version,
        ),
        arm(
            ENGAGEMENT_HOOK,
            "Engagement hook",
            json!({ "call_to_action": "What do you think? Tell us in the comments." }),
            vec![0.0, 0.0, 0.0, 1.0, 0.0],
            model_version,
        ),
        arm(
            TIMING_OPTIMIZATION,
            "Timing optimization",
            json!({ "peak_hours": [9, 12, 18] }),
            vec![0.0, 0.0, 0.0, 0.0, 1.0],
            model_version,
        ),
    ]
}
