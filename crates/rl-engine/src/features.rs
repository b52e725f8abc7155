//! Context → fixed-length feature vector.
//!
//! Layout (indices past [`SCHEMA_LEN`] are zero padding):
//!
//! | index  | feature                                      |
//! |--------|----------------------------------------------|
//! | 0..6   | platform one-hot                             |
//! | 6..10  | content type one-hot                         |
//! | 10     | hour of day / 24                             |
//! | 11     | day of week / 7                              |
//! | 12     | historical engagement × 10, capped at 1      |
//! | 13     | content length / 2000, capped at 1           |
//! | 14     | has hashtags                                 |
//! | 15     | has thumbnail                                |
//! | 16     | audience segment bucket (8 buckets) / 8      |
//! | 17     | bias                                         |

use engage_core::stats::stable_hash;
use engage_core::types::{BanditContext, ContentType, Platform};

const PLATFORM_OFFSET: usize = 0;
const CONTENT_TYPE_OFFSET: usize = PLATFORM_OFFSET + Platform::ALL.len();
const NUMERIC_OFFSET: usize = CONTENT_TYPE_OFFSET + ContentType::ALL.len();
pub const SCHEMA_LEN: usize = NUMERIC_OFFSET + 8;

const AUDIENCE_BUCKETS: u64 = 8;
const MAX_CONTENT_LENGTH: f64 = 2000.0;
const ENGAGEMENT_SCALE: f64 = 10.0;

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Deterministic, pure. Output always has exactly `dimension` entries.
pub fn extract_features(context: &BanditContext, dimension: usize) -> Vec<f64> {
    let mut features = vec![0.0; SCHEMA_LEN];

    features[PLATFORM_OFFSET + context.platform.index()] = 1.0;
    features[CONTENT_TYPE_OFFSET + context.content_type.index()] = 1.0;

    let engagement = if context.historical_engagement.is_finite() {
        (context.historical_engagement * ENGAGEMENT_SCALE).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let bucket = stable_hash(&context.audience_segment) % AUDIENCE_BUCKETS;

    let numeric = [
        context.hour_of_day.min(23) as f64 / 24.0,
        context.day_of_week.min(6) as f64 / 7.0,
        engagement,
        (context.content_length as f64 / MAX_CONTENT_LENGTH).min(1.0),
        flag(context.has_hashtags),
        flag(context.has_thumbnail),
        bucket as f64 / AUDIENCE_BUCKETS as f64,
        1.0,
    ];
    features[NUMERIC_OFFSET..].copy_from_slice(&numeric);

    features.resize(dimension, 0.0);
    features
}
