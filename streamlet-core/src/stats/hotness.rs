//! Ranking score combining popularity and recency.
//!
//! The weights are fixed: existing rankings depend on them.

use chrono::{DateTime, Utc};

pub const VIEW_WEIGHT: f64 = 1.0;
pub const LIKE_WEIGHT: f64 = 5.0;
pub const RECENCY_WINDOW_DAYS: f64 = 7.0;
pub const RECENCY_POINTS_PER_DAY: f64 = 10.0;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// `views * 1 + likes * 5 + max(0, 7 - daysSinceLastViewed) * 10`.
///
/// A row that was never viewed counts as viewed just now. Timestamps in the
/// future are treated as "now".
pub fn hotness(
    views: i64,
    likes: i64,
    last_viewed: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> f64 {
    let days_since = last_viewed
        .map(|viewed| (now - viewed).num_milliseconds() as f64 / MILLIS_PER_DAY)
        .unwrap_or(0.0)
        .max(0.0);
    let recency_bonus = (RECENCY_WINDOW_DAYS - days_since).max(0.0) * RECENCY_POINTS_PER_DAY;
    views as f64 * VIEW_WEIGHT + likes as f64 * LIKE_WEIGHT + recency_bonus
}
