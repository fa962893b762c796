//! Recency weighting for signal aggregation (pure math, no DB).

use chrono::{DateTime, Utc};

/// Age-based multiplier reducing a signal's contribution to aggregates as
/// it grows stale. Bucket boundaries are part of the observable contract:
/// checked in descending order, >365d → 0.1, >180d → 0.25, >90d → 0.5,
/// >30d → 0.8, else 1.0.
pub fn recency_weight(age_days: f64) -> f64 {
    if age_days > 365.0 {
        0.1
    } else if age_days > 180.0 {
        0.25
    } else if age_days > 90.0 {
        0.5
    } else if age_days > 30.0 {
        0.8
    } else {
        1.0
    }
}

/// Fractional days between a timestamp and `now`, clamped at 0.
pub fn age_days(at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let secs = (now - at).num_seconds() as f64;
    (secs / 86400.0).max(0.0)
}

/// Parse an RFC3339 timestamp, falling back to the SQLite datetime format
/// (no timezone) for rows written by ad-hoc SQL.
pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
