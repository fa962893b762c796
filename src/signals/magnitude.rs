//! Deterministic magnitude staircases.
//!
//! Detectors never compute magnitudes from continuous functions — the
//! staircase buckets keep re-runs reproducible and make fixtures exact.

/// Magnitude for something `days` overdue. 0 when not overdue yet.
pub fn overdue_magnitude(days: i64) -> f64 {
    if days <= 0 {
        0.0
    } else if days <= 3 {
        0.3
    } else if days <= 7 {
        0.5
    } else if days <= 14 {
        0.7
    } else if days <= 30 {
        0.85
    } else {
        1.0
    }
}

/// Display label for the overdue band `days` falls in. Bands mirror
/// [`overdue_magnitude`] so a magnitude always maps back to one label.
pub fn overdue_bucket(days: i64) -> &'static str {
    if days <= 3 {
        "1-3"
    } else if days <= 7 {
        "4-7"
    } else if days <= 14 {
        "8-14"
    } else if days <= 30 {
        "15-30"
    } else {
        "30+"
    }
}

/// Magnitude for an outstanding amount (in the ledger currency).
pub fn amount_magnitude(amount: f64) -> f64 {
    if amount < 5_000.0 {
        0.3
    } else if amount < 20_000.0 {
        0.5
    } else if amount < 50_000.0 {
        0.7
    } else if amount < 100_000.0 {
        0.85
    } else {
        1.0
    }
}
