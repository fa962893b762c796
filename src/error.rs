//! Error types for the correlation engine.
//!
//! Construction-time bounds violations (`SignalError`) fail a single signal;
//! everything else in a sweep is isolated per unit and collected into the
//! sweep's report. Only `EngineError` values escape a batch entry point.

use thiserror::Error;

use crate::db::DbError;

/// A signal failed validation at construction.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("valence must be -1, 0, or 1 (got {0})")]
    InvalidValence(i8),

    #[error("magnitude must be within [0, 1] (got {0})")]
    InvalidMagnitude(f64),

    #[error("confidence must be within [0, 1] (got {0})")]
    InvalidConfidence(f64),
}

/// Fatal failures from a batch entry point. Per-unit failures never land
/// here — they go into the sweep report's `errors` list.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("invalid signal: {0}")]
    Signal(#[from] SignalError),

    #[error("sweep '{0}' is already running")]
    SweepAlreadyRunning(&'static str),
}
