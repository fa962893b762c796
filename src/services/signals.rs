//! Signal facade: record ad-hoc signals and query the store.

use crate::db::{PulseDb, SignalFilter};
use crate::error::EngineError;
use crate::jobs::JobLocks;
use crate::types::{NewSignal, ScopeLevel, Signal, SignalBalance};

/// Validate and persist a signal emitted outside the detector sweep, e.g.
/// by a host application reacting to a user action.
pub fn record_signal(db: &PulseDb, new: NewSignal) -> Result<Signal, EngineError> {
    let signal = Signal::create(new)?;
    db.insert_signal(&signal)?;
    log::debug!("Recorded signal {} ({})", signal.id, signal.signal_type);
    Ok(signal)
}

pub fn get_signal(db: &PulseDb, id: &str) -> Result<Option<Signal>, EngineError> {
    Ok(db.get_signal(id)?)
}

pub fn list_signals(db: &PulseDb, filter: &SignalFilter) -> Result<Vec<Signal>, EngineError> {
    Ok(db.list_signals(filter)?)
}

/// Decay-weighted balance of the active signals at one scope.
pub fn scope_balance(
    db: &PulseDb,
    level: ScopeLevel,
    scope_id: &str,
) -> Result<SignalBalance, EngineError> {
    Ok(db.get_balance_for_scope(level, scope_id)?)
}

/// Expire active signals whose `expires_at` has passed. Returns the number
/// of rows moved to expired.
pub fn expire_signals(db: &PulseDb, locks: &JobLocks) -> Result<usize, EngineError> {
    let _guard = locks
        .try_begin("signal_expiry")
        .ok_or(EngineError::SweepAlreadyRunning("signal_expiry"))?;
    let expired = db.expire_old_signals()?;
    if expired > 0 {
        log::info!("Expired {} stale signal(s)", expired);
    }
    Ok(expired)
}
