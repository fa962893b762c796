//! Detector framework.
//!
//! Each detector reads one external feed and emits normalized signals.
//! Detectors are trait impls registered in an explicitly built
//! [`DetectorSet`] at startup — no runtime discovery. The run context
//! carries the active-signal dedup index, loaded once per run: a detector
//! MUST skip emission when (type, entity_id) already has an active signal,
//! so re-running against unchanged upstream data yields zero new signals.

pub mod comms_gap;
pub mod invoice_overdue;
pub mod task_overdue;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::db::PulseDb;
use crate::error::EngineError;
use crate::jobs::JobLocks;
use crate::scope::ScopeResolver;
use crate::types::Signal;

pub use comms_gap::{ChatSpaceFeed, ChatSpaceRecord, CommsGapDetector};
pub use invoice_overdue::{InvoiceFeed, InvoiceOverdueDetector, InvoiceRecord};
pub use task_overdue::{TaskFeed, TaskOverdueDetector, TaskRecord};

/// Context passed to each detector for one run.
pub struct DetectorContext<'a> {
    pub now: DateTime<Utc>,
    /// (signal_type, entity_id) pairs with an active signal.
    pub active: &'a HashSet<(String, String)>,
    pub scopes: &'a dyn ScopeResolver,
}

impl DetectorContext<'_> {
    /// The sole deduplication mechanism: true when an active signal already
    /// exists for this key.
    pub fn has_active(&self, signal_type: &str, entity_id: &str) -> bool {
        self.active
            .contains(&(signal_type.to_string(), entity_id.to_string()))
    }
}

/// A pluggable observer of one external feed.
pub trait Detector {
    fn detector_id(&self) -> &'static str;
    fn detector_version(&self) -> &'static str;
    /// The subset of signal types this detector may emit.
    fn signal_types(&self) -> &'static [&'static str];
    /// Read the feed and return newly constructed, not-yet-persisted
    /// signals. A feed failure fails this detector only.
    fn detect(&self, ctx: &DetectorContext) -> Result<Vec<Signal>, String>;
}

/// Explicitly constructed set of registered detectors.
#[derive(Default)]
pub struct DetectorSet {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, detector: Box<dyn Detector>) {
        self.detectors.push(detector);
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

/// Outcome of one detection sweep.
#[derive(Debug, Default)]
pub struct DetectionReport {
    pub emitted: usize,
    pub per_detector: HashMap<String, usize>,
    pub errors: Vec<String>,
}

/// Run every registered detector once.
///
/// Each detector is its own failure domain: a failing feed or insert lands
/// in the report's errors and the sweep continues. Each detector's batch is
/// inserted in a single transaction. The dedup index is extended with the
/// committed batch so later detectors in the same run see it.
pub fn run_detection(
    db: &PulseDb,
    set: &DetectorSet,
    scopes: &dyn ScopeResolver,
    locks: &JobLocks,
) -> Result<DetectionReport, EngineError> {
    let _guard = locks
        .try_begin("detection")
        .ok_or(EngineError::SweepAlreadyRunning("detection"))?;

    let mut active = db.load_active_signal_index()?;
    let mut report = DetectionReport::default();
    let now = Utc::now();

    for detector in &set.detectors {
        let ctx = DetectorContext {
            now,
            active: &active,
            scopes,
        };
        let signals = match detector.detect(&ctx) {
            Ok(signals) => signals,
            Err(e) => {
                log::warn!("Detector {} failed: {}", detector.detector_id(), e);
                report
                    .errors
                    .push(format!("{}: {}", detector.detector_id(), e));
                continue;
            }
        };

        let count = signals.len();
        if count > 0 {
            if let Err(e) = db.insert_signals(&signals) {
                report
                    .errors
                    .push(format!("{}: insert failed: {}", detector.detector_id(), e));
                continue;
            }
            for signal in &signals {
                active.insert((signal.signal_type.clone(), signal.entity_id.clone()));
            }
        }

        log::info!(
            "Detector {} emitted {} signal(s)",
            detector.detector_id(),
            count
        );
        report.emitted += count;
        report
            .per_detector
            .insert(detector.detector_id().to_string(), count);
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_db;
    use crate::scope::NullScopeResolver;
    use crate::types::{NewSignal, ScopeChain, SignalSource};

    struct FixedDetector {
        entity_ids: Vec<String>,
    }

    impl Detector for FixedDetector {
        fn detector_id(&self) -> &'static str {
            "fixed"
        }
        fn detector_version(&self) -> &'static str {
            "1"
        }
        fn signal_types(&self) -> &'static [&'static str] {
            &["task_overdue"]
        }
        fn detect(&self, ctx: &DetectorContext) -> Result<Vec<Signal>, String> {
            let mut out = Vec::new();
            for entity_id in &self.entity_ids {
                if ctx.has_active("task_overdue", entity_id) {
                    continue;
                }
                let signal = Signal::create(NewSignal {
                    signal_type: "task_overdue".to_string(),
                    valence: -1,
                    magnitude: 0.5,
                    entity_type: "task".to_string(),
                    entity_id: entity_id.clone(),
                    scope: ScopeChain::default(),
                    source: SignalSource::default(),
                    detection_confidence: 1.0,
                    attribution_confidence: 1.0,
                    occurred_at: ctx.now,
                    expires_at: None,
                    detector_id: "fixed".to_string(),
                    detector_version: "1".to_string(),
                })
                .map_err(|e| e.to_string())?;
                out.push(signal);
            }
            Ok(out)
        }
    }

    struct FailingDetector;

    impl Detector for FailingDetector {
        fn detector_id(&self) -> &'static str {
            "failing"
        }
        fn detector_version(&self) -> &'static str {
            "1"
        }
        fn signal_types(&self) -> &'static [&'static str] {
            &["whatever"]
        }
        fn detect(&self, _ctx: &DetectorContext) -> Result<Vec<Signal>, String> {
            Err("feed unreachable".to_string())
        }
    }

    #[test]
    fn test_rerun_emits_nothing_new() {
        let db = test_db();
        let locks = JobLocks::new();
        let mut set = DetectorSet::new();
        set.register(Box::new(FixedDetector {
            entity_ids: vec!["t1".to_string(), "t2".to_string()],
        }));

        let first = run_detection(&db, &set, &NullScopeResolver, &locks).expect("first");
        assert_eq!(first.emitted, 2);

        let second = run_detection(&db, &set, &NullScopeResolver, &locks).expect("second");
        assert_eq!(second.emitted, 0, "unchanged upstream data emits nothing");
    }

    #[test]
    fn test_failing_detector_isolated() {
        let db = test_db();
        let locks = JobLocks::new();
        let mut set = DetectorSet::new();
        set.register(Box::new(FailingDetector));
        set.register(Box::new(FixedDetector {
            entity_ids: vec!["t1".to_string()],
        }));

        let report = run_detection(&db, &set, &NullScopeResolver, &locks).expect("run");
        assert_eq!(report.emitted, 1, "healthy detector still runs");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("failing"));
    }

    #[test]
    fn test_sweep_refused_while_running() {
        let db = test_db();
        let locks = JobLocks::new();
        let set = DetectorSet::new();

        let _held = locks.try_begin("detection").expect("hold");
        let result = run_detection(&db, &set, &NullScopeResolver, &locks);
        assert!(matches!(
            result,
            Err(EngineError::SweepAlreadyRunning("detection"))
        ));
    }
}
