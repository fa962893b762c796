//! Issue lifecycle transitions and the monitoring/regression sweeps.
//!
//! The state machine moves one way — detected → surfaced → acknowledged →
//! addressing → monitoring → closed — with a single backward edge:
//! monitoring regresses to surfaced when the same scope produces fresh
//! negative evidence. Every transition appends to the issue's state history
//! and is persisted through `save_issue`.

use chrono::{Duration, Utc};

use crate::db::{DbError, PulseDb};
use crate::error::EngineError;
use crate::jobs::JobLocks;
use crate::signals::decay::{age_days, recency_weight};
use crate::types::{IssueState, StateHistoryEntry};

/// How long a resolved issue is watched for regressions before closing.
pub const MONITORING_WINDOW_DAYS: i64 = 90;

/// Fresh negative signals in the monitoring window that trigger a regression.
pub const REGRESSION_MIN_COUNT: usize = 3;

/// Decay-weighted negative magnitude that triggers a regression on its own.
pub const REGRESSION_MIN_MAGNITUDE: f64 = 1.5;

// ---------------------------------------------------------------------------
// Manual transitions
// ---------------------------------------------------------------------------

/// Surfaced → acknowledged. Returns false when the issue is missing or not
/// in a state that accepts the transition.
pub fn acknowledge_issue(db: &PulseDb, issue_id: &str, actor: &str) -> Result<bool, DbError> {
    let Some(mut issue) = db.get_issue(issue_id)? else {
        return Ok(false);
    };
    if issue.state != IssueState::Surfaced {
        return Ok(false);
    }

    let now = Utc::now();
    issue.state = IssueState::Acknowledged;
    issue.acknowledged_at = Some(now);
    issue.updated_at = now;
    issue
        .state_history
        .push(StateHistoryEntry::now("acknowledged", actor));
    db.save_issue(&issue)?;
    Ok(true)
}

/// Surfaced/acknowledged → addressing.
pub fn start_addressing(db: &PulseDb, issue_id: &str, actor: &str) -> Result<bool, DbError> {
    let Some(mut issue) = db.get_issue(issue_id)? else {
        return Ok(false);
    };
    if !matches!(issue.state, IssueState::Surfaced | IssueState::Acknowledged) {
        return Ok(false);
    }

    let now = Utc::now();
    issue.state = IssueState::Addressing;
    issue.addressing_started_at = Some(now);
    issue.updated_at = now;
    issue
        .state_history
        .push(StateHistoryEntry::now("addressing", actor));
    db.save_issue(&issue)?;
    Ok(true)
}

/// Any open state → monitoring. The issue is not closed outright: it enters
/// a fixed monitoring window so a recurrence reopens the same issue instead
/// of minting a new one. Appends a "resolved" history entry (a label, not a
/// state) followed by the "monitoring" entry.
pub fn resolve_issue(
    db: &PulseDb,
    issue_id: &str,
    method: &str,
    resolved_by: &str,
    notes: Option<&str>,
) -> Result<bool, DbError> {
    let Some(mut issue) = db.get_issue(issue_id)? else {
        return Ok(false);
    };
    if !issue.state.is_open() {
        return Ok(false);
    }

    let now = Utc::now();
    issue.state = IssueState::Monitoring;
    issue.resolved_at = Some(now);
    issue.resolution_method = Some(method.to_string());
    issue.resolution_notes = notes.map(str::to_string);
    issue.monitoring_until = Some(now + Duration::days(MONITORING_WINDOW_DAYS));
    issue.updated_at = now;
    issue
        .state_history
        .push(StateHistoryEntry::now("resolved", resolved_by));
    issue
        .state_history
        .push(StateHistoryEntry::now("monitoring", resolved_by));
    db.save_issue(&issue)?;
    log::info!("Issue {} resolved ({}), monitoring until {:?}", issue.id, method, issue.monitoring_until);
    Ok(true)
}

/// Straight to closed, skipping the monitoring window. Allowed from any
/// state except closed and monitoring — a monitored issue either regresses
/// or ages out.
pub fn dismiss_issue(
    db: &PulseDb,
    issue_id: &str,
    actor: &str,
    notes: Option<&str>,
) -> Result<bool, DbError> {
    let Some(mut issue) = db.get_issue(issue_id)? else {
        return Ok(false);
    };
    if matches!(issue.state, IssueState::Closed | IssueState::Monitoring) {
        return Ok(false);
    }

    let now = Utc::now();
    issue.state = IssueState::Closed;
    issue.closed_at = Some(now);
    issue.resolution_method = Some("dismissed".to_string());
    issue.resolution_notes = notes.map(str::to_string);
    issue.updated_at = now;
    issue
        .state_history
        .push(StateHistoryEntry::now("closed", actor));
    db.save_issue(&issue)?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Sweeps
// ---------------------------------------------------------------------------

/// Outcome of one regression sweep over monitoring issues.
#[derive(Debug, Default)]
pub struct RegressionReport {
    pub checked: usize,
    pub regressed: Vec<String>,
    pub closed: usize,
    pub errors: Vec<String>,
}

/// Walk every monitoring issue: close those whose window elapsed, reopen
/// those whose scope accumulated fresh negative evidence since resolution.
pub fn check_regressions(db: &PulseDb, locks: &JobLocks) -> Result<RegressionReport, EngineError> {
    let _guard = locks
        .try_begin("regression_check")
        .ok_or(EngineError::SweepAlreadyRunning("regression_check"))?;

    let mut report = RegressionReport::default();
    let monitoring = db.find_issues_in_state(IssueState::Monitoring)?;
    let now = Utc::now();

    for mut issue in monitoring {
        report.checked += 1;

        let window_open = issue.monitoring_until.map(|until| until > now).unwrap_or(false);
        if !window_open {
            issue.state = IssueState::Closed;
            issue.closed_at = Some(now);
            issue.updated_at = now;
            issue
                .state_history
                .push(StateHistoryEntry::now("closed", "regression_check"));
            if let Err(e) = db.save_issue(&issue) {
                report.errors.push(format!("{}: {}", issue.id, e));
            } else {
                report.closed += 1;
            }
            continue;
        }

        // Only evidence newer than the resolution counts
        let Some(resolved_at) = issue.resolved_at else {
            continue;
        };
        let fresh = match db.find_regression_signals(issue.scope_level, &issue.scope_id, resolved_at)
        {
            Ok(signals) => signals,
            Err(e) => {
                report.errors.push(format!("{}: {}", issue.id, e));
                continue;
            }
        };
        let decayed: f64 = fresh
            .iter()
            .map(|s| s.magnitude * recency_weight(age_days(s.detected_at, now)))
            .sum();
        if fresh.len() < REGRESSION_MIN_COUNT && decayed < REGRESSION_MIN_MAGNITUDE {
            continue;
        }

        issue.state = IssueState::Surfaced;
        issue.surfaced_at = Some(now);
        issue.regression_count += 1;
        issue.last_regression_at = Some(now);
        issue.resolved_at = None;
        issue.resolution_method = None;
        issue.monitoring_until = None;
        issue.updated_at = now;
        issue
            .state_history
            .push(StateHistoryEntry::now("surfaced", "regression_check"));
        match db.save_issue(&issue) {
            Ok(()) => {
                log::warn!(
                    "Issue {} regressed: {} fresh signal(s), decayed magnitude {:.2}",
                    issue.id,
                    fresh.len(),
                    decayed
                );
                report.regressed.push(issue.id.clone());
            }
            Err(e) => report.errors.push(format!("{}: {}", issue.id, e)),
        }
    }

    Ok(report)
}

/// Outcome of one auto-resolution sweep over addressing issues.
#[derive(Debug, Default)]
pub struct ResolutionReport {
    pub checked: usize,
    pub auto_resolved: Vec<String>,
    pub errors: Vec<String>,
}

/// Auto-resolve addressing issues whose scope's live signal balance is no
/// longer net-negative. Uses the current active signals, not the consumed
/// snapshot the issue was formed from. Requires at least one positive
/// signal: a scope whose negatives were all just consumed has a net-0
/// balance that says nothing about recovery.
pub fn run_resolution_check(db: &PulseDb, locks: &JobLocks) -> Result<ResolutionReport, EngineError> {
    let _guard = locks
        .try_begin("resolution_check")
        .ok_or(EngineError::SweepAlreadyRunning("resolution_check"))?;

    let mut report = ResolutionReport::default();
    for issue in db.find_issues_in_state(IssueState::Addressing)? {
        report.checked += 1;
        let balance = match db.get_balance_for_scope(issue.scope_level, &issue.scope_id) {
            Ok(balance) => balance,
            Err(e) => {
                report.errors.push(format!("{}: {}", issue.id, e));
                continue;
            }
        };
        if balance.net_score < 0.0 || balance.positive_count == 0 {
            continue;
        }
        match resolve_issue(db, &issue.id, "signals_balanced", "system", None) {
            Ok(true) => report.auto_resolved.push(issue.id.clone()),
            Ok(false) => {}
            Err(e) => report.errors.push(format!("{}: {}", issue.id, e)),
        }
    }

    log::info!(
        "Resolution check: {} addressing issue(s), {} auto-resolved",
        report.checked,
        report.auto_resolved.len()
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::issues::test_fixtures::make_issue;
    use crate::db::test_utils::test_db;
    use crate::types::{NewSignal, ScopeChain, Signal, SignalSource};

    fn negative_signal(entity_id: &str, magnitude: f64) -> Signal {
        Signal::create(NewSignal {
            signal_type: "task_overdue".to_string(),
            valence: -1,
            magnitude,
            entity_type: "task".to_string(),
            entity_id: entity_id.to_string(),
            scope: ScopeChain {
                client_id: Some("c1".to_string()),
                ..Default::default()
            },
            source: SignalSource::default(),
            detection_confidence: 1.0,
            attribution_confidence: 1.0,
            occurred_at: Utc::now(),
            expires_at: None,
            detector_id: "test".to_string(),
            detector_version: "1".to_string(),
        })
        .expect("valid signal")
    }

    #[test]
    fn test_acknowledge_from_surfaced() {
        let db = test_db();
        let issue = make_issue("task_backlog", "c1", IssueState::Surfaced);
        db.insert_issue(&issue).expect("insert");

        assert!(acknowledge_issue(&db, &issue.id, "ops").expect("ack"));
        let loaded = db.get_issue(&issue.id).expect("get").expect("present");
        assert_eq!(loaded.state, IssueState::Acknowledged);
        assert!(loaded.acknowledged_at.is_some());
        assert_eq!(loaded.state_history.last().unwrap().state, "acknowledged");
        assert_eq!(loaded.state_history.last().unwrap().actor, "ops");
    }

    #[test]
    fn test_acknowledge_refused_outside_surfaced() {
        let db = test_db();
        for state in [IssueState::Detected, IssueState::Addressing, IssueState::Closed] {
            let issue = make_issue("task_backlog", &format!("c-{}", state.as_str()), state);
            db.insert_issue(&issue).expect("insert");
            assert!(!acknowledge_issue(&db, &issue.id, "ops").expect("ack"));
        }
        assert!(!acknowledge_issue(&db, "iss-missing", "ops").expect("ack"));
    }

    #[test]
    fn test_start_addressing_from_surfaced_or_acknowledged() {
        let db = test_db();
        let a = make_issue("task_backlog", "c1", IssueState::Surfaced);
        let b = make_issue("task_backlog", "c2", IssueState::Acknowledged);
        let c = make_issue("task_backlog", "c3", IssueState::Detected);
        for issue in [&a, &b, &c] {
            db.insert_issue(issue).expect("insert");
        }

        assert!(start_addressing(&db, &a.id, "ops").expect("start"));
        assert!(start_addressing(&db, &b.id, "ops").expect("start"));
        assert!(!start_addressing(&db, &c.id, "ops").expect("start"));

        let loaded = db.get_issue(&a.id).expect("get").expect("present");
        assert_eq!(loaded.state, IssueState::Addressing);
        assert!(loaded.addressing_started_at.is_some());
    }

    #[test]
    fn test_resolve_enters_monitoring_with_two_history_entries() {
        let db = test_db();
        let issue = make_issue("task_backlog", "c1", IssueState::Addressing);
        db.insert_issue(&issue).expect("insert");

        assert!(resolve_issue(&db, &issue.id, "manual", "ops", Some("fixed")).expect("resolve"));
        let loaded = db.get_issue(&issue.id).expect("get").expect("present");
        assert_eq!(loaded.state, IssueState::Monitoring);
        assert_eq!(loaded.resolution_method.as_deref(), Some("manual"));
        assert_eq!(loaded.resolution_notes.as_deref(), Some("fixed"));
        assert!(loaded.resolved_at.is_some());

        let until = loaded.monitoring_until.expect("window set");
        let days = (until - loaded.resolved_at.unwrap()).num_days();
        assert_eq!(days, MONITORING_WINDOW_DAYS);

        let labels: Vec<&str> = loaded
            .state_history
            .iter()
            .map(|e| e.state.as_str())
            .collect();
        assert_eq!(labels[labels.len() - 2..], ["resolved", "monitoring"]);
    }

    #[test]
    fn test_resolve_refused_when_not_open() {
        let db = test_db();
        let issue = make_issue("task_backlog", "c1", IssueState::Monitoring);
        db.insert_issue(&issue).expect("insert");
        assert!(!resolve_issue(&db, &issue.id, "manual", "ops", None).expect("resolve"));
    }

    #[test]
    fn test_dismiss_closes_without_monitoring() {
        let db = test_db();
        let issue = make_issue("task_backlog", "c1", IssueState::Detected);
        db.insert_issue(&issue).expect("insert");

        assert!(dismiss_issue(&db, &issue.id, "ops", Some("not relevant")).expect("dismiss"));
        let loaded = db.get_issue(&issue.id).expect("get").expect("present");
        assert_eq!(loaded.state, IssueState::Closed);
        assert!(loaded.closed_at.is_some());
        assert!(loaded.monitoring_until.is_none());
        assert_eq!(loaded.resolution_method.as_deref(), Some("dismissed"));
    }

    #[test]
    fn test_dismiss_refused_for_monitoring() {
        let db = test_db();
        let issue = make_issue("task_backlog", "c1", IssueState::Monitoring);
        db.insert_issue(&issue).expect("insert");
        assert!(!dismiss_issue(&db, &issue.id, "ops", None).expect("dismiss"));
    }

    fn monitoring_issue(db: &PulseDb, scope_id: &str) -> crate::types::Issue {
        let mut issue = make_issue("task_backlog", scope_id, IssueState::Monitoring);
        let now = Utc::now();
        issue.resolved_at = Some(now - Duration::days(10));
        issue.monitoring_until = Some(now + Duration::days(80));
        db.insert_issue(&issue).expect("insert");
        issue
    }

    #[test]
    fn test_regression_reopens_on_count() {
        let db = test_db();
        let locks = JobLocks::new();
        let issue = monitoring_issue(&db, "c1");
        for i in 0..3 {
            db.insert_signal(&negative_signal(&format!("t{i}"), 0.3))
                .expect("insert");
        }

        let report = check_regressions(&db, &locks).expect("sweep");
        assert_eq!(report.checked, 1);
        assert_eq!(report.regressed, vec![issue.id.clone()]);
        assert_eq!(report.closed, 0);

        let loaded = db.get_issue(&issue.id).expect("get").expect("present");
        assert_eq!(loaded.state, IssueState::Surfaced);
        assert_eq!(loaded.regression_count, 1);
        assert!(loaded.last_regression_at.is_some());
        assert!(loaded.resolved_at.is_none());
        assert!(loaded.monitoring_until.is_none());
    }

    #[test]
    fn test_regression_reopens_on_magnitude() {
        let db = test_db();
        let locks = JobLocks::new();
        let issue = monitoring_issue(&db, "c1");
        // Two fresh signals, below the count trigger but over 1.5 weighted
        db.insert_signal(&negative_signal("t1", 0.9)).expect("insert");
        db.insert_signal(&negative_signal("t2", 0.9)).expect("insert");

        let report = check_regressions(&db, &locks).expect("sweep");
        assert_eq!(report.regressed, vec![issue.id]);
    }

    #[test]
    fn test_quiet_monitoring_issue_left_alone() {
        let db = test_db();
        let locks = JobLocks::new();
        let issue = monitoring_issue(&db, "c1");
        db.insert_signal(&negative_signal("t1", 0.3)).expect("insert");

        let report = check_regressions(&db, &locks).expect("sweep");
        assert!(report.regressed.is_empty());
        assert_eq!(report.closed, 0);
        let loaded = db.get_issue(&issue.id).expect("get").expect("present");
        assert_eq!(loaded.state, IssueState::Monitoring);
    }

    #[test]
    fn test_elapsed_monitoring_window_closes() {
        let db = test_db();
        let locks = JobLocks::new();
        let mut issue = make_issue("task_backlog", "c1", IssueState::Monitoring);
        let now = Utc::now();
        issue.resolved_at = Some(now - Duration::days(100));
        issue.monitoring_until = Some(now - Duration::days(10));
        db.insert_issue(&issue).expect("insert");
        // Fresh signals do not matter once the window has elapsed
        db.insert_signal(&negative_signal("t1", 1.0)).expect("insert");
        db.insert_signal(&negative_signal("t2", 1.0)).expect("insert");
        db.insert_signal(&negative_signal("t3", 1.0)).expect("insert");

        let report = check_regressions(&db, &locks).expect("sweep");
        assert_eq!(report.closed, 1);
        assert!(report.regressed.is_empty());
        let loaded = db.get_issue(&issue.id).expect("get").expect("present");
        assert_eq!(loaded.state, IssueState::Closed);
        assert!(loaded.closed_at.is_some());
    }

    #[test]
    fn test_resolution_check_balances_out() {
        let db = test_db();
        let locks = JobLocks::new();
        let issue = make_issue("task_backlog", "c1", IssueState::Addressing);
        db.insert_issue(&issue).expect("insert");

        // One negative, one stronger positive: net score ≥ 0
        db.insert_signal(&negative_signal("t1", 0.3)).expect("insert");
        let mut positive = negative_signal("t2", 0.8);
        positive.valence = crate::types::Valence::Positive;
        positive.signal_type = "task_completed".to_string();
        db.insert_signal(&positive).expect("insert");

        let report = run_resolution_check(&db, &locks).expect("sweep");
        assert_eq!(report.checked, 1);
        assert_eq!(report.auto_resolved, vec![issue.id.clone()]);

        let loaded = db.get_issue(&issue.id).expect("get").expect("present");
        assert_eq!(loaded.state, IssueState::Monitoring);
        assert_eq!(loaded.resolution_method.as_deref(), Some("signals_balanced"));
    }

    #[test]
    fn test_resolution_check_keeps_net_negative_open() {
        let db = test_db();
        let locks = JobLocks::new();
        let issue = make_issue("task_backlog", "c1", IssueState::Addressing);
        db.insert_issue(&issue).expect("insert");
        db.insert_signal(&negative_signal("t1", 0.8)).expect("insert");

        let report = run_resolution_check(&db, &locks).expect("sweep");
        assert!(report.auto_resolved.is_empty());
        let loaded = db.get_issue(&issue.id).expect("get").expect("present");
        assert_eq!(loaded.state, IssueState::Addressing);
    }

    #[test]
    fn test_resolution_check_ignores_empty_balance() {
        let db = test_db();
        let locks = JobLocks::new();
        // Formation just consumed every negative in scope: live balance is
        // net-0 with nothing positive in it. That is not recovery.
        let issue = make_issue("task_backlog", "c1", IssueState::Addressing);
        db.insert_issue(&issue).expect("insert");

        let report = run_resolution_check(&db, &locks).expect("sweep");
        assert_eq!(report.checked, 1);
        assert!(report.auto_resolved.is_empty());
        let loaded = db.get_issue(&issue.id).expect("get").expect("present");
        assert_eq!(loaded.state, IssueState::Addressing);
        assert!(loaded.resolution_method.is_none());
    }

    #[test]
    fn test_sweep_lock_refused() {
        let db = test_db();
        let locks = JobLocks::new();
        let _held = locks.try_begin("regression_check").expect("hold");
        assert!(matches!(
            check_regressions(&db, &locks),
            Err(EngineError::SweepAlreadyRunning("regression_check"))
        ));
    }
}
