//! Issue formation: matches aggregated signals against declarative patterns
//! and creates or updates issues.
//!
//! `run_formation` is an idempotent batch sweep. Each pattern is its own
//! failure domain; each qualifying scope group is processed in one
//! transaction so the issue write and signal consumption land together.

pub mod headline;
pub mod patterns;

use std::collections::HashMap;

use chrono::Utc;
use uuid::Uuid;

use crate::db::{DbError, FormationGroup, PulseDb};
use crate::error::EngineError;
use crate::jobs::JobLocks;
use crate::scope::ScopeResolver;
use crate::signals::decay::age_days;
use crate::signals::magnitude::overdue_bucket;
use crate::types::{
    Issue, IssueState, ScopeLevel, Severity, Signal, StateHistoryEntry, Trajectory,
};

pub use patterns::{default_patterns, IssuePattern, SeverityRule};

/// Priority above which a freshly created issue surfaces immediately
/// instead of waiting in "detected". Shares no derivation with the
/// severity base scores or scope multipliers; treat as a tuned cutoff.
pub const SURFACE_PRIORITY_THRESHOLD: f64 = 50.0;

/// Scope weight in the priority formula: broader scopes outrank narrower
/// ones for the same severity.
pub fn scope_multiplier(level: ScopeLevel) -> f64 {
    match level {
        ScopeLevel::Task => 0.5,
        ScopeLevel::Project => 1.0,
        ScopeLevel::Retainer => 1.2,
        ScopeLevel::Brand => 1.5,
        ScopeLevel::Client => 2.0,
    }
}

/// severity_base × scope_multiplier × (1 + 0.1 × negative_magnitude)
pub fn priority_score(severity: Severity, level: ScopeLevel, negative_magnitude: f64) -> f64 {
    severity.base_score() * scope_multiplier(level) * (1.0 + 0.1 * negative_magnitude)
}

/// Outcome of one formation sweep.
#[derive(Debug, Default)]
pub struct FormationReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: Vec<String>,
}

enum GroupOutcome {
    Created,
    Updated,
}

/// Consumes aggregated signals per pattern and forms issues. Patterns are
/// passed in at construction — no ambient registry.
pub struct FormationService {
    patterns: Vec<IssuePattern>,
}

impl FormationService {
    pub fn new(patterns: Vec<IssuePattern>) -> Self {
        Self { patterns }
    }

    pub fn with_default_patterns() -> Self {
        Self::new(default_patterns())
    }

    /// Run one formation pass over every pattern.
    pub fn run_formation(
        &self,
        db: &PulseDb,
        scopes: &dyn ScopeResolver,
        locks: &JobLocks,
    ) -> Result<FormationReport, EngineError> {
        let _guard = locks
            .try_begin("formation")
            .ok_or(EngineError::SweepAlreadyRunning("formation"))?;

        let mut report = FormationReport::default();
        for pattern in &self.patterns {
            if let Err(e) = self.process_pattern(db, scopes, pattern, &mut report) {
                log::warn!("Pattern {} failed: {}", pattern.issue_subtype, e);
                report
                    .errors
                    .push(format!("{}: {}", pattern.issue_subtype, e));
            }
        }

        log::info!(
            "Formation pass: {} created, {} updated, {} unchanged, {} error(s)",
            report.created,
            report.updated,
            report.unchanged,
            report.errors.len()
        );
        Ok(report)
    }

    fn process_pattern(
        &self,
        db: &PulseDb,
        scopes: &dyn ScopeResolver,
        pattern: &IssuePattern,
        report: &mut FormationReport,
    ) -> Result<(), DbError> {
        let open_before = db.count_open_issues_for_subtype(&pattern.issue_subtype)?;
        let groups = db.find_for_issue_formation(
            &pattern.all_signal_types(),
            pattern.scope_level,
            pattern.min_signal_count,
            pattern.min_negative_magnitude,
        )?;

        let mut updated_here = 0;
        for group in &groups {
            match self.process_signal_group(db, scopes, pattern, group) {
                Ok(GroupOutcome::Created) => report.created += 1,
                Ok(GroupOutcome::Updated) => {
                    report.updated += 1;
                    updated_here += 1;
                }
                Err(e) => {
                    report.errors.push(format!(
                        "{} @ {}: {}",
                        pattern.issue_subtype, group.scope_id, e
                    ));
                }
            }
        }

        // Open issues this pattern did not touch on this pass
        report.unchanged += open_before.saturating_sub(updated_here);
        Ok(())
    }

    fn process_signal_group(
        &self,
        db: &PulseDb,
        scopes: &dyn ScopeResolver,
        pattern: &IssuePattern,
        group: &FormationGroup,
    ) -> Result<GroupOutcome, DbError> {
        let severity = pattern.classify_severity(group);
        let priority = priority_score(severity, pattern.scope_level, group.balance.negative_magnitude);
        let contributing = self.group_signals(db, group);
        let ctx = headline_context(scopes, pattern, group, &contributing);
        let headline_text = headline::render(&pattern.headline_template, &ctx);
        let action = headline::render(&pattern.recommended_action_template, &ctx);

        if let Some(mut issue) = db.find_open_issue(&pattern.issue_subtype, &group.scope_id)? {
            let prior = issue.balance.negative_magnitude;
            let current = group.balance.negative_magnitude;
            issue.trajectory = if current > prior * 1.1 {
                Trajectory::Worsening
            } else if current < prior * 0.9 {
                Trajectory::Improving
            } else {
                Trajectory::Stable
            };
            issue.balance = group.balance;
            issue.severity = severity;
            issue.priority_score = priority;
            // A detected issue whose refreshed priority crosses the
            // threshold surfaces now; this is the only way out of detected
            if issue.state == IssueState::Detected && priority > SURFACE_PRIORITY_THRESHOLD {
                issue.state = IssueState::Surfaced;
                issue.surfaced_at = Some(Utc::now());
                issue
                    .state_history
                    .push(StateHistoryEntry::now("surfaced", "formation"));
            }
            issue.headline = headline_text;
            issue.recommended_action = Some(action);
            for id in &group.signal_ids {
                if !issue.signal_ids.contains(id) {
                    issue.signal_ids.push(id.clone());
                }
            }

            db.with_transaction(|db| {
                db.save_issue(&issue)?;
                db.mark_signals_consumed(&group.signal_ids, &issue.id)?;
                Ok(())
            })?;
            Ok(GroupOutcome::Updated)
        } else {
            let now = Utc::now();
            let (state, surfaced_at) = if priority > SURFACE_PRIORITY_THRESHOLD {
                (IssueState::Surfaced, Some(now))
            } else {
                // Invisible until a later pass raises priority or someone
                // inspects detected-state issues directly
                (IssueState::Detected, None)
            };

            let ancestors = contributing
                .first()
                .map(|signal| signal.scope.clone())
                .unwrap_or_default();
            let issue = Issue {
                id: format!("iss-{}", Uuid::new_v4()),
                issue_type: pattern.issue_type.clone(),
                issue_subtype: pattern.issue_subtype.clone(),
                scope_level: pattern.scope_level,
                scope_id: group.scope_id.clone(),
                scope_project_id: ancestors.project_id,
                scope_retainer_id: ancestors.retainer_id,
                scope_brand_id: ancestors.brand_id,
                scope_client_id: ancestors.client_id,
                headline: headline_text,
                severity,
                priority_score: priority,
                trajectory: Trajectory::Stable,
                signal_ids: group.signal_ids.clone(),
                balance: group.balance,
                recommended_action: Some(action),
                owner_role: Some(pattern.owner_role.clone()),
                urgency: Some(pattern.urgency.clone()),
                state,
                regression_count: 0,
                state_history: vec![StateHistoryEntry::now(state.as_str(), "formation")],
                detected_at: now,
                surfaced_at,
                acknowledged_at: None,
                addressing_started_at: None,
                resolved_at: None,
                resolution_method: None,
                resolution_notes: None,
                monitoring_until: None,
                closed_at: None,
                last_regression_at: None,
                created_at: now,
                updated_at: now,
            };

            db.with_transaction(|db| {
                db.insert_issue(&issue)?;
                db.mark_signals_consumed(&group.signal_ids, &issue.id)?;
                Ok(())
            })?;
            Ok(GroupOutcome::Created)
        }
    }

    /// Contributing signal rows for a group. The group shares the matched
    /// scope, so any member's chain carries the ancestor levels; rows
    /// missing mid-sweep are skipped.
    fn group_signals(&self, db: &PulseDb, group: &FormationGroup) -> Vec<Signal> {
        group
            .signal_ids
            .iter()
            .filter_map(|id| db.get_signal(id).ok().flatten())
            .collect()
    }
}

/// Placeholder values derivable from a signal group and its contributing
/// rows. Everything the group cannot supply renders its neutral default.
fn headline_context(
    scopes: &dyn ScopeResolver,
    pattern: &IssuePattern,
    group: &FormationGroup,
    signals: &[Signal],
) -> HashMap<&'static str, String> {
    let now = Utc::now();
    let mut ctx = HashMap::new();
    if let Some(name) = scopes.scope_name(pattern.scope_level, &group.scope_id) {
        ctx.insert("scope_name", name);
    }

    let overdue: usize = group
        .type_counts
        .iter()
        .filter(|(t, _)| t.ends_with("_overdue"))
        .map(|(_, n)| n)
        .sum();
    if overdue > 0 {
        ctx.insert("overdue_count", overdue.to_string());
    }
    if let Some(n) = group.type_counts.get("task_approaching_due") {
        ctx.insert("approaching_count", n.to_string());
    }

    // Quiet-spell length: comms-gap signals date occurred_at to the last
    // message, so the oldest one measures the silence
    let gap_days = signals
        .iter()
        .filter(|s| s.signal_type == "client_comms_gap")
        .map(|s| age_days(s.occurred_at, now) as i64)
        .max();
    if let Some(days) = gap_days {
        ctx.insert("gap_days", days.to_string());
    }

    // Receivables age band: invoice signals date occurred_at to the due date
    let invoice_age = signals
        .iter()
        .filter(|s| s.signal_type.starts_with("invoice_"))
        .map(|s| age_days(s.occurred_at, now) as i64)
        .max();
    if let Some(days) = invoice_age {
        ctx.insert("bucket", overdue_bucket(days).to_string());
    }
    ctx
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
