//! Issue store. Issues are mutated in memory by the formation and
//! resolution services, then written back whole; signal_ids and
//! state_history serialize to JSON only at this boundary.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Row};

use super::{DbError, PulseDb};
use crate::signals::decay::parse_ts;
use crate::types::{
    Issue, IssueState, ScopeLevel, Severity, SignalBalance, StateHistoryEntry, Trajectory,
};

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const ISSUE_COLUMNS: &str = "id, issue_type, issue_subtype, scope_level, scope_id,
    scope_project_id, scope_retainer_id, scope_brand_id, scope_client_id,
    headline, severity, priority_score, trajectory, signal_ids,
    negative_count, neutral_count, positive_count,
    negative_magnitude, positive_magnitude, net_score,
    recommended_action, owner_role, urgency,
    state, regression_count, state_history,
    detected_at, surfaced_at, acknowledged_at, addressing_started_at,
    resolved_at, resolution_method, resolution_notes, monitoring_until,
    closed_at, last_regression_at, created_at, updated_at";

fn ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    Ok(parse_ts(&raw).unwrap_or(DateTime::<Utc>::MIN_UTC))
}

fn opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(parse_ts))
}

fn issue_from_row(row: &Row) -> rusqlite::Result<Issue> {
    let scope_level: String = row.get(3)?;
    let severity: String = row.get(10)?;
    let trajectory: String = row.get(12)?;
    let signal_ids_json: String = row.get(13)?;
    let state: String = row.get(23)?;
    let history_json: String = row.get(25)?;

    Ok(Issue {
        id: row.get(0)?,
        issue_type: row.get(1)?,
        issue_subtype: row.get(2)?,
        scope_level: ScopeLevel::from_str_lossy(&scope_level),
        scope_id: row.get(4)?,
        scope_project_id: row.get(5)?,
        scope_retainer_id: row.get(6)?,
        scope_brand_id: row.get(7)?,
        scope_client_id: row.get(8)?,
        headline: row.get(9)?,
        severity: Severity::from_str_lossy(&severity),
        priority_score: row.get(11)?,
        trajectory: Trajectory::from_str_lossy(&trajectory),
        signal_ids: serde_json::from_str(&signal_ids_json).unwrap_or_default(),
        balance: SignalBalance {
            negative_count: row.get(14)?,
            neutral_count: row.get(15)?,
            positive_count: row.get(16)?,
            negative_magnitude: row.get(17)?,
            positive_magnitude: row.get(18)?,
            net_score: row.get(19)?,
        },
        recommended_action: row.get(20)?,
        owner_role: row.get(21)?,
        urgency: row.get(22)?,
        state: IssueState::from_str_lossy(&state),
        regression_count: row.get(24)?,
        state_history: serde_json::from_str::<Vec<StateHistoryEntry>>(&history_json)
            .unwrap_or_default(),
        detected_at: ts(row, 26)?,
        surfaced_at: opt_ts(row, 27)?,
        acknowledged_at: opt_ts(row, 28)?,
        addressing_started_at: opt_ts(row, 29)?,
        resolved_at: opt_ts(row, 30)?,
        resolution_method: row.get(31)?,
        resolution_notes: row.get(32)?,
        monitoring_until: opt_ts(row, 33)?,
        closed_at: opt_ts(row, 34)?,
        last_regression_at: opt_ts(row, 35)?,
        created_at: ts(row, 36)?,
        updated_at: ts(row, 37)?,
    })
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Facade-level issue listing filter.
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub state: Option<IssueState>,
    pub scope: Option<(ScopeLevel, String)>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ---------------------------------------------------------------------------
// Store operations
// ---------------------------------------------------------------------------

impl PulseDb {
    /// Insert a freshly formed issue.
    pub fn insert_issue(&self, issue: &Issue) -> Result<(), DbError> {
        let signal_ids = serde_json::to_string(&issue.signal_ids)?;
        let history = serde_json::to_string(&issue.state_history)?;
        self.conn_ref().execute(
            &format!(
                "INSERT INTO issues ({ISSUE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28,
                         ?29, ?30, ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38)"
            ),
            params![
                issue.id,
                issue.issue_type,
                issue.issue_subtype,
                issue.scope_level.as_str(),
                issue.scope_id,
                issue.scope_project_id,
                issue.scope_retainer_id,
                issue.scope_brand_id,
                issue.scope_client_id,
                issue.headline,
                issue.severity.as_str(),
                issue.priority_score,
                issue.trajectory.as_str(),
                signal_ids,
                issue.balance.negative_count,
                issue.balance.neutral_count,
                issue.balance.positive_count,
                issue.balance.negative_magnitude,
                issue.balance.positive_magnitude,
                issue.balance.net_score,
                issue.recommended_action,
                issue.owner_role,
                issue.urgency,
                issue.state.as_str(),
                issue.regression_count,
                history,
                issue.detected_at.to_rfc3339(),
                issue.surfaced_at.map(|t| t.to_rfc3339()),
                issue.acknowledged_at.map(|t| t.to_rfc3339()),
                issue.addressing_started_at.map(|t| t.to_rfc3339()),
                issue.resolved_at.map(|t| t.to_rfc3339()),
                issue.resolution_method,
                issue.resolution_notes,
                issue.monitoring_until.map(|t| t.to_rfc3339()),
                issue.closed_at.map(|t| t.to_rfc3339()),
                issue.last_regression_at.map(|t| t.to_rfc3339()),
                issue.created_at.to_rfc3339(),
                issue.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Write back every mutable column of an issue (identity and creation
    /// columns stay untouched). Issues are never deleted.
    pub fn save_issue(&self, issue: &Issue) -> Result<(), DbError> {
        let signal_ids = serde_json::to_string(&issue.signal_ids)?;
        let history = serde_json::to_string(&issue.state_history)?;
        self.conn_ref().execute(
            "UPDATE issues SET
                headline = ?2, severity = ?3, priority_score = ?4, trajectory = ?5,
                signal_ids = ?6,
                negative_count = ?7, neutral_count = ?8, positive_count = ?9,
                negative_magnitude = ?10, positive_magnitude = ?11, net_score = ?12,
                recommended_action = ?13, owner_role = ?14, urgency = ?15,
                state = ?16, regression_count = ?17, state_history = ?18,
                surfaced_at = ?19, acknowledged_at = ?20, addressing_started_at = ?21,
                resolved_at = ?22, resolution_method = ?23, resolution_notes = ?24,
                monitoring_until = ?25, closed_at = ?26, last_regression_at = ?27,
                updated_at = ?28
             WHERE id = ?1",
            params![
                issue.id,
                issue.headline,
                issue.severity.as_str(),
                issue.priority_score,
                issue.trajectory.as_str(),
                signal_ids,
                issue.balance.negative_count,
                issue.balance.neutral_count,
                issue.balance.positive_count,
                issue.balance.negative_magnitude,
                issue.balance.positive_magnitude,
                issue.balance.net_score,
                issue.recommended_action,
                issue.owner_role,
                issue.urgency,
                issue.state.as_str(),
                issue.regression_count,
                history,
                issue.surfaced_at.map(|t| t.to_rfc3339()),
                issue.acknowledged_at.map(|t| t.to_rfc3339()),
                issue.addressing_started_at.map(|t| t.to_rfc3339()),
                issue.resolved_at.map(|t| t.to_rfc3339()),
                issue.resolution_method,
                issue.resolution_notes,
                issue.monitoring_until.map(|t| t.to_rfc3339()),
                issue.closed_at.map(|t| t.to_rfc3339()),
                issue.last_regression_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch one issue by id.
    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>, DbError> {
        match self.conn_ref().query_row(
            &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1"),
            params![id],
            issue_from_row,
        ) {
            Ok(issue) => Ok(Some(issue)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Sqlite(e)),
        }
    }

    /// The open-issue uniqueness lookup: at most one issue per
    /// (subtype, scope_id) is in a non-terminal, non-monitoring state.
    pub fn find_open_issue(
        &self,
        issue_subtype: &str,
        scope_id: &str,
    ) -> Result<Option<Issue>, DbError> {
        match self.conn_ref().query_row(
            &format!(
                "SELECT {ISSUE_COLUMNS} FROM issues
                 WHERE issue_subtype = ?1 AND scope_id = ?2
                   AND state IN ('detected', 'surfaced', 'acknowledged', 'addressing')
                 ORDER BY created_at DESC LIMIT 1"
            ),
            params![issue_subtype, scope_id],
            issue_from_row,
        ) {
            Ok(issue) => Ok(Some(issue)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Sqlite(e)),
        }
    }

    /// All issues currently in one state. Drives the batch sweeps.
    pub fn find_issues_in_state(&self, state: IssueState) -> Result<Vec<Issue>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE state = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![state.as_str()], issue_from_row)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }

    /// Count of open issues per subtype, used to report "unchanged" patterns.
    pub fn count_open_issues_for_subtype(&self, issue_subtype: &str) -> Result<usize, DbError> {
        let count: i64 = self.conn_ref().query_row(
            "SELECT COUNT(*) FROM issues
             WHERE issue_subtype = ?1
               AND state IN ('detected', 'surfaced', 'acknowledged', 'addressing')",
            params![issue_subtype],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Facade listing with pagination.
    pub fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>, DbError> {
        let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE 1=1");
        let mut args: Vec<String> = Vec::new();

        if let Some(state) = filter.state {
            args.push(state.as_str().to_string());
            sql.push_str(&format!(" AND state = ?{}", args.len()));
        }
        if let Some((level, ref scope_id)) = filter.scope {
            args.push(scope_id.clone());
            if level == ScopeLevel::Task {
                // Issues carry no task ancestor column; tasks only ever
                // match as the formation scope itself
                sql.push_str(&format!(" AND scope_id = ?{}", args.len()));
            } else {
                // Match issues formed at that level or carrying it as an
                // ancestor
                sql.push_str(&format!(
                    " AND (scope_id = ?{n} OR {} = ?{n})",
                    level.column(),
                    n = args.len()
                ));
            }
        }

        sql.push_str(" ORDER BY priority_score DESC, created_at DESC");
        if let Some(limit) = filter.limit {
            args.push(limit.to_string());
            sql.push_str(&format!(" LIMIT ?{}", args.len()));
            if let Some(offset) = filter.offset {
                args.push(offset.to_string());
                sql.push_str(&format!(" OFFSET ?{}", args.len()));
            }
        }

        let mut stmt = self.conn_ref().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), issue_from_row)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        Ok(issues)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;
    use uuid::Uuid;

    /// A minimal client-scoped issue in the given state.
    pub(crate) fn make_issue(subtype: &str, scope_id: &str, state: IssueState) -> Issue {
        let now = Utc::now();
        Issue {
            id: format!("iss-{}", Uuid::new_v4()),
            issue_type: "delivery_risk".to_string(),
            issue_subtype: subtype.to_string(),
            scope_level: ScopeLevel::Client,
            scope_id: scope_id.to_string(),
            scope_project_id: None,
            scope_retainer_id: None,
            scope_brand_id: None,
            scope_client_id: Some(scope_id.to_string()),
            headline: "Test issue".to_string(),
            severity: Severity::High,
            priority_score: 100.0,
            trajectory: Trajectory::Stable,
            signal_ids: vec!["sig-a".to_string()],
            balance: SignalBalance {
                negative_count: 1,
                negative_magnitude: 0.7,
                net_score: -0.7,
                ..Default::default()
            },
            recommended_action: Some("Review".to_string()),
            owner_role: Some("account_lead".to_string()),
            urgency: Some("this_week".to_string()),
            state,
            regression_count: 0,
            state_history: vec![StateHistoryEntry::now(state.as_str(), "formation")],
            detected_at: now,
            surfaced_at: None,
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
        }
    }
}
