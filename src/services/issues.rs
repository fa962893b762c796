//! Issue facade: queries plus the four manual lifecycle mutations.

use crate::db::{IssueFilter, PulseDb};
use crate::error::EngineError;
use crate::resolution;
use crate::types::Issue;

pub fn get_issue(db: &PulseDb, id: &str) -> Result<Option<Issue>, EngineError> {
    Ok(db.get_issue(id)?)
}

pub fn list_issues(db: &PulseDb, filter: &IssueFilter) -> Result<Vec<Issue>, EngineError> {
    Ok(db.list_issues(filter)?)
}

/// Surfaced → acknowledged. False when the issue is missing or the
/// transition is not allowed from its current state.
pub fn acknowledge(db: &PulseDb, id: &str, actor: &str) -> Result<bool, EngineError> {
    Ok(resolution::acknowledge_issue(db, id, actor)?)
}

pub fn start_addressing(db: &PulseDb, id: &str, actor: &str) -> Result<bool, EngineError> {
    Ok(resolution::start_addressing(db, id, actor)?)
}

pub fn resolve(
    db: &PulseDb,
    id: &str,
    method: &str,
    resolved_by: &str,
    notes: Option<&str>,
) -> Result<bool, EngineError> {
    Ok(resolution::resolve_issue(db, id, method, resolved_by, notes)?)
}

pub fn dismiss(
    db: &PulseDb,
    id: &str,
    actor: &str,
    notes: Option<&str>,
) -> Result<bool, EngineError> {
    Ok(resolution::dismiss_issue(db, id, actor, notes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::issues::test_fixtures::make_issue;
    use crate::db::test_utils::test_db;
    use crate::types::IssueState;

    #[test]
    fn test_full_manual_lifecycle() {
        let db = test_db();
        let issue = make_issue("task_backlog", "c1", IssueState::Surfaced);
        db.insert_issue(&issue).expect("insert");

        assert!(acknowledge(&db, &issue.id, "ops").expect("ack"));
        assert!(start_addressing(&db, &issue.id, "ops").expect("start"));
        assert!(resolve(&db, &issue.id, "manual", "ops", None).expect("resolve"));

        let loaded = get_issue(&db, &issue.id).expect("get").expect("present");
        assert_eq!(loaded.state, IssueState::Monitoring);
    }

    #[test]
    fn test_list_by_state() {
        let db = test_db();
        db.insert_issue(&make_issue("a", "c1", IssueState::Surfaced))
            .expect("insert");
        db.insert_issue(&make_issue("b", "c2", IssueState::Closed))
            .expect("insert");

        let surfaced = list_issues(
            &db,
            &IssueFilter {
                state: Some(IssueState::Surfaced),
                ..Default::default()
            },
        )
        .expect("list");
        assert_eq!(surfaced.len(), 1);
        assert_eq!(surfaced[0].scope_id, "c1");
    }
}
