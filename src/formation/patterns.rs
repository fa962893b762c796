//! Declarative issue patterns.
//!
//! Pure configuration — nothing here touches the database. The registry is
//! constructed explicitly and handed to the formation service; there is no
//! module-level pattern list.

use crate::db::FormationGroup;
use crate::types::{ScopeLevel, Severity};

/// One threshold rule in a pattern's ordered severity ladder. Every set
/// predicate must hold; the first matching rule wins.
#[derive(Debug, Clone)]
pub struct SeverityRule {
    pub severity: Severity,
    pub min_negative_magnitude: Option<f64>,
    pub min_signal_count: Option<usize>,
    pub min_category_count: Option<usize>,
}

impl SeverityRule {
    pub fn matches(&self, group: &FormationGroup) -> bool {
        if let Some(min) = self.min_negative_magnitude {
            if group.balance.negative_magnitude < min {
                return false;
            }
        }
        if let Some(min) = self.min_signal_count {
            if group.signal_count < min {
                return false;
            }
        }
        if let Some(min) = self.min_category_count {
            if group.category_count < min {
                return false;
            }
        }
        true
    }
}

/// Declarative rule set defining when signals constitute an issue, at what
/// severity, with what recommended action.
#[derive(Debug, Clone)]
pub struct IssuePattern {
    pub issue_type: String,
    pub issue_subtype: String,
    pub scope_level: ScopeLevel,
    pub required_signal_types: Vec<String>,
    pub optional_signal_types: Vec<String>,
    pub min_signal_count: usize,
    pub min_negative_magnitude: f64,
    pub severity_rules: Vec<SeverityRule>,
    pub headline_template: String,
    pub recommended_action_template: String,
    pub owner_role: String,
    pub urgency: String,
}

impl IssuePattern {
    /// Required plus optional types, in declaration order.
    pub fn all_signal_types(&self) -> Vec<String> {
        self.required_signal_types
            .iter()
            .chain(self.optional_signal_types.iter())
            .cloned()
            .collect()
    }

    /// First severity rule whose predicates all hold. Groups matching no
    /// rule fall back to Medium — intentional legacy behavior, do not
    /// change without migrating existing patterns.
    pub fn classify_severity(&self, group: &FormationGroup) -> Severity {
        self.severity_rules
            .iter()
            .find(|rule| rule.matches(group))
            .map(|rule| rule.severity)
            .unwrap_or(Severity::Medium)
    }
}

/// The shipped pattern set: delivery, finance, and communication risk.
pub fn default_patterns() -> Vec<IssuePattern> {
    vec![
        IssuePattern {
            issue_type: "delivery_risk".to_string(),
            issue_subtype: "project_task_backlog".to_string(),
            scope_level: ScopeLevel::Project,
            required_signal_types: vec!["task_overdue".to_string()],
            optional_signal_types: vec!["task_approaching_due".to_string()],
            min_signal_count: 3,
            min_negative_magnitude: 1.5,
            severity_rules: vec![
                SeverityRule {
                    severity: Severity::Critical,
                    min_negative_magnitude: Some(4.0),
                    min_signal_count: Some(6),
                    min_category_count: None,
                },
                SeverityRule {
                    severity: Severity::High,
                    min_negative_magnitude: Some(2.5),
                    min_signal_count: None,
                    min_category_count: None,
                },
                SeverityRule {
                    severity: Severity::Medium,
                    min_negative_magnitude: None,
                    min_signal_count: None,
                    min_category_count: None,
                },
            ],
            headline_template: "{scope_name}: {overdue_count} overdue tasks piling up".to_string(),
            recommended_action_template:
                "Re-plan {scope_name} workload with the delivery lead".to_string(),
            owner_role: "project_manager".to_string(),
            urgency: "this_week".to_string(),
        },
        IssuePattern {
            issue_type: "delivery_risk".to_string(),
            issue_subtype: "client_delivery_slip".to_string(),
            scope_level: ScopeLevel::Client,
            required_signal_types: vec!["task_overdue".to_string()],
            optional_signal_types: vec![],
            min_signal_count: 3,
            min_negative_magnitude: 2.0,
            severity_rules: vec![
                SeverityRule {
                    severity: Severity::Critical,
                    min_negative_magnitude: Some(5.0),
                    min_signal_count: None,
                    min_category_count: None,
                },
                SeverityRule {
                    severity: Severity::High,
                    min_negative_magnitude: Some(2.5),
                    min_signal_count: None,
                    min_category_count: None,
                },
            ],
            headline_template:
                "{scope_name} delivery slipping: {overdue_count} tasks overdue".to_string(),
            recommended_action_template:
                "Review {scope_name} delivery plan before the next status call".to_string(),
            owner_role: "account_lead".to_string(),
            urgency: "today".to_string(),
        },
        IssuePattern {
            issue_type: "payment_risk".to_string(),
            issue_subtype: "client_receivables".to_string(),
            scope_level: ScopeLevel::Client,
            required_signal_types: vec!["invoice_overdue".to_string()],
            optional_signal_types: vec!["invoice_large_outstanding".to_string()],
            min_signal_count: 1,
            min_negative_magnitude: 0.5,
            severity_rules: vec![
                SeverityRule {
                    severity: Severity::Critical,
                    min_negative_magnitude: Some(2.0),
                    min_signal_count: None,
                    min_category_count: None,
                },
                SeverityRule {
                    severity: Severity::High,
                    min_negative_magnitude: Some(1.0),
                    min_signal_count: None,
                    min_category_count: None,
                },
                SeverityRule {
                    severity: Severity::Low,
                    min_negative_magnitude: None,
                    min_signal_count: Some(1),
                    min_category_count: None,
                },
            ],
            headline_template: "{scope_name} has invoices {bucket} days overdue".to_string(),
            recommended_action_template:
                "Chase outstanding invoices for {scope_name}".to_string(),
            owner_role: "finance".to_string(),
            urgency: "this_week".to_string(),
        },
        IssuePattern {
            issue_type: "relationship_risk".to_string(),
            issue_subtype: "client_gone_quiet".to_string(),
            scope_level: ScopeLevel::Client,
            required_signal_types: vec!["client_comms_gap".to_string()],
            optional_signal_types: vec!["task_overdue".to_string()],
            min_signal_count: 1,
            min_negative_magnitude: 0.3,
            severity_rules: vec![
                SeverityRule {
                    severity: Severity::High,
                    min_negative_magnitude: Some(1.0),
                    min_signal_count: None,
                    min_category_count: Some(2),
                },
                SeverityRule {
                    severity: Severity::Medium,
                    min_negative_magnitude: Some(0.5),
                    min_signal_count: None,
                    min_category_count: None,
                },
                SeverityRule {
                    severity: Severity::Low,
                    min_negative_magnitude: None,
                    min_signal_count: None,
                    min_category_count: None,
                },
            ],
            headline_template: "{scope_name} has gone quiet ({gap_days}+ days)".to_string(),
            recommended_action_template: "Check in with {scope_name}".to_string(),
            owner_role: "account_lead".to_string(),
            urgency: "this_week".to_string(),
        },
    ]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalBalance;

    fn group(negative_magnitude: f64, signal_count: usize, category_count: usize) -> FormationGroup {
        FormationGroup {
            scope_id: "c1".to_string(),
            signal_count,
            category_count,
            balance: SignalBalance {
                negative_magnitude,
                net_score: -negative_magnitude,
                negative_count: signal_count as i64,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn pattern() -> IssuePattern {
        default_patterns()
            .into_iter()
            .find(|p| p.issue_subtype == "project_task_backlog")
            .expect("shipped pattern")
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let p = pattern();
        assert_eq!(p.classify_severity(&group(4.5, 7, 1)), Severity::Critical);
        assert_eq!(p.classify_severity(&group(3.0, 4, 1)), Severity::High);
        assert_eq!(p.classify_severity(&group(1.6, 3, 1)), Severity::Medium);
    }

    #[test]
    fn test_all_predicates_must_hold() {
        let p = pattern();
        // Magnitude qualifies for critical but count does not
        assert_eq!(p.classify_severity(&group(4.5, 3, 1)), Severity::High);
    }

    #[test]
    fn test_unmatched_rules_default_medium() {
        let p = default_patterns()
            .into_iter()
            .find(|p| p.issue_subtype == "client_delivery_slip")
            .expect("pattern");
        // Below every rule threshold: falls back to Medium
        assert_eq!(p.classify_severity(&group(2.2, 3, 1)), Severity::Medium);
    }

    #[test]
    fn test_all_signal_types_order() {
        let p = pattern();
        assert_eq!(
            p.all_signal_types(),
            vec!["task_overdue".to_string(), "task_approaching_due".to_string()]
        );
    }

    #[test]
    fn test_category_count_predicate() {
        let p = default_patterns()
            .into_iter()
            .find(|p| p.issue_subtype == "client_gone_quiet")
            .expect("pattern");
        assert_eq!(p.classify_severity(&group(1.2, 2, 2)), Severity::High);
        // Same magnitude, single category: the two-category rule is skipped
        assert_eq!(p.classify_severity(&group(1.2, 2, 1)), Severity::Medium);
    }
}
