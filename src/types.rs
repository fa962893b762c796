//! Core data model: signals, issues, scope chains, and their closed enums.
//!
//! Status/state/severity are tagged enums with exhaustive matching at every
//! transition site; the string forms exist only at the SQL boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SignalError;

// ---------------------------------------------------------------------------
// Valence
// ---------------------------------------------------------------------------

/// Direction of an observation: harmful, informational, or beneficial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Valence {
    Negative,
    Neutral,
    Positive,
}

impl Valence {
    pub fn from_i8(raw: i8) -> Result<Self, SignalError> {
        match raw {
            -1 => Ok(Valence::Negative),
            0 => Ok(Valence::Neutral),
            1 => Ok(Valence::Positive),
            other => Err(SignalError::InvalidValence(other)),
        }
    }

    pub fn as_i8(self) -> i8 {
        match self {
            Valence::Negative => -1,
            Valence::Neutral => 0,
            Valence::Positive => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Signal status
// ---------------------------------------------------------------------------

/// Lifecycle status of a signal. One-way: every status other than `Active`
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Active,
    Consumed,
    Balanced,
    Expired,
}

impl SignalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalStatus::Active => "active",
            SignalStatus::Consumed => "consumed",
            SignalStatus::Balanced => "balanced",
            SignalStatus::Expired => "expired",
        }
    }

    pub fn from_str_lossy(raw: &str) -> Self {
        match raw {
            "consumed" => SignalStatus::Consumed,
            "balanced" => SignalStatus::Balanced,
            "expired" => SignalStatus::Expired,
            _ => SignalStatus::Active,
        }
    }
}

// ---------------------------------------------------------------------------
// Signal category
// ---------------------------------------------------------------------------

/// Grouping of related signal types, derived from the type key at
/// construction. Used for distinct-category counts in severity rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalCategory {
    Delivery,
    Finance,
    Communication,
    Other,
}

impl SignalCategory {
    /// Derive the category from a signal type key.
    pub fn for_type(signal_type: &str) -> Self {
        match signal_type {
            "task_overdue" | "task_approaching_due" | "task_completed" => {
                SignalCategory::Delivery
            }
            "invoice_overdue" | "invoice_large_outstanding" => SignalCategory::Finance,
            "client_comms_gap" => SignalCategory::Communication,
            _ => SignalCategory::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalCategory::Delivery => "delivery",
            SignalCategory::Finance => "finance",
            SignalCategory::Communication => "communication",
            SignalCategory::Other => "other",
        }
    }

    pub fn from_str_lossy(raw: &str) -> Self {
        match raw {
            "delivery" => SignalCategory::Delivery,
            "finance" => SignalCategory::Finance,
            "communication" => SignalCategory::Communication,
            _ => SignalCategory::Other,
        }
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Grouping level in the task → project → retainer → brand → client chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    Task,
    Project,
    Retainer,
    Brand,
    Client,
}

impl ScopeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeLevel::Task => "task",
            ScopeLevel::Project => "project",
            ScopeLevel::Retainer => "retainer",
            ScopeLevel::Brand => "brand",
            ScopeLevel::Client => "client",
        }
    }

    pub fn from_str_lossy(raw: &str) -> Self {
        match raw {
            "task" => ScopeLevel::Task,
            "project" => ScopeLevel::Project,
            "retainer" => ScopeLevel::Retainer,
            "brand" => ScopeLevel::Brand,
            _ => ScopeLevel::Client,
        }
    }

    /// The `signals`/`issues` column holding ids at this level. Closed enum,
    /// so interpolating into SQL is safe.
    pub fn column(self) -> &'static str {
        match self {
            ScopeLevel::Task => "scope_task_id",
            ScopeLevel::Project => "scope_project_id",
            ScopeLevel::Retainer => "scope_retainer_id",
            ScopeLevel::Brand => "scope_brand_id",
            ScopeLevel::Client => "scope_client_id",
        }
    }
}

/// Resolved ancestor ids for an observed entity. A narrower scope implies
/// the broader ones, but detectors fill only what their resolver can see —
/// partially-null chains are expected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeChain {
    pub task_id: Option<String>,
    pub project_id: Option<String>,
    pub retainer_id: Option<String>,
    pub brand_id: Option<String>,
    pub client_id: Option<String>,
    pub person_id: Option<String>,
}

impl ScopeChain {
    /// The id this chain holds at a given level, if resolved.
    pub fn id_at(&self, level: ScopeLevel) -> Option<&str> {
        match level {
            ScopeLevel::Task => self.task_id.as_deref(),
            ScopeLevel::Project => self.project_id.as_deref(),
            ScopeLevel::Retainer => self.retainer_id.as_deref(),
            ScopeLevel::Brand => self.brand_id.as_deref(),
            ScopeLevel::Client => self.client_id.as_deref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// Provenance of a signal: where the detector saw the evidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSource {
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub source_url: Option<String>,
    pub source_excerpt: Option<String>,
}

/// Inputs for constructing a signal. Everything else (id, category, status,
/// timestamps) is derived in [`Signal::create`].
#[derive(Debug, Clone)]
pub struct NewSignal {
    pub signal_type: String,
    pub valence: i8,
    pub magnitude: f64,
    pub entity_type: String,
    pub entity_id: String,
    pub scope: ScopeChain,
    pub source: SignalSource,
    pub detection_confidence: f64,
    pub attribution_confidence: f64,
    pub occurred_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub detector_id: String,
    pub detector_version: String,
}

/// An atomic, timestamped, valenced observation. Immutable after creation
/// except for the status/consumption fields, which move one way.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    pub signal_type: String,
    pub category: SignalCategory,
    pub valence: Valence,
    pub magnitude: f64,
    pub entity_type: String,
    pub entity_id: String,
    pub scope: ScopeChain,
    pub source: SignalSource,
    pub detection_confidence: f64,
    pub attribution_confidence: f64,
    pub occurred_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: SignalStatus,
    pub consumed_by_issue_id: Option<String>,
    pub balanced_by_signal_id: Option<String>,
    pub detector_id: String,
    pub detector_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Signal {
    /// Validate and construct a signal. Bounds violations fail this one
    /// construction only — a detector's remaining emissions are unaffected.
    pub fn create(new: NewSignal) -> Result<Signal, SignalError> {
        let valence = Valence::from_i8(new.valence)?;
        if !(0.0..=1.0).contains(&new.magnitude) {
            return Err(SignalError::InvalidMagnitude(new.magnitude));
        }
        if !(0.0..=1.0).contains(&new.detection_confidence) {
            return Err(SignalError::InvalidConfidence(new.detection_confidence));
        }
        if !(0.0..=1.0).contains(&new.attribution_confidence) {
            return Err(SignalError::InvalidConfidence(new.attribution_confidence));
        }

        let now = Utc::now();
        let category = SignalCategory::for_type(&new.signal_type);
        Ok(Signal {
            id: format!("sig-{}", Uuid::new_v4()),
            signal_type: new.signal_type,
            category,
            valence,
            magnitude: new.magnitude,
            entity_type: new.entity_type,
            entity_id: new.entity_id,
            scope: new.scope,
            source: new.source,
            detection_confidence: new.detection_confidence,
            attribution_confidence: new.attribution_confidence,
            occurred_at: new.occurred_at,
            detected_at: now,
            expires_at: new.expires_at,
            status: SignalStatus::Active,
            consumed_by_issue_id: None,
            balanced_by_signal_id: None,
            detector_id: new.detector_id,
            detector_version: new.detector_version,
            created_at: now,
            updated_at: now,
        })
    }
}

// ---------------------------------------------------------------------------
// Issue enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Base score feeding the priority formula.
    pub fn base_score(self) -> f64 {
        match self {
            Severity::Critical => 100.0,
            Severity::High => 70.0,
            Severity::Medium => 40.0,
            Severity::Low => 20.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }

    pub fn from_str_lossy(raw: &str) -> Self {
        match raw {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "low" => Severity::Low,
            _ => Severity::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trajectory {
    Improving,
    Stable,
    Worsening,
}

impl Trajectory {
    pub fn as_str(self) -> &'static str {
        match self {
            Trajectory::Improving => "improving",
            Trajectory::Stable => "stable",
            Trajectory::Worsening => "worsening",
        }
    }

    pub fn from_str_lossy(raw: &str) -> Self {
        match raw {
            "improving" => Trajectory::Improving,
            "worsening" => Trajectory::Worsening,
            _ => Trajectory::Stable,
        }
    }
}

/// Issue lifecycle state. Closed is terminal; Monitoring can regress back
/// to Surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Detected,
    Surfaced,
    Acknowledged,
    Addressing,
    Monitoring,
    Closed,
}

impl IssueState {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueState::Detected => "detected",
            IssueState::Surfaced => "surfaced",
            IssueState::Acknowledged => "acknowledged",
            IssueState::Addressing => "addressing",
            IssueState::Monitoring => "monitoring",
            IssueState::Closed => "closed",
        }
    }

    pub fn from_str_lossy(raw: &str) -> Self {
        match raw {
            "surfaced" => IssueState::Surfaced,
            "acknowledged" => IssueState::Acknowledged,
            "addressing" => IssueState::Addressing,
            "monitoring" => IssueState::Monitoring,
            "closed" => IssueState::Closed,
            _ => IssueState::Detected,
        }
    }

    /// An issue counts as "open" for the one-per-(subtype, scope) rule when
    /// it is neither closed nor in its monitoring window.
    pub fn is_open(self) -> bool {
        match self {
            IssueState::Detected
            | IssueState::Surfaced
            | IssueState::Acknowledged
            | IssueState::Addressing => true,
            IssueState::Monitoring | IssueState::Closed => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// One entry in an issue's ordered state log. The label is free-form: state
/// transitions record the state name, but resolution writes a "resolved"
/// entry ahead of the "monitoring" one, which is not itself a state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateHistoryEntry {
    pub state: String,
    pub at: DateTime<Utc>,
    pub actor: String,
}

impl StateHistoryEntry {
    pub fn now(state: &str, actor: &str) -> Self {
        StateHistoryEntry {
            state: state.to_string(),
            at: Utc::now(),
            actor: actor.to_string(),
        }
    }
}

/// Weighted counts and magnitudes of the signals behind an issue's scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalBalance {
    pub negative_count: i64,
    pub neutral_count: i64,
    pub positive_count: i64,
    pub negative_magnitude: f64,
    pub positive_magnitude: f64,
    pub net_score: f64,
}

/// A correlated, actionable problem formed from one or more signals
/// matching a pattern. Never deleted, only closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub issue_type: String,
    pub issue_subtype: String,
    pub scope_level: ScopeLevel,
    pub scope_id: String,
    pub scope_project_id: Option<String>,
    pub scope_retainer_id: Option<String>,
    pub scope_brand_id: Option<String>,
    pub scope_client_id: Option<String>,
    pub headline: String,
    pub severity: Severity,
    pub priority_score: f64,
    pub trajectory: Trajectory,
    pub signal_ids: Vec<String>,
    pub balance: SignalBalance,
    pub recommended_action: Option<String>,
    pub owner_role: Option<String>,
    pub urgency: Option<String>,
    pub state: IssueState,
    pub regression_count: i64,
    pub state_history: Vec<StateHistoryEntry>,
    pub detected_at: DateTime<Utc>,
    pub surfaced_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub addressing_started_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_method: Option<String>,
    pub resolution_notes: Option<String>,
    pub monitoring_until: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_regression_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(valence: i8, magnitude: f64) -> NewSignal {
        NewSignal {
            signal_type: "task_overdue".to_string(),
            valence,
            magnitude,
            entity_type: "task".to_string(),
            entity_id: "t1".to_string(),
            scope: ScopeChain::default(),
            source: SignalSource::default(),
            detection_confidence: 1.0,
            attribution_confidence: 1.0,
            occurred_at: Utc::now(),
            expires_at: None,
            detector_id: "test".to_string(),
            detector_version: "1".to_string(),
        }
    }

    #[test]
    fn test_create_valid_signal() {
        let sig = Signal::create(draft(-1, 0.7)).expect("create");
        assert!(sig.id.starts_with("sig-"));
        assert_eq!(sig.valence, Valence::Negative);
        assert_eq!(sig.status, SignalStatus::Active);
        assert_eq!(sig.category, SignalCategory::Delivery);
    }

    #[test]
    fn test_invalid_valence_rejected() {
        assert!(Signal::create(draft(2, 0.5)).is_err());
        assert!(Signal::create(draft(-2, 0.5)).is_err());
    }

    #[test]
    fn test_invalid_magnitude_rejected() {
        assert!(Signal::create(draft(-1, 1.1)).is_err());
        assert!(Signal::create(draft(-1, -0.1)).is_err());
    }

    #[test]
    fn test_boundary_magnitudes_accepted() {
        assert!(Signal::create(draft(0, 0.0)).is_ok());
        assert!(Signal::create(draft(1, 1.0)).is_ok());
    }

    #[test]
    fn test_invalid_confidence_rejected() {
        let mut d = draft(-1, 0.5);
        d.detection_confidence = 1.5;
        assert!(Signal::create(d).is_err());
    }

    #[test]
    fn test_category_derivation() {
        assert_eq!(
            SignalCategory::for_type("invoice_overdue"),
            SignalCategory::Finance
        );
        assert_eq!(
            SignalCategory::for_type("client_comms_gap"),
            SignalCategory::Communication
        );
        assert_eq!(SignalCategory::for_type("whatever"), SignalCategory::Other);
    }

    #[test]
    fn test_scope_level_columns() {
        assert_eq!(ScopeLevel::Task.column(), "scope_task_id");
        assert_eq!(ScopeLevel::Client.column(), "scope_client_id");
    }

    #[test]
    fn test_open_states() {
        assert!(IssueState::Detected.is_open());
        assert!(IssueState::Addressing.is_open());
        assert!(!IssueState::Monitoring.is_open());
        assert!(!IssueState::Closed.is_open());
    }
}
