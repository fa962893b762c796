//! Task delivery detector.
//!
//! Reads the task feed and emits "task_overdue" for tasks past their due
//! date, "task_approaching_due" for tasks due within two days, and a
//! positive "task_completed" for on-time completions (those feed the
//! balance side of scope aggregates).

use chrono::Duration;

use crate::signals::magnitude::overdue_magnitude;
use crate::types::{NewSignal, ScopeChain, Signal, SignalSource};

use super::{Detector, DetectorContext};

/// One pre-deduplicated task record for the current run. The feed owns
/// pagination and upstream filtering.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    /// Days past due; zero or negative when not overdue.
    pub days_overdue: i64,
    /// Days until due, when the task is still open.
    pub due_in_days: Option<i64>,
    pub assignee_id: Option<String>,
    /// Completed on or before the due date during this feed window.
    pub completed_on_time: bool,
    pub url: Option<String>,
}

/// Source feed collaborator for task records.
pub trait TaskFeed {
    fn fetch(&self) -> Result<Vec<TaskRecord>, String>;
}

pub struct TaskOverdueDetector<F: TaskFeed> {
    feed: F,
}

impl<F: TaskFeed> TaskOverdueDetector<F> {
    pub fn new(feed: F) -> Self {
        Self { feed }
    }

    fn emit(
        &self,
        ctx: &DetectorContext,
        task: &TaskRecord,
        signal_type: &str,
        valence: i8,
        magnitude: f64,
        excerpt: String,
    ) -> Option<Signal> {
        if ctx.has_active(signal_type, &task.id) {
            return None;
        }
        let mut scope = ctx
            .scopes
            .resolve("task", &task.id)
            .unwrap_or_else(ScopeChain::default);
        if scope.person_id.is_none() {
            scope.person_id = task.assignee_id.clone();
        }
        scope.task_id.get_or_insert_with(|| task.id.clone());

        match Signal::create(NewSignal {
            signal_type: signal_type.to_string(),
            valence,
            magnitude,
            entity_type: "task".to_string(),
            entity_id: task.id.clone(),
            scope,
            source: SignalSource {
                source_type: Some("task".to_string()),
                source_id: Some(task.id.clone()),
                source_url: task.url.clone(),
                source_excerpt: Some(excerpt),
            },
            detection_confidence: 1.0,
            attribution_confidence: 0.9,
            occurred_at: ctx.now,
            expires_at: Some(ctx.now + Duration::days(90)),
            detector_id: self.detector_id().to_string(),
            detector_version: self.detector_version().to_string(),
        }) {
            Ok(signal) => Some(signal),
            Err(e) => {
                // One bad construction never blocks the rest of the batch
                log::warn!("Skipping signal for task {}: {}", task.id, e);
                None
            }
        }
    }
}

impl<F: TaskFeed> Detector for TaskOverdueDetector<F> {
    fn detector_id(&self) -> &'static str {
        "task_overdue_detector"
    }

    fn detector_version(&self) -> &'static str {
        "2"
    }

    fn signal_types(&self) -> &'static [&'static str] {
        &["task_overdue", "task_approaching_due", "task_completed"]
    }

    fn detect(&self, ctx: &DetectorContext) -> Result<Vec<Signal>, String> {
        let tasks = self.feed.fetch()?;

        let mut signals = Vec::new();
        for task in &tasks {
            if task.completed_on_time {
                signals.extend(self.emit(
                    ctx,
                    task,
                    "task_completed",
                    1,
                    0.3,
                    format!("{} completed on time", task.title),
                ));
            } else if task.days_overdue >= 1 {
                signals.extend(self.emit(
                    ctx,
                    task,
                    "task_overdue",
                    -1,
                    overdue_magnitude(task.days_overdue),
                    format!("{} is {}d overdue", task.title, task.days_overdue),
                ));
            } else if matches!(task.due_in_days, Some(d) if d <= 2) {
                signals.extend(self.emit(
                    ctx,
                    task,
                    "task_approaching_due",
                    -1,
                    0.3,
                    format!("{} due in {}d", task.title, task.due_in_days.unwrap_or(0)),
                ));
            }
        }
        Ok(signals)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
