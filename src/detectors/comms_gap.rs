//! Client communication gap detector.
//!
//! Watches chat spaces for silence. A space quiet for more than a week
//! emits "client_comms_gap"; magnitude climbs the overdue staircase on the
//! days past that one-week grace.

use chrono::Duration;

use crate::signals::magnitude::overdue_magnitude;
use crate::types::{NewSignal, ScopeChain, Signal, SignalSource};

use super::{Detector, DetectorContext};

/// Silence up to this long is normal cadence, not a gap.
const GRACE_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct ChatSpaceRecord {
    pub space_id: String,
    pub client_id: Option<String>,
    /// Days since the last message in the space.
    pub quiet_days: i64,
    pub last_message_excerpt: Option<String>,
}

/// Source feed collaborator for chat space records.
pub trait ChatSpaceFeed {
    fn fetch(&self) -> Result<Vec<ChatSpaceRecord>, String>;
}

pub struct CommsGapDetector<F: ChatSpaceFeed> {
    feed: F,
}

impl<F: ChatSpaceFeed> CommsGapDetector<F> {
    pub fn new(feed: F) -> Self {
        Self { feed }
    }
}

impl<F: ChatSpaceFeed> Detector for CommsGapDetector<F> {
    fn detector_id(&self) -> &'static str {
        "comms_gap_detector"
    }

    fn detector_version(&self) -> &'static str {
        "1"
    }

    fn signal_types(&self) -> &'static [&'static str] {
        &["client_comms_gap"]
    }

    fn detect(&self, ctx: &DetectorContext) -> Result<Vec<Signal>, String> {
        let spaces = self.feed.fetch()?;

        let mut signals = Vec::new();
        for space in &spaces {
            let gap = space.quiet_days - GRACE_DAYS;
            if gap < 1 {
                continue;
            }
            if ctx.has_active("client_comms_gap", &space.space_id) {
                continue;
            }

            let mut scope = ctx
                .scopes
                .resolve("chat_space", &space.space_id)
                .unwrap_or_else(ScopeChain::default);
            if scope.client_id.is_none() {
                scope.client_id = space.client_id.clone();
            }

            match Signal::create(NewSignal {
                signal_type: "client_comms_gap".to_string(),
                valence: -1,
                magnitude: overdue_magnitude(gap),
                entity_type: "chat_space".to_string(),
                entity_id: space.space_id.clone(),
                scope,
                source: SignalSource {
                    source_type: Some("chat_space".to_string()),
                    source_id: Some(space.space_id.clone()),
                    source_url: None,
                    source_excerpt: space.last_message_excerpt.clone(),
                },
                detection_confidence: 0.9,
                attribution_confidence: 0.8,
                // The gap began at the last message; headline rendering
                // reads the quiet-spell length back off this timestamp
                occurred_at: ctx.now - Duration::days(space.quiet_days),
                expires_at: Some(ctx.now + Duration::days(60)),
                detector_id: self.detector_id().to_string(),
                detector_version: self.detector_version().to_string(),
            }) {
                Ok(signal) => signals.push(signal),
                Err(e) => {
                    log::warn!("Skipping signal for space {}: {}", space.space_id, e);
                }
            }
        }
        Ok(signals)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
