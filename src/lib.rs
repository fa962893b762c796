//! opspulse — a signal-to-issue correlation engine for agency operations.
//!
//! Detectors turn feed snapshots into atomic, valenced signals; the store
//! aggregates them per scope with recency decay; the formation service
//! matches aggregates against declarative patterns and forms issues; the
//! resolution service drives issues through a monitoring/regression
//! lifecycle. Scope resolution and record feeds are collaborator traits —
//! the engine never owns the entity hierarchy.

pub mod db;
pub mod detectors;
pub mod error;
pub mod formation;
pub mod jobs;
mod migrations;
pub mod resolution;
pub mod scope;
pub mod services;
pub mod signals;
pub mod types;

pub use db::PulseDb;
pub use detectors::{run_detection, Detector, DetectorSet};
pub use error::EngineError;
pub use formation::{FormationService, SURFACE_PRIORITY_THRESHOLD};
pub use jobs::JobLocks;
pub use scope::ScopeResolver;
