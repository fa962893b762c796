//! Named job locks for batch sweeps.
//!
//! Detection, formation, and resolution sweeps are idempotent but must not
//! run concurrently for the same job — two formation passes racing on one
//! pattern could double-create an issue before the open-issue lookup sees
//! the first. Callers acquire the job name before sweeping; a second caller
//! is refused while the first holds it. The guard releases on drop, panics
//! included (`parking_lot` does not poison).

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

/// Registry of in-flight sweep names. Cheap to clone and share.
#[derive(Clone, Default)]
pub struct JobLocks {
    running: Arc<Mutex<HashSet<&'static str>>>,
}

/// Held while a named sweep runs; releases the name on drop.
pub struct JobGuard {
    name: &'static str,
    running: Arc<Mutex<HashSet<&'static str>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to start a named sweep. Returns `None` if one is already running.
    pub fn try_begin(&self, name: &'static str) -> Option<JobGuard> {
        let mut running = self.running.lock();
        if !running.insert(name) {
            log::warn!("Sweep '{}' refused: already running", name);
            return None;
        }
        Some(JobGuard {
            name,
            running: Arc::clone(&self.running),
        })
    }

    /// Whether a named sweep is currently held.
    pub fn is_running(&self, name: &str) -> bool {
        self.running.lock().contains(name)
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.running.lock().remove(self.name);
    }
}
