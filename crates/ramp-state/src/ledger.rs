//! Step ledger — durable completion markers for orchestrator steps.
//!
//! The orchestrator names every side-effecting step and consults the
//! ledger before executing it: a marked step replays as a no-op, so a
//! restarted process continues from the first incomplete step. Markers
//! are pruned with their release.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::StateResult;
use crate::store::StateStore;
use crate::tables::STEPS;

fn step_key(release_id: &str, step: &str) -> String {
    format!("{release_id}/{step}")
}

impl StateStore {
    /// Whether a step has already completed for this release.
    pub fn is_step_done(&self, release_id: &str, step: &str) -> StateResult<bool> {
        self.contains_key(STEPS, &step_key(release_id, step))
    }

    /// Record a step's completion. Idempotent.
    pub fn mark_step_done(&self, release_id: &str, step: &str) -> StateResult<()> {
        let completed_at: DateTime<Utc> = Utc::now();
        self.write_json(STEPS, &step_key(release_id, step), &completed_at)?;
        debug!(%release_id, %step, "step marked done");
        Ok(())
    }

    /// Drop all step markers for a release. Returns number removed.
    pub fn clear_steps(&self, release_id: &str) -> StateResult<u32> {
        self.remove_prefix(STEPS, &format!("{release_id}/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_roundtrip() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(!store.is_step_done("aaaa0001", "release-running").unwrap());

        store.mark_step_done("aaaa0001", "release-running").unwrap();
        assert!(store.is_step_done("aaaa0001", "release-running").unwrap());

        // Same step for another release is independent.
        assert!(!store.is_step_done("bbbb0002", "release-running").unwrap());
    }

    #[test]
    fn marking_twice_is_harmless() {
        let store = StateStore::open_in_memory().unwrap();
        store.mark_step_done("aaaa0001", "stage-0-start").unwrap();
        store.mark_step_done("aaaa0001", "stage-0-start").unwrap();
        assert!(store.is_step_done("aaaa0001", "stage-0-start").unwrap());
    }

    #[test]
    fn clear_removes_only_that_release() {
        let store = StateStore::open_in_memory().unwrap();
        store.mark_step_done("aaaa0001", "stage-0-start").unwrap();
        store.mark_step_done("aaaa0001", "stage-0-soak-0").unwrap();
        store.mark_step_done("bbbb0002", "stage-0-start").unwrap();

        assert_eq!(store.clear_steps("aaaa0001").unwrap(), 2);
        assert!(!store.is_step_done("aaaa0001", "stage-0-start").unwrap());
        assert!(store.is_step_done("bbbb0002", "stage-0-start").unwrap());
    }
}
