//! Release registry — the append-only release history.
//!
//! The whole history is one persisted list under a singleton key,
//! most-recent-first, capped at 100 entries. Every operation is a
//! read-modify-write of the list under redb's single-writer guarantee.
//! Releases dropped from the history (cap overflow or explicit
//! removal) have their stage records and step markers pruned with
//! them.

use chrono::Utc;
use tracing::{debug, info};

use ramp_core::{Release, ReleaseState};

use crate::error::StateResult;
use crate::store::StateStore;
use crate::tables::{RELEASES, STAGES};

/// Singleton key the history list is stored under.
const HISTORY_KEY: &str = "history";

/// Retention cap; the oldest entries beyond this are dropped silently.
const MAX_HISTORY: usize = 100;

impl StateStore {
    fn load_history(&self) -> StateResult<Vec<Release>> {
        Ok(self
            .read_json::<Vec<Release>>(RELEASES, HISTORY_KEY)?
            .unwrap_or_default())
    }

    fn save_history(&self, releases: &[Release]) -> StateResult<()> {
        self.write_json(RELEASES, HISTORY_KEY, &releases)
    }

    /// Delete the stage records and step markers belonging to a release.
    fn prune_release_records(&self, release: &Release) -> StateResult<()> {
        for stage_ref in &release.stages {
            self.remove_key(STAGES, &stage_ref.id)?;
        }
        self.clear_steps(&release.id)?;
        Ok(())
    }

    /// Prepend a release to the history and trim to the retention cap.
    ///
    /// The caller is responsible for the no-active-release precondition;
    /// a race between two creators resolves at the API boundary, not here.
    pub fn create_release(&self, release: &Release) -> StateResult<Release> {
        let mut history = self.load_history()?;
        history.insert(0, release.clone());

        // Trim to cap, pruning the dropped releases' records.
        while history.len() > MAX_HISTORY {
            if let Some(dropped) = history.pop() {
                debug!(id = %dropped.id, "pruning release beyond retention cap");
                self.prune_release_records(&dropped)?;
            }
        }

        self.save_history(&history)?;
        info!(id = %release.id, stages = release.stages.len(), "release created");
        Ok(release.clone())
    }

    /// The single release currently in `not_started` or `running`, if any.
    pub fn get_active_release(&self) -> StateResult<Option<Release>> {
        let history = self.load_history()?;
        Ok(history.into_iter().find(|r| r.state.is_active()))
    }

    pub fn has_active_release(&self) -> StateResult<bool> {
        Ok(self.get_active_release()?.is_some())
    }

    /// Transition a release's state, deriving timing fields.
    ///
    /// `not_started -> running` stamps `time_started`; `running ->`
    /// any terminal stamps `time_done` and computes `time_elapsed`.
    /// A transition on a terminal release is a no-op; returns `false`
    /// if the id is unknown.
    pub fn update_release_state(&self, id: &str, state: ReleaseState) -> StateResult<bool> {
        let mut history = self.load_history()?;
        let Some(release) = history.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };

        let previous = release.state;
        if previous.is_terminal() {
            debug!(%id, state = %previous, "release is terminal, ignoring transition");
            return Ok(true);
        }
        let now = Utc::now();

        if previous == ReleaseState::NotStarted && state == ReleaseState::Running {
            release.time_started = Some(now);
            release.time_elapsed = 0;
        }
        if previous == ReleaseState::Running && state.is_terminal() {
            release.time_done = Some(now);
            if let Some(started) = release.time_started {
                release.time_elapsed = (now - started).num_seconds().max(0);
            }
        }

        release.state = state;
        debug!(%id, %previous, new = %state, "release state updated");
        self.save_history(&history)?;
        Ok(true)
    }

    pub fn get_release(&self, id: &str) -> StateResult<Option<Release>> {
        let history = self.load_history()?;
        Ok(history.into_iter().find(|r| r.id == id))
    }

    /// All releases, most recent first.
    pub fn get_all_releases(&self) -> StateResult<Vec<Release>> {
        self.load_history()
    }

    /// Hard-delete a release and its stage/step records.
    /// Returns whether it was found.
    pub fn remove_release(&self, id: &str) -> StateResult<bool> {
        let mut history = self.load_history()?;
        let Some(index) = history.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        let removed = history.remove(index);
        self.prune_release_records(&removed)?;
        self.save_history(&history)?;
        info!(%id, "release removed");
        Ok(true)
    }

    /// Drop the entire history, pruning every release's records.
    pub fn clear_history(&self) -> StateResult<()> {
        let history = self.load_history()?;
        for release in &history {
            self.prune_release_records(release)?;
        }
        self.save_history(&[])?;
        info!(cleared = history.len(), "release history cleared");
        Ok(())
    }

    /// Refresh `time_elapsed` on running releases.
    ///
    /// Returns whether any release is still running (the elapsed
    /// ticker uses this as its continuation signal).
    pub fn tick_release_elapsed(&self) -> StateResult<bool> {
        let mut history = self.load_history()?;
        let now = Utc::now();
        let mut any_running = false;

        for release in history.iter_mut() {
            if release.state == ReleaseState::Running {
                if let Some(started) = release.time_started {
                    release.time_elapsed = (now - started).num_seconds().max(0);
                }
                any_running = true;
            }
        }

        if any_running {
            self.save_history(&history)?;
        }
        Ok(any_running)
    }
}
