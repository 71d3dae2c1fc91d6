//! Stage actors — per-stage state records and their state machine.
//!
//! Each stage of a release is one record keyed by its stage id.
//! While a release runs, only the orchestrator writes these records;
//! external callers reach them solely through the approve/deny
//! command. State transitions append a canonical log line and derive
//! the timing fields; terminal states are frozen, which is what makes
//! the orchestrator's failure and replay paths idempotent.

use chrono::Utc;
use tracing::{debug, warn};

use ramp_core::{ReleaseStage, StageCommand, StageState, stage_id};

use crate::error::StateResult;
use crate::store::StateStore;
use crate::tables::STAGES;

use StageState::*;

/// The canonical log line for a `(previous, new)` state transition.
/// Unknown pairs produce no line.
fn transition_message(previous: StageState, new: StageState) -> Option<&'static str> {
    match (previous, new) {
        (Queued, Running) => Some("stage started - beginning soak period"),
        (Running, AwaitingApproval) => {
            Some("soak period completed - awaiting manual approval to continue")
        }
        (AwaitingApproval, Running) => Some("stage approved by user - continuing"),
        (Running, DoneSuccessful) | (AwaitingApproval, DoneSuccessful) => {
            Some("stage completed successfully")
        }
        (Running, DoneFailed) => Some("stage failed SLOs"),
        (AwaitingApproval, DoneFailed) => Some("stage failed while awaiting approval"),
        (Running, DoneCancelled) | (AwaitingApproval, DoneCancelled) => {
            Some("stage cancelled - release stopped")
        }
        (Queued, DoneFailed) => Some("previous stage failed, this stage will not run"),
        (Queued, DoneCancelled) => {
            Some("previous stage failed or cancelled, this stage will not run")
        }
        _ => None,
    }
}

fn append_log(stage: &mut ReleaseStage, message: &str) {
    let line = format!("[{}] {message}\n", Utc::now().to_rfc3339());
    stage.logs.push_str(&line);
}

impl StateStore {
    /// Create a stage record (state `queued`).
    pub fn init_stage(&self, stage: &ReleaseStage) -> StateResult<()> {
        self.write_json(STAGES, &stage.id, stage)?;
        debug!(id = %stage.id, "stage initialized");
        Ok(())
    }

    pub fn get_stage(&self, id: &str) -> StateResult<Option<ReleaseStage>> {
        self.read_json(STAGES, id)
    }

    /// Transition a stage's state.
    ///
    /// Entering `running` stamps `time_started`; leaving `running` or
    /// `awaiting_approval` for `done_failed`/`done_successful` stamps
    /// `time_done` and computes the elapsed seconds. A transition on a
    /// terminal stage is a no-op returning the current record.
    pub fn update_stage_state(
        &self,
        id: &str,
        new_state: StageState,
    ) -> StateResult<Option<ReleaseStage>> {
        let Some(mut stage) = self.get_stage(id)? else {
            return Ok(None);
        };

        let previous = stage.state;
        if previous.is_terminal() {
            debug!(%id, state = %previous, "stage is terminal, ignoring transition");
            return Ok(Some(stage));
        }

        let now = Utc::now();
        if matches!(previous, Queued | AwaitingApproval) && new_state == Running {
            stage.time_started = Some(now);
            stage.time_elapsed = 0;
        }
        if matches!(previous, Running | AwaitingApproval)
            && matches!(new_state, DoneFailed | DoneSuccessful)
        {
            stage.time_done = Some(now);
            if let Some(started) = stage.time_started {
                stage.time_elapsed = (now - started).num_seconds().max(0);
            }
        }

        stage.state = new_state;
        if let Some(message) = transition_message(previous, new_state) {
            append_log(&mut stage, message);
        }

        self.write_json(STAGES, id, &stage)?;
        debug!(%id, %previous, new = %new_state, "stage state updated");
        Ok(Some(stage))
    }

    /// Apply an approve/deny verdict to a stage.
    ///
    /// `approve` completes the stage; `deny` cancels it (and the
    /// orchestrator will stop the release when it observes this).
    pub fn progress_stage(
        &self,
        id: &str,
        command: StageCommand,
    ) -> StateResult<Option<ReleaseStage>> {
        let (new_state, note) = match command {
            StageCommand::Approve => (DoneSuccessful, "stage approved"),
            StageCommand::Deny => (DoneCancelled, "stage not approved, cancelling release"),
        };
        if self.add_stage_log(id, note)?.is_none() {
            return Ok(None);
        }
        self.update_stage_state(id, new_state)
    }

    /// Append a timestamped line to a stage's log.
    pub fn add_stage_log(&self, id: &str, message: &str) -> StateResult<Option<ReleaseStage>> {
        let Some(mut stage) = self.get_stage(id)? else {
            return Ok(None);
        };
        append_log(&mut stage, message);
        self.write_json(STAGES, id, &stage)?;
        Ok(Some(stage))
    }

    /// Sweep every non-terminal stage of a release to `done_cancelled`.
    ///
    /// Used by the stop path; run twice (immediately and after a grace
    /// delay) to converge against an in-flight orchestrator step.
    pub fn cancel_pending_stages(&self, release_id: &str) -> StateResult<u32> {
        let prefix = format!("release-{release_id}-order-");
        let mut cancelled = 0;
        for key in self.keys_with_prefix(STAGES, &prefix)? {
            if let Some(stage) = self.get_stage(&key)? {
                if !stage.state.is_terminal() {
                    self.update_stage_state(&key, DoneCancelled)?;
                    warn!(id = %key, "stage cancelled by stop sweep");
                    cancelled += 1;
                }
            }
        }
        Ok(cancelled)
    }

    /// Cancel the stages of a release at or after `from_order`.
    pub fn cancel_stages_from(&self, release_id: &str, from_order: u32) -> StateResult<u32> {
        let mut cancelled = 0;
        for key in self.keys_with_prefix(STAGES, &format!("release-{release_id}-order-"))? {
            if let Some(stage) = self.get_stage(&key)? {
                if stage.order >= from_order && !stage.state.is_terminal() {
                    self.update_stage_state(&key, DoneCancelled)?;
                    cancelled += 1;
                }
            }
        }
        Ok(cancelled)
    }

    /// Refresh `time_elapsed` while a stage is running.
    ///
    /// Returns whether the stage is still running (ticker continuation
    /// signal).
    pub fn tick_stage_elapsed(&self, id: &str) -> StateResult<bool> {
        let Some(mut stage) = self.get_stage(id)? else {
            return Ok(false);
        };
        if stage.state != Running {
            return Ok(false);
        }
        if let Some(started) = stage.time_started {
            stage.time_elapsed = (Utc::now() - started).num_seconds().max(0);
            self.write_json(STAGES, id, &stage)?;
        }
        Ok(true)
    }

    /// Convenience lookup by release id and order.
    pub fn get_stage_by_order(
        &self,
        release_id: &str,
        order: u32,
    ) -> StateResult<Option<ReleaseStage>> {
        self.get_stage(&stage_id(release_id, order))
    }
}
