//! Domain types for plans, releases, and stages.
//!
//! All types are serializable to/from JSON for storage in redb tables
//! and for the REST surface. Timestamps are `chrono::DateTime<Utc>`
//! (ISO-8601 on the wire); elapsed times are whole seconds.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque 8-hex-char release identifier.
pub type ReleaseId = String;

/// Stage identifier of the form `release-{releaseId}-order-{order}`.
pub type StageId = String;

// ── Plan ───────────────────────────────────────────────────────────

/// The rollout schedule: ordered traffic stages plus SLO declarations.
///
/// Mutable only while no release is active. A release freezes a copy
/// of the plan at creation time (`Release::plan_record`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub stages: Vec<PlanStage>,
    pub slos: Vec<Slo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_last_saved: Option<DateTime<Utc>>,
}

/// One step of a plan: a traffic percentage held for a soak period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanStage {
    /// Zero-based position; the only valid execution order.
    pub order: u32,
    /// Traffic percentage for the new version at this stage (0-100).
    pub target_percent: u32,
    /// Seconds to hold at `target_percent` while monitoring health.
    pub soak_time: u64,
    /// Skip the approval gate after the soak completes.
    pub auto_progress: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A declared health threshold, human-authored.
///
/// Free text; expressions of the form `p999 < N ms` are evaluated
/// during soak (see [`crate::slo`]). Anything else is informational.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slo {
    pub value: String,
}

impl Plan {
    /// The built-in plan used when none has been saved yet.
    pub fn default_plan() -> Self {
        let stage = |order: u32, target_percent: u32| PlanStage {
            order,
            target_percent,
            soak_time: 60,
            auto_progress: false,
            description: None,
        };
        Self {
            stages: vec![stage(0, 10), stage(1, 50), stage(2, 100)],
            slos: vec![Slo {
                value: "latency p999 < 100ms".to_string(),
            }],
            time_last_saved: None,
        }
    }
}

// ── Release ────────────────────────────────────────────────────────

/// Lifecycle state of a release.
///
/// `NotStarted` and `Running` are the active states; at most one
/// release system-wide may be in either. The three `Done*` states are
/// terminal and never transition further.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseState {
    NotStarted,
    Running,
    DoneSuccessful,
    DoneStoppedManually,
    DoneFailedSlo,
}

impl ReleaseState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::DoneSuccessful | Self::DoneStoppedManually | Self::DoneFailedSlo
        )
    }

    /// Whether this state makes the release the system's active release.
    pub fn is_active(self) -> bool {
        matches!(self, Self::NotStarted | Self::Running)
    }
}

impl fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::DoneSuccessful => "done_successful",
            Self::DoneStoppedManually => "done_stopped_manually",
            Self::DoneFailedSlo => "done_failed_slo",
        };
        f.write_str(s)
    }
}

impl FromStr for ReleaseState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "running" => Ok(Self::Running),
            "done_successful" => Ok(Self::DoneSuccessful),
            "done_stopped_manually" => Ok(Self::DoneStoppedManually),
            "done_failed_slo" => Ok(Self::DoneFailedSlo),
            other => Err(format!("unknown release state: {other}")),
        }
    }
}

/// Reference from a release to one of its stage records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRef {
    pub id: StageId,
    pub order: u32,
}

/// One rollout attempt: a frozen plan executed against a version pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Release {
    pub id: ReleaseId,
    pub state: ReleaseState,
    /// Copy of the plan at creation time; later plan edits don't apply.
    pub plan_record: Plan,
    pub old_version: String,
    pub new_version: String,
    /// Stage references in ascending `order`.
    pub stages: Vec<StageRef>,
    pub time_created: DateTime<Utc>,
    pub time_started: Option<DateTime<Utc>>,
    pub time_done: Option<DateTime<Utc>>,
    /// Seconds between start and done (or now, while running).
    pub time_elapsed: i64,
}

// ── Stage ──────────────────────────────────────────────────────────

/// Lifecycle state of a release stage.
///
/// `Queued` is initial; `Running` is entered only from `Queued` (or
/// back from `AwaitingApproval`); the three `Done*` states are
/// terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Queued,
    Running,
    AwaitingApproval,
    DoneSuccessful,
    DoneFailed,
    DoneCancelled,
}

impl StageState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::DoneSuccessful | Self::DoneFailed | Self::DoneCancelled
        )
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::DoneSuccessful => "done_successful",
            Self::DoneFailed => "done_failed",
            Self::DoneCancelled => "done_cancelled",
        };
        f.write_str(s)
    }
}

/// Persisted record of one release stage.
///
/// Owned exclusively by the orchestrator while the release runs;
/// read-only to everything else. External callers influence it only
/// through the approve/deny command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseStage {
    pub id: StageId,
    pub order: u32,
    pub release_id: ReleaseId,
    pub state: StageState,
    pub time_started: Option<DateTime<Utc>>,
    pub time_done: Option<DateTime<Utc>>,
    pub time_elapsed: i64,
    /// Append-only log text, one `[timestamp] message` entry per line.
    pub logs: String,
}

// ── Operator commands ──────────────────────────────────────────────

/// Command controlling the active release.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseCommand {
    Start,
    Stop,
}

impl FromStr for ReleaseCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(format!("invalid command: {other}")),
        }
    }
}

/// Approval-gate verdict for a stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageCommand {
    Approve,
    Deny,
}

impl FromStr for StageCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Self::Approve),
            "deny" => Ok(Self::Deny),
            other => Err(format!("invalid command: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_state_serializes_snake_case() {
        let json = serde_json::to_string(&ReleaseState::DoneStoppedManually).unwrap();
        assert_eq!(json, "\"done_stopped_manually\"");
        let back: ReleaseState = serde_json::from_str("\"not_started\"").unwrap();
        assert_eq!(back, ReleaseState::NotStarted);
    }

    #[test]
    fn release_state_classification() {
        assert!(ReleaseState::NotStarted.is_active());
        assert!(ReleaseState::Running.is_active());
        assert!(!ReleaseState::DoneSuccessful.is_active());
        assert!(ReleaseState::DoneFailedSlo.is_terminal());
        assert!(!ReleaseState::Running.is_terminal());
    }

    #[test]
    fn stage_state_terminal() {
        assert!(StageState::DoneCancelled.is_terminal());
        assert!(!StageState::AwaitingApproval.is_terminal());
        assert!(!StageState::Queued.is_terminal());
    }

    #[test]
    fn commands_parse() {
        assert_eq!("start".parse::<ReleaseCommand>(), Ok(ReleaseCommand::Start));
        assert_eq!("deny".parse::<StageCommand>(), Ok(StageCommand::Deny));
        assert!("restart".parse::<ReleaseCommand>().is_err());
        assert!("APPROVE".parse::<StageCommand>().is_err());
    }

    #[test]
    fn default_plan_shape() {
        let plan = Plan::default_plan();
        assert_eq!(plan.stages.len(), 3);
        assert_eq!(plan.stages.last().unwrap().target_percent, 100);
        assert_eq!(plan.slos.len(), 1);
    }

    #[test]
    fn state_display_roundtrips_fromstr() {
        for s in [
            ReleaseState::NotStarted,
            ReleaseState::Running,
            ReleaseState::DoneSuccessful,
            ReleaseState::DoneStoppedManually,
            ReleaseState::DoneFailedSlo,
        ] {
            assert_eq!(s.to_string().parse::<ReleaseState>(), Ok(s));
        }
    }
}
