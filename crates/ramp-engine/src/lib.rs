//! ramp-engine — the release orchestration engine.
//!
//! Drives one release end-to-end: shifts traffic stage by stage via a
//! [`DeployController`], watches health through a [`TelemetryClient`]
//! during each soak period, pauses at approval gates, and rolls the
//! whole thing back on denial, SLO breach, operator stop, or crash.
//!
//! The orchestrator keeps no state of its own. Everything it mutates
//! lives in `ramp-state` (the release registry and the stage actors),
//! and every side-effecting action is a named step checked against the
//! persisted step ledger, so a restarted process replays completed
//! steps as no-ops and resumes from the first incomplete one.

pub mod deploy;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod telemetry;
pub mod ticker;

pub use deploy::{DeployController, HttpDeployController, LogDeployController};
pub use error::{EngineError, EngineResult};
pub use gate::ApprovalGate;
pub use orchestrator::{EngineConfig, Orchestrator};
pub use telemetry::{FlatTelemetryClient, HttpTelemetryClient, LatencyPercentiles, TelemetryClient};
