//! Error types for the orchestration engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while orchestrating a release.
///
/// `Deploy` and `Telemetry` are external-dependency failures; the
/// orchestrator treats them as fatal for the release (full rollback,
/// `done_failed_slo`) and re-raises.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    State(#[from] ramp_state::StateError),

    #[error("release {0} not found")]
    ReleaseNotFound(String),

    #[error("stage {0} not found")]
    StageNotFound(String),

    #[error("deployment controller call failed: {0}")]
    Deploy(String),

    #[error("telemetry query failed: {0}")]
    Telemetry(String),
}
