//! ramp-core — domain types for Rampline progressive delivery.
//!
//! Defines the plan/release/stage data model, the operator command
//! vocabulary, id generation and shape checks, and SLO threshold
//! parsing. Everything here is pure — persistence lives in
//! `ramp-state`, orchestration in `ramp-engine`.

pub mod id;
pub mod plan;
pub mod slo;
pub mod types;

pub use id::{is_release_id, is_stage_id, new_release_id, stage_id};
pub use plan::PlanError;
pub use slo::p999_limit_ms;
pub use types::*;
