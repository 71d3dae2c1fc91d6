//! ramp-state — embedded durable store for Rampline.
//!
//! Backed by [redb](https://docs.rs/redb). All domain types are
//! JSON-serialized into `&str -> &[u8]` tables. Four concerns live
//! here, one module each:
//!
//! - `plan`: the singleton rollout plan (with a built-in default).
//! - `registry`: the append-only release history, capped at 100, and
//!   the active-release lookup with timing derivation.
//! - `stage`: per-stage actor records with the stage state machine,
//!   canonical transition log lines, and elapsed ticking.
//! - `ledger`: per-release step completion markers — the primitive
//!   that makes the orchestrator replay-safe across restarts.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (an `Arc<Database>`);
//! redb's single write transaction at a time gives every key the
//! single-writer discipline the stage actors rely on.

pub mod error;
pub mod ledger;
pub mod plan;
pub mod registry;
pub mod stage;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
