//! redb table definitions for the Rampline state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Singleton structures live under a fixed key;
//! per-stage and per-step records use composite keys for prefix scans.

use redb::TableDefinition;

/// The rollout plan, keyed by the singleton name `main`.
pub const PLANS: TableDefinition<&str, &[u8]> = TableDefinition::new("plans");

/// The whole release history list, keyed by the singleton name `history`.
pub const RELEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("releases");

/// Stage records keyed by `release-{release_id}-order-{order}`.
pub const STAGES: TableDefinition<&str, &[u8]> = TableDefinition::new("stages");

/// Step completion markers keyed by `{release_id}/{step_name}`.
pub const STEPS: TableDefinition<&str, &[u8]> = TableDefinition::new("steps");
