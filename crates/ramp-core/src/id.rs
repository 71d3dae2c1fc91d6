//! Release and stage id generation and shape validation.
//!
//! Release ids are 8 hex chars (truncated v4 UUID). Stage ids embed
//! the release id and stage order so a stage record can be addressed
//! without consulting the release.

use std::sync::LazyLock;

use regex::Regex;

static RELEASE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{8}$").unwrap());

static STAGE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^release-[0-9a-fA-F]{8}-order-[0-9]+$").unwrap());

/// Generate a fresh release id: 8 hex chars.
pub fn new_release_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Build the stage id for a release/order pair.
pub fn stage_id(release_id: &str, order: u32) -> String {
    format!("release-{release_id}-order-{order}")
}

/// Whether `value` has the shape of a release id.
pub fn is_release_id(value: &str) -> bool {
    RELEASE_ID_RE.is_match(value)
}

/// Whether `value` has the shape of a stage id.
pub fn is_stage_id(value: &str) -> bool {
    STAGE_ID_RE.is_match(value)
}
