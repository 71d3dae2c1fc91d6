//! ramp-api — REST API for Rampline.
//!
//! Provides axum route handlers for the rollout plan, the release
//! history, and per-stage approval.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/plan` | Get the current plan (seeds the default) |
//! | POST | `/plan` | Replace the plan (validated) |
//! | GET | `/release` | List releases (pagination + filters) |
//! | POST | `/release` | Create a release from the current plan |
//! | GET | `/release/active` | The active release, or `null` |
//! | POST | `/release/active` | Control command: `start` / `stop` |
//! | DELETE | `/release/active` | Delete a not-yet-started release |
//! | GET | `/release/{id}` | Get one release |
//! | GET | `/stage/{id}` | Get one stage |
//! | POST | `/stage/{id}` | Approve or deny a paused stage |

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;

use ramp_engine::Orchestrator;
use ramp_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub orchestrator: Arc<Orchestrator>,
    /// Delay before the stop handler's second cancellation sweep.
    pub stop_grace: Duration,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/plan",
            get(handlers::get_plan).post(handlers::update_plan),
        )
        .route(
            "/release",
            get(handlers::list_releases).post(handlers::create_release),
        )
        .route(
            "/release/active",
            get(handlers::get_active_release)
                .post(handlers::control_active_release)
                .delete(handlers::delete_active_release),
        )
        .route("/release/{id}", get(handlers::get_release))
        .route(
            "/stage/{id}",
            get(handlers::get_stage).post(handlers::progress_stage),
        )
        .with_state(state)
}
