//! REST API handlers.
//!
//! Each handler reads/writes via `StateStore` and returns the entity
//! as JSON on success; errors are `{"message": ..., "ok": false}`
//! with 400/404/409/500 as appropriate.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use ramp_core::{
    Plan, Release, ReleaseCommand, ReleaseState, ReleaseStage, StageCommand, StageRef, StageState,
    is_release_id, is_stage_id, new_release_id, stage_id,
};

use crate::ApiState;

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(message = msg, "request failed");
    }
    (
        status,
        Json(serde_json::json!({ "message": msg, "ok": false })),
    )
}

// ── Plan ───────────────────────────────────────────────────────

/// GET /plan
pub async fn get_plan(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.get_plan() {
        Ok(plan) => Json(plan).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /plan
pub async fn update_plan(
    State(state): State<ApiState>,
    Json(plan): Json<Plan>,
) -> impl IntoResponse {
    if let Err(e) = plan.validate() {
        return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
    }
    match state.store.update_plan(&plan) {
        Ok(stored) => Json(stored).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Releases ───────────────────────────────────────────────────

/// Query parameters for the release listing.
#[derive(Debug, Default, serde::Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub state: Option<String>,
}

fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp {value:?}: {e}"))
}

/// GET /release
pub async fn list_releases(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50);
    if limit < 1 || limit > 100 {
        return error_response("limit must be between 1 and 100", StatusCode::BAD_REQUEST)
            .into_response();
    }
    let offset = query.offset.unwrap_or(0);

    let since = match query.since.as_deref().map(parse_rfc3339).transpose() {
        Ok(t) => t,
        Err(e) => return error_response(&e, StatusCode::BAD_REQUEST).into_response(),
    };
    let until = match query.until.as_deref().map(parse_rfc3339).transpose() {
        Ok(t) => t,
        Err(e) => return error_response(&e, StatusCode::BAD_REQUEST).into_response(),
    };
    let state_filter = match query.state.as_deref().map(str::parse::<ReleaseState>).transpose() {
        Ok(s) => s,
        Err(e) => return error_response(&e, StatusCode::BAD_REQUEST).into_response(),
    };

    match state.store.get_all_releases() {
        Ok(releases) => {
            let page: Vec<Release> = releases
                .into_iter()
                .filter(|r| since.is_none_or(|t| r.time_created >= t))
                .filter(|r| until.is_none_or(|t| r.time_created <= t))
                .filter(|r| state_filter.is_none_or(|s| r.state == s))
                .skip(offset)
                .take(limit)
                .collect();
            Json(page).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// Create request body; both versions are optional opaque identifiers.
#[derive(Debug, Default, serde::Deserialize)]
pub struct CreateReleaseRequest {
    pub old_version: Option<String>,
    pub new_version: Option<String>,
}

/// POST /release
///
/// Freezes the current plan into a new release with one queued stage
/// per plan stage. Refused while another release is active.
pub async fn create_release(
    State(state): State<ApiState>,
    body: String,
) -> impl IntoResponse {
    let request: CreateReleaseRequest = if body.trim().is_empty() {
        CreateReleaseRequest::default()
    } else {
        match serde_json::from_str(&body) {
            Ok(request) => request,
            Err(e) => {
                return error_response(&format!("invalid request body: {e}"), StatusCode::BAD_REQUEST)
                    .into_response();
            }
        }
    };

    match state.store.has_active_release() {
        Ok(true) => {
            return error_response("a release is already active", StatusCode::CONFLICT)
                .into_response();
        }
        Ok(false) => {}
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    }

    let plan = match state.store.get_plan() {
        Ok(plan) => plan,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    let id = new_release_id();
    let stages: Vec<StageRef> = plan
        .stages
        .iter()
        .map(|p| StageRef {
            id: stage_id(&id, p.order),
            order: p.order,
        })
        .collect();

    for stage_ref in &stages {
        let stage = ReleaseStage {
            id: stage_ref.id.clone(),
            order: stage_ref.order,
            release_id: id.clone(),
            state: StageState::Queued,
            time_started: None,
            time_done: None,
            time_elapsed: 0,
            logs: String::new(),
        };
        if let Err(e) = state.store.init_stage(&stage) {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    }

    let release = Release {
        id,
        state: ReleaseState::NotStarted,
        plan_record: plan,
        old_version: request.old_version.unwrap_or_else(|| "current".to_string()),
        new_version: request.new_version.unwrap_or_else(|| "candidate".to_string()),
        stages,
        time_created: Utc::now(),
        time_started: None,
        time_done: None,
        time_elapsed: 0,
    };

    match state.store.create_release(&release) {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /release/active — the active release, or JSON `null`.
pub async fn get_active_release(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.get_active_release() {
        Ok(active) => Json(active).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// Control request body. Extra fields (auth context etc.) are ignored.
#[derive(Debug, serde::Deserialize)]
pub struct ControlRequest {
    pub command: String,
}

/// POST /release/active
///
/// `start` is valid only from `not_started` and hands the release to
/// the orchestrator. `stop` is valid only from `running`: it marks the
/// release stopped, sweeps pending stages to `done_cancelled`, and
/// sweeps again after a grace delay to converge against whatever the
/// in-flight orchestrator wrote in between.
pub async fn control_active_release(
    State(state): State<ApiState>,
    Json(request): Json<ControlRequest>,
) -> impl IntoResponse {
    let command = match request.command.parse::<ReleaseCommand>() {
        Ok(command) => command,
        Err(e) => return error_response(&e, StatusCode::BAD_REQUEST).into_response(),
    };

    let active = match state.store.get_active_release() {
        Ok(Some(release)) => release,
        Ok(None) => {
            return error_response("no active release", StatusCode::NOT_FOUND).into_response();
        }
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    match command {
        ReleaseCommand::Start => {
            if active.state != ReleaseState::NotStarted {
                return error_response(
                    &format!("cannot start a release in state {}", active.state),
                    StatusCode::BAD_REQUEST,
                )
                .into_response();
            }
            if let Err(e) = state.store.update_release_state(&active.id, ReleaseState::Running) {
                return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                    .into_response();
            }
            info!(id = %active.id, "release started");
            let orchestrator = state.orchestrator.clone();
            let id = active.id.clone();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.run(&id).await {
                    error!(%id, error = %e, "release run ended with error");
                }
            });
        }
        ReleaseCommand::Stop => {
            if active.state != ReleaseState::Running {
                return error_response(
                    &format!("cannot stop a release in state {}", active.state),
                    StatusCode::BAD_REQUEST,
                )
                .into_response();
            }
            if let Err(e) = state
                .store
                .update_release_state(&active.id, ReleaseState::DoneStoppedManually)
            {
                return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                    .into_response();
            }
            if let Err(e) = state.store.cancel_pending_stages(&active.id) {
                return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                    .into_response();
            }
            info!(id = %active.id, "release stopped by operator");

            // The orchestrator may still be mid-step and about to move a
            // stage; sweep once more after it has had time to notice.
            let store = state.store.clone();
            let id = active.id.clone();
            let grace = state.stop_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if let Err(e) = store.cancel_pending_stages(&id) {
                    warn!(%id, error = %e, "delayed cancellation sweep failed");
                }
            });
        }
    }

    match state.store.get_release(&active.id) {
        Ok(Some(release)) => Json(release).into_response(),
        Ok(None) => error_response("release disappeared", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// DELETE /release/active — only while `not_started`.
pub async fn delete_active_release(State(state): State<ApiState>) -> impl IntoResponse {
    let active = match state.store.get_active_release() {
        Ok(Some(release)) => release,
        Ok(None) => {
            return error_response("no active release", StatusCode::NOT_FOUND).into_response();
        }
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    if active.state != ReleaseState::NotStarted {
        return error_response(
            "only a not-yet-started release can be deleted",
            StatusCode::CONFLICT,
        )
        .into_response();
    }

    match state.store.remove_release(&active.id) {
        Ok(true) => Json(active).into_response(),
        Ok(false) => error_response("release not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /release/:id
pub async fn get_release(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !is_release_id(&id) {
        return error_response("release not found", StatusCode::NOT_FOUND).into_response();
    }
    match state.store.get_release(&id) {
        Ok(Some(release)) => Json(release).into_response(),
        Ok(None) => error_response("release not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Stages ─────────────────────────────────────────────────────

/// GET /stage/:id
pub async fn get_stage(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if !is_stage_id(&id) {
        return error_response("stage not found", StatusCode::NOT_FOUND).into_response();
    }
    match state.store.get_stage(&id) {
        Ok(Some(stage)) => Json(stage).into_response(),
        Ok(None) => error_response("stage not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /stage/:id — plain-text body `approve` or `deny`.
///
/// Persists the verdict and wakes the orchestrator's gate waiter.
pub async fn progress_stage(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: String,
) -> impl IntoResponse {
    if !is_stage_id(&id) {
        return error_response("stage not found", StatusCode::NOT_FOUND).into_response();
    }
    let command = match body.trim().parse::<StageCommand>() {
        Ok(command) => command,
        Err(e) => return error_response(&e, StatusCode::BAD_REQUEST).into_response(),
    };

    match state.store.progress_stage(&id, command) {
        Ok(Some(stage)) => {
            state.orchestrator.gate().signal(&id);
            info!(%id, ?command, "stage verdict recorded");
            Json(stage).into_response()
        }
        Ok(None) => error_response("stage not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::response::Response;

    use ramp_engine::{EngineConfig, FlatTelemetryClient, LogDeployController, Orchestrator};
    use ramp_state::StateStore;

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        let config = EngineConfig {
            target: "payments".into(),
            poll_interval: Duration::from_millis(5),
            gate_recheck: Duration::from_millis(10),
            tick_period: Duration::from_millis(50),
        };
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            Arc::new(LogDeployController),
            Arc::new(FlatTelemetryClient),
            config,
        ));
        ApiState {
            store,
            orchestrator,
            stop_grace: Duration::from_millis(20),
        }
    }

    async fn created_release(state: &ApiState) -> Release {
        let resp = create_release(State(state.clone()), String::new())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        state.store.get_active_release().unwrap().unwrap()
    }

    fn status(resp: Response) -> StatusCode {
        resp.status()
    }

    #[tokio::test]
    async fn plan_roundtrip_and_validation() {
        let state = test_state();

        let resp = get_plan(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let mut plan = Plan::default_plan();
        plan.stages[0].soak_time = 120;
        let resp = update_plan(State(state.clone()), Json(plan.clone()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.store.get_plan().unwrap().stages[0].soak_time, 120);

        // Last stage must reach 100 percent.
        plan.stages.last_mut().unwrap().target_percent = 90;
        let resp = update_plan(State(state), Json(plan)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_freezes_plan_and_queues_stages() {
        let state = test_state();
        let release = created_release(&state).await;

        assert_eq!(release.state, ReleaseState::NotStarted);
        assert_eq!(release.plan_record, state.store.get_plan().unwrap());
        assert_eq!(release.stages.len(), release.plan_record.stages.len());
        for stage_ref in &release.stages {
            let stage = state.store.get_stage(&stage_ref.id).unwrap().unwrap();
            assert_eq!(stage.state, StageState::Queued);
        }
    }

    #[tokio::test]
    async fn second_create_conflicts_while_active() {
        let state = test_state();
        created_release(&state).await;

        let resp = create_release(State(state), String::new()).await.into_response();
        assert_eq!(status(resp), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn active_endpoint_returns_null_without_release() {
        let state = test_state();
        let resp = get_active_release(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_requires_not_started() {
        let state = test_state();
        let release = created_release(&state).await;

        state
            .store
            .update_release_state(&release.id, ReleaseState::Running)
            .unwrap();
        let resp = control_active_release(
            State(state),
            Json(ControlRequest {
                command: "start".into(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let state = test_state();
        created_release(&state).await;

        let resp = control_active_release(
            State(state),
            Json(ControlRequest {
                command: "pause".into(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn control_without_active_release_is_404() {
        let state = test_state();
        let resp = control_active_release(
            State(state),
            Json(ControlRequest {
                command: "start".into(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stop_converges_all_stages() {
        let state = test_state();
        // Long soak so the release is still mid-stage when stopped.
        let mut plan = Plan::default_plan();
        for stage in &mut plan.stages {
            stage.soak_time = 600;
            stage.auto_progress = true;
        }
        state.store.update_plan(&plan).unwrap();
        let release = created_release(&state).await;

        let resp = control_active_release(
            State(state.clone()),
            Json(ControlRequest {
                command: "start".into(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let resp = control_active_release(
            State(state.clone()),
            Json(ControlRequest {
                command: "stop".into(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        // Wait out the grace sweep and the orchestrator's own exit.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stopped = state.store.get_release(&release.id).unwrap().unwrap();
        assert_eq!(stopped.state, ReleaseState::DoneStoppedManually);
        for stage_ref in &release.stages {
            let stage = state.store.get_stage(&stage_ref.id).unwrap().unwrap();
            assert!(stage.state.is_terminal(), "stage {} not terminal", stage.order);
        }
        assert!(state.store.get_active_release().unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_only_before_start() {
        let state = test_state();
        let release = created_release(&state).await;

        state
            .store
            .update_release_state(&release.id, ReleaseState::Running)
            .unwrap();
        let resp = delete_active_release(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        state
            .store
            .update_release_state(&release.id, ReleaseState::NotStarted)
            .unwrap();
        let resp = delete_active_release(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.store.get_release(&release.id).unwrap().is_none());
        for stage_ref in &release.stages {
            assert!(state.store.get_stage(&stage_ref.id).unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn malformed_ids_are_not_found() {
        let state = test_state();

        let resp = get_release(State(state.clone()), Path("not-hex".into()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = get_stage(State(state.clone()), Path("bogus".into()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = progress_stage(State(state), Path("bogus".into()), "approve".into())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stage_verdict_persists_and_rejects_garbage() {
        let state = test_state();
        let release = created_release(&state).await;
        let sid = release.stages[0].id.clone();
        state
            .store
            .update_stage_state(&sid, StageState::Running)
            .unwrap();
        state
            .store
            .update_stage_state(&sid, StageState::AwaitingApproval)
            .unwrap();

        let resp = progress_stage(State(state.clone()), Path(sid.clone()), "reject".into())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = progress_stage(State(state.clone()), Path(sid.clone()), "approve".into())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let stage = state.store.get_stage(&sid).unwrap().unwrap();
        assert_eq!(stage.state, StageState::DoneSuccessful);
    }

    #[tokio::test]
    async fn listing_validates_and_filters() {
        let state = test_state();
        created_release(&state).await;

        let resp = list_releases(State(state.clone()), Query(ListQuery::default()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = list_releases(
            State(state.clone()),
            Query(ListQuery {
                limit: Some(0),
                ..Default::default()
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = list_releases(
            State(state.clone()),
            Query(ListQuery {
                since: Some("yesterday".into()),
                ..Default::default()
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = list_releases(
            State(state),
            Query(ListQuery {
                state: Some("mid_flight".into()),
                ..Default::default()
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
