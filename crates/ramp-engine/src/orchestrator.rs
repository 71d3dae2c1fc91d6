//! Release orchestrator — drives one release end-to-end.
//!
//! The control loop is a single logical thread of durably-logged
//! steps: mark the release running, then per stage (ascending order)
//! shift traffic, soak while watching health and the operator stop
//! signal, pass the approval gate, and mark the stage done; finally
//! cut traffic over. Every non-success exit — denial, SLO breach,
//! external stop, crash — reverts traffic to the old version, so the
//! target is never left mid-split without an explicit successful
//! completion.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use ramp_core::{PlanStage, Release, ReleaseState, StageRef, StageState, slo, stage_id};
use ramp_state::StateStore;

use crate::deploy::DeployController;
use crate::error::{EngineError, EngineResult};
use crate::gate::ApprovalGate;
use crate::telemetry::TelemetryClient;
use crate::ticker;

/// Tuning for the orchestrator's timing behavior.
///
/// `poll_interval` is the sleep per soak tick (one tick per second of
/// configured soak time); `gate_recheck` bounds how long the approval
/// gate blocks before re-checking for an external stop. Defaults match
/// production; tests shrink them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name of the service being rolled out, passed to collaborators.
    pub target: String,
    /// Sleep per soak tick.
    pub poll_interval: Duration,
    /// Upper bound on one approval-gate wait before re-checking state.
    pub gate_recheck: Duration,
    /// Period of the elapsed-time tickers.
    pub tick_period: Duration,
}

impl EngineConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            poll_interval: Duration::from_secs(1),
            gate_recheck: Duration::from_secs(2),
            tick_period: Duration::from_secs(1),
        }
    }
}

/// How a stage left the orchestrator's per-stage routine.
enum StageOutcome {
    /// Stage completed; continue with the next one.
    Completed,
    /// The release was stopped or failed; the routine already recorded
    /// terminal state and reverted traffic.
    ReleaseHalted,
}

/// The durable control loop for releases.
///
/// Holds no persistent state of its own; everything it mutates lives
/// in the [`StateStore`], which is what makes `run` resumable.
pub struct Orchestrator {
    store: StateStore,
    deploy: Arc<dyn DeployController>,
    telemetry: Arc<dyn TelemetryClient>,
    gate: ApprovalGate,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        store: StateStore,
        deploy: Arc<dyn DeployController>,
        telemetry: Arc<dyn TelemetryClient>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            deploy,
            telemetry,
            gate: ApprovalGate::new(),
            config,
        }
    }

    /// The wakeup bus the API signals after persisting an
    /// approve/deny verdict.
    pub fn gate(&self) -> ApprovalGate {
        self.gate.clone()
    }

    /// Run (or resume) a release to a terminal state.
    ///
    /// Safe to call again after a crash: completed steps replay as
    /// no-ops. Any unhandled error marks every non-terminal stage
    /// `done_failed`, the release `done_failed_slo`, reverts traffic,
    /// and is then re-raised.
    pub async fn run(&self, release_id: &str) -> EngineResult<()> {
        info!(%release_id, "release orchestration starting");
        match self.run_inner(release_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(%release_id, error = %e, "release orchestration failed");
                if let Err(cleanup) = self.fail_release(release_id).await {
                    error!(%release_id, error = %cleanup, "failure cleanup also failed");
                }
                Err(e)
            }
        }
    }

    async fn run_inner(&self, release_id: &str) -> EngineResult<()> {
        let release = self
            .store
            .get_release(release_id)?
            .ok_or_else(|| EngineError::ReleaseNotFound(release_id.to_string()))?;

        self.step(release_id, "release-running", async {
            self.store
                .update_release_state(release_id, ReleaseState::Running)?;
            Ok(())
        })
        .await?;
        ticker::spawn_release_ticker(self.store.clone(), self.config.tick_period);

        let mut stage_refs = release.stages.clone();
        stage_refs.sort_by_key(|s| s.order);
        let last_order = stage_refs.iter().map(|s| s.order).max().unwrap_or(0);

        for stage_ref in &stage_refs {
            let Some(plan_stage) = release
                .plan_record
                .stages
                .iter()
                .find(|p| p.order == stage_ref.order)
            else {
                error!(%release_id, order = stage_ref.order, "no plan stage for release stage");
                continue;
            };

            match self
                .run_stage(&release, stage_ref, plan_stage, last_order)
                .await?
            {
                StageOutcome::Completed => {}
                StageOutcome::ReleaseHalted => return Ok(()),
            }
        }

        self.step(release_id, "release-done", async {
            self.store
                .update_release_state(release_id, ReleaseState::DoneSuccessful)?;
            self.deploy
                .cutover(&self.config.target, &release.new_version)
                .await
        })
        .await?;
        info!(%release_id, "release completed successfully");
        Ok(())
    }

    /// Execute one stage: traffic shift, soak loop, approval gate.
    async fn run_stage(
        &self,
        release: &Release,
        stage_ref: &StageRef,
        plan_stage: &PlanStage,
        last_order: u32,
    ) -> EngineResult<StageOutcome> {
        let release_id = &release.id;
        let stage_id = &stage_ref.id;
        let order = stage_ref.order;
        info!(
            %release_id,
            order,
            percent = plan_stage.target_percent,
            soak = plan_stage.soak_time,
            "stage starting"
        );

        self.step(release_id, &format!("stage-{order}-start"), async {
            self.store.update_stage_state(stage_id, StageState::Running)?;
            self.deploy
                .set_split(
                    &self.config.target,
                    plan_stage.target_percent,
                    &release.old_version,
                    &release.new_version,
                )
                .await
        })
        .await?;
        ticker::spawn_stage_ticker(
            self.store.clone(),
            stage_id.clone(),
            self.config.tick_period,
        );

        // Soak: one tick per second of configured soak time. The tick
        // marker is written only after the health checks pass, so a
        // replayed tick re-runs its checks.
        for tick in 0..plan_stage.soak_time {
            let marker = format!("stage-{order}-soak-{tick}");
            if self.store.is_step_done(release_id, &marker)? {
                continue;
            }
            tokio::time::sleep(self.config.poll_interval).await;

            // Operator stop lands in the registry, not here.
            let current = self
                .store
                .get_release(release_id)?
                .ok_or_else(|| EngineError::ReleaseNotFound(release_id.clone()))?;
            if current.state != ReleaseState::Running {
                info!(%release_id, order, "release no longer running, cancelling");
                self.cancel_release(release, order).await?;
                return Ok(StageOutcome::ReleaseHalted);
            }

            let to = Utc::now();
            let from = to - chrono::Duration::seconds(self.config.poll_interval.as_secs().max(1) as i64);
            let latency = self
                .telemetry
                .query_latency_percentiles(&self.config.target, from, to)
                .await?;
            if let Some(limit) = slo::p999_limit_ms(&release.plan_record.slos) {
                if latency.p999 > limit {
                    warn!(
                        %release_id,
                        order,
                        p999 = latency.p999,
                        limit,
                        "SLO breached during soak"
                    );
                    self.fail_slo(release, order, latency.p999, limit).await?;
                    return Ok(StageOutcome::ReleaseHalted);
                }
            }

            self.store.mark_step_done(release_id, &marker)?;
        }
        debug!(%release_id, order, "soak completed");

        // Approval gate, skipped for auto-progress stages and the last
        // stage. The verdict is read from the stage's persisted state,
        // so the wait survives restarts; the gate bus only shortens it.
        if !plan_stage.auto_progress && order != last_order {
            self.step(release_id, &format!("stage-{order}-await"), async {
                self.store
                    .update_stage_state(stage_id, StageState::AwaitingApproval)?;
                Ok(())
            })
            .await?;

            loop {
                let stage = self
                    .store
                    .get_stage(stage_id)?
                    .ok_or_else(|| EngineError::StageNotFound(stage_id.clone()))?;
                match stage.state {
                    StageState::DoneSuccessful => {
                        info!(%release_id, order, "stage approved");
                        self.gate.forget(stage_id);
                        break;
                    }
                    StageState::DoneCancelled => {
                        info!(%release_id, order, "stage denied, stopping release");
                        self.gate.forget(stage_id);
                        self.step(release_id, &format!("stage-{order}-deny-cancel"), async {
                            self.store.cancel_stages_from(release_id, order + 1)?;
                            self.store.update_release_state(
                                release_id,
                                ReleaseState::DoneStoppedManually,
                            )?;
                            self.deploy
                                .revert(&self.config.target, &release.old_version)
                                .await
                        })
                        .await?;
                        return Ok(StageOutcome::ReleaseHalted);
                    }
                    StageState::DoneFailed => {
                        warn!(%release_id, order, "stage failed while awaiting approval");
                        self.gate.forget(stage_id);
                        self.step(release_id, &format!("stage-{order}-fail-cancel"), async {
                            self.store.cancel_stages_from(release_id, order + 1)?;
                            self.store
                                .update_release_state(release_id, ReleaseState::DoneFailedSlo)?;
                            self.deploy
                                .revert(&self.config.target, &release.old_version)
                                .await
                        })
                        .await?;
                        return Ok(StageOutcome::ReleaseHalted);
                    }
                    _ => {
                        let current = self
                            .store
                            .get_release(release_id)?
                            .ok_or_else(|| EngineError::ReleaseNotFound(release_id.clone()))?;
                        if current.state != ReleaseState::Running {
                            info!(%release_id, order, "release stopped while awaiting approval");
                            self.gate.forget(stage_id);
                            self.cancel_release(release, order).await?;
                            return Ok(StageOutcome::ReleaseHalted);
                        }
                        let notify = self.gate.subscribe(stage_id);
                        let _ = tokio::time::timeout(self.config.gate_recheck, notify.notified())
                            .await;
                    }
                }
            }
        }

        self.step(release_id, &format!("stage-{order}-done"), async {
            self.store
                .update_stage_state(stage_id, StageState::DoneSuccessful)?;
            Ok(())
        })
        .await?;
        info!(%release_id, order, "stage completed");
        Ok(StageOutcome::Completed)
    }

    /// External-cancellation path: the operator already moved the
    /// release out of `running`; converge stages and revert traffic.
    async fn cancel_release(&self, release: &Release, from_order: u32) -> EngineResult<()> {
        self.store.cancel_stages_from(&release.id, from_order)?;
        self.store
            .update_release_state(&release.id, ReleaseState::DoneStoppedManually)?;
        self.deploy
            .revert(&self.config.target, &release.old_version)
            .await?;
        info!(id = %release.id, "release cancelled, traffic reverted");
        Ok(())
    }

    /// SLO-violation path: fail the current stage, cancel the rest,
    /// revert traffic.
    async fn fail_slo(
        &self,
        release: &Release,
        order: u32,
        observed_p999: f64,
        limit_ms: f64,
    ) -> EngineResult<()> {
        let sid = stage_id(&release.id, order);
        self.store.add_stage_log(
            &sid,
            &format!("SLO violated: p999 {observed_p999:.1}ms exceeds {limit_ms:.1}ms"),
        )?;
        self.store.update_stage_state(&sid, StageState::DoneFailed)?;
        self.store.cancel_stages_from(&release.id, order + 1)?;
        self.store
            .update_release_state(&release.id, ReleaseState::DoneFailedSlo)?;
        self.deploy
            .revert(&self.config.target, &release.old_version)
            .await?;
        warn!(id = %release.id, order, "release failed SLOs, traffic reverted");
        Ok(())
    }

    /// Crash path: fail every non-terminal stage, mark the release
    /// failed, revert best-effort. Re-marking terminal records is a
    /// no-op, so replaying this handler is safe.
    async fn fail_release(&self, release_id: &str) -> EngineResult<()> {
        let Some(release) = self.store.get_release(release_id)? else {
            return Ok(());
        };

        for stage_ref in &release.stages {
            if let Some(stage) = self.store.get_stage(&stage_ref.id)? {
                if !stage.state.is_terminal() {
                    self.store
                        .update_stage_state(&stage_ref.id, StageState::DoneFailed)?;
                }
            }
        }
        self.store
            .update_release_state(release_id, ReleaseState::DoneFailedSlo)?;

        if let Err(e) = self
            .deploy
            .revert(&self.config.target, &release.old_version)
            .await
        {
            error!(%release_id, error = %e, "traffic revert failed during failure handling");
        }
        Ok(())
    }

    /// Run a named step unless the ledger already has it.
    ///
    /// The completion marker is written after the action succeeds, so
    /// a crash between action and marker re-runs the action — every
    /// step body must therefore be idempotent (state transitions are
    /// no-ops when already applied; controller calls set desired
    /// state).
    async fn step<Fut>(&self, release_id: &str, name: &str, action: Fut) -> EngineResult<()>
    where
        Fut: Future<Output = EngineResult<()>>,
    {
        if self.store.is_step_done(release_id, name)? {
            debug!(%release_id, step = name, "step already done, skipping");
            return Ok(());
        }
        action.await?;
        self.store.mark_step_done(release_id, name)?;
        Ok(())
    }
}
