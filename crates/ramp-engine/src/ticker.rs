//! Elapsed-time tickers.
//!
//! One background task per running entity refreshes its persisted
//! `time_elapsed`. Tickers terminate themselves by observing the
//! store: once the entity leaves `running`, the next tick reports
//! false and the task exits. That also makes them restart-safe — a
//! respawned ticker for an already-finished entity exits on its first
//! tick.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::error;

use ramp_state::StateStore;

/// Refresh `time_elapsed` for running releases until none remain.
pub fn spawn_release_ticker(store: StateStore, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            match store.tick_release_elapsed() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    error!(error = %e, "release elapsed tick failed");
                    break;
                }
            }
        }
    })
}

/// Refresh one stage's `time_elapsed` while it is running.
pub fn spawn_stage_ticker(store: StateStore, stage_id: String, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            match store.tick_stage_elapsed(&stage_id) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    error!(error = %e, %stage_id, "stage elapsed tick failed");
                    break;
                }
            }
        }
    })
}
