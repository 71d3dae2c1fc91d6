//! Approval gate wakeups.
//!
//! The durable outcome of an approval gate is the stage's own
//! persisted state (`done_successful` or `done_cancelled`, written by
//! `progress_stage`). This in-process bus only makes the waiting
//! orchestrator notice promptly; losing a wakeup costs at most one
//! `gate_recheck` interval, never correctness.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// Per-stage wakeup channel between the API and the orchestrator.
#[derive(Clone, Default)]
pub struct ApprovalGate {
    inner: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, stage_id: &str) -> Arc<Notify> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(stage_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Get the wakeup handle the orchestrator waits on.
    pub fn subscribe(&self, stage_id: &str) -> Arc<Notify> {
        self.entry(stage_id)
    }

    /// Wake a waiter after an approve/deny verdict was persisted.
    /// The permit is stored, so signalling before the wait is safe.
    pub fn signal(&self, stage_id: &str) {
        self.entry(stage_id).notify_one();
    }

    /// Drop the channel once a stage has left the gate.
    pub fn forget(&self, stage_id: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(stage_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_wakes_waiter() {
        let gate = ApprovalGate::new();
        let notify = gate.subscribe("release-aaaa0001-order-0");

        gate.signal("release-aaaa0001-order-0");
        tokio::time::timeout(Duration::from_millis(100), notify.notified())
            .await
            .expect("waiter should wake");
    }

    #[tokio::test]
    async fn signal_before_subscribe_is_not_lost() {
        let gate = ApprovalGate::new();
        gate.signal("release-aaaa0001-order-0");

        let notify = gate.subscribe("release-aaaa0001-order-0");
        tokio::time::timeout(Duration::from_millis(100), notify.notified())
            .await
            .expect("stored permit should wake");
    }

    #[tokio::test]
    async fn forget_drops_channel() {
        let gate = ApprovalGate::new();
        gate.signal("release-aaaa0001-order-0");
        gate.forget("release-aaaa0001-order-0");

        // A fresh channel has no stored permit.
        let notify = gate.subscribe("release-aaaa0001-order-0");
        let waited =
            tokio::time::timeout(Duration::from_millis(20), notify.notified()).await;
        assert!(waited.is_err());
    }
}
