//! Plan store — the singleton rollout plan.
//!
//! The plan lives under a single key. Reading before anything was
//! saved seeds and returns the built-in default plan. Updates only
//! check shape (non-empty stage/SLO lists); the full schedule rules
//! are enforced at the API boundary.

use chrono::Utc;
use tracing::debug;

use ramp_core::Plan;

use crate::error::{StateError, StateResult};
use crate::store::StateStore;
use crate::tables::PLANS;

/// Singleton key the plan is stored under.
const PLAN_KEY: &str = "main";

impl StateStore {
    /// Get the current plan, seeding the default on first read.
    pub fn get_plan(&self) -> StateResult<Plan> {
        if let Some(plan) = self.read_json::<Plan>(PLANS, PLAN_KEY)? {
            return Ok(plan);
        }
        let plan = Plan::default_plan();
        self.write_json(PLANS, PLAN_KEY, &plan)?;
        debug!("seeded default plan");
        Ok(plan)
    }

    /// Replace the plan. Stamps `time_last_saved` and persists.
    pub fn update_plan(&self, plan: &Plan) -> StateResult<Plan> {
        if plan.stages.is_empty() || plan.slos.is_empty() {
            return Err(StateError::Invalid(
                "plan must include stages and slos".to_string(),
            ));
        }
        let mut stored = plan.clone();
        stored.time_last_saved = Some(Utc::now());
        self.write_json(PLANS, PLAN_KEY, &stored)?;
        debug!(stages = stored.stages.len(), "plan updated");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ramp_core::{PlanStage, Slo};

    #[test]
    fn first_read_seeds_default() {
        let store = StateStore::open_in_memory().unwrap();
        let plan = store.get_plan().unwrap();
        assert_eq!(plan, Plan::default_plan());

        // Seeded, so a second read returns the same stored plan.
        let again = store.get_plan().unwrap();
        assert_eq!(again, plan);
    }

    #[test]
    fn update_stamps_time_and_persists() {
        let store = StateStore::open_in_memory().unwrap();
        let plan = Plan {
            stages: vec![PlanStage {
                order: 0,
                target_percent: 100,
                soak_time: 5,
                auto_progress: true,
                description: Some("straight to full".into()),
            }],
            slos: vec![Slo {
                value: "p999 < 50ms".into(),
            }],
            time_last_saved: None,
        };

        let stored = store.update_plan(&plan).unwrap();
        assert!(stored.time_last_saved.is_some());

        let read = store.get_plan().unwrap();
        assert_eq!(read, stored);
    }

    #[test]
    fn update_rejects_empty_lists() {
        let store = StateStore::open_in_memory().unwrap();
        let mut plan = Plan::default_plan();
        plan.stages.clear();
        assert!(matches!(
            store.update_plan(&plan),
            Err(StateError::Invalid(_))
        ));

        let mut plan = Plan::default_plan();
        plan.slos.clear();
        assert!(matches!(
            store.update_plan(&plan),
            Err(StateError::Invalid(_))
        ));
    }
}
