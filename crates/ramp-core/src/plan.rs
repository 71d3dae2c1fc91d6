//! Plan validation.
//!
//! The store only checks plan shape (non-empty lists); the full
//! schedule rules are enforced here, at the API boundary, so invalid
//! plans never reach the orchestrator.

use thiserror::Error;

use crate::types::Plan;

/// Why a plan was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan must include at least one stage")]
    NoStages,

    #[error("plan must include at least one SLO")]
    NoSlos,

    #[error("stage orders must be unique and zero-based (0..n)")]
    BadOrders,

    #[error("stage {order}: target_percent {percent} is out of range (0-100)")]
    PercentOutOfRange { order: u32, percent: u32 },

    #[error("target_percent must be strictly increasing with stage order")]
    PercentNotIncreasing,

    #[error("the last stage must have target_percent 100, got {0}")]
    LastStageNotFull(u32),

    #[error("stage {0}: soak_time must be greater than zero")]
    ZeroSoakTime(u32),

    #[error("SLO values must be non-empty")]
    EmptySlo,
}

impl Plan {
    /// Validate the full schedule rules.
    ///
    /// Stages sorted by `order` must have strictly increasing
    /// percentages, only the last may (and must) be 100, every soak
    /// time is positive, and every SLO has text.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.stages.is_empty() {
            return Err(PlanError::NoStages);
        }
        if self.slos.is_empty() {
            return Err(PlanError::NoSlos);
        }

        let mut sorted: Vec<_> = self.stages.iter().collect();
        sorted.sort_by_key(|s| s.order);

        // Orders are 0..n with no gaps or duplicates.
        if sorted
            .iter()
            .enumerate()
            .any(|(i, s)| s.order != i as u32)
        {
            return Err(PlanError::BadOrders);
        }

        let mut previous_percent: Option<u32> = None;
        for stage in &sorted {
            if stage.target_percent > 100 {
                return Err(PlanError::PercentOutOfRange {
                    order: stage.order,
                    percent: stage.target_percent,
                });
            }
            if stage.soak_time == 0 {
                return Err(PlanError::ZeroSoakTime(stage.order));
            }
            if let Some(prev) = previous_percent {
                if stage.target_percent <= prev {
                    return Err(PlanError::PercentNotIncreasing);
                }
            }
            previous_percent = Some(stage.target_percent);
        }

        let last = sorted.last().unwrap();
        if last.target_percent != 100 {
            return Err(PlanError::LastStageNotFull(last.target_percent));
        }

        if self.slos.iter().any(|s| s.value.trim().is_empty()) {
            return Err(PlanError::EmptySlo);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlanStage, Slo};

    fn stage(order: u32, percent: u32) -> PlanStage {
        PlanStage {
            order,
            target_percent: percent,
            soak_time: 60,
            auto_progress: false,
            description: None,
        }
    }

    fn plan(stages: Vec<PlanStage>) -> Plan {
        Plan {
            stages,
            slos: vec![Slo {
                value: "latency p999 < 100ms".into(),
            }],
            time_last_saved: None,
        }
    }

    #[test]
    fn default_plan_is_valid() {
        assert_eq!(Plan::default_plan().validate(), Ok(()));
    }

    #[test]
    fn empty_stages_rejected() {
        assert_eq!(plan(vec![]).validate(), Err(PlanError::NoStages));
    }

    #[test]
    fn empty_slos_rejected() {
        let mut p = plan(vec![stage(0, 100)]);
        p.slos.clear();
        assert_eq!(p.validate(), Err(PlanError::NoSlos));
    }

    #[test]
    fn duplicate_orders_rejected() {
        let p = plan(vec![stage(0, 10), stage(0, 100)]);
        assert_eq!(p.validate(), Err(PlanError::BadOrders));
    }

    #[test]
    fn gapped_orders_rejected() {
        let p = plan(vec![stage(0, 10), stage(2, 100)]);
        assert_eq!(p.validate(), Err(PlanError::BadOrders));
    }

    #[test]
    fn percent_must_strictly_increase() {
        let p = plan(vec![stage(0, 50), stage(1, 50), stage(2, 100)]);
        assert_eq!(p.validate(), Err(PlanError::PercentNotIncreasing));
    }

    #[test]
    fn last_stage_must_be_full() {
        let p = plan(vec![stage(0, 10), stage(1, 90)]);
        assert_eq!(p.validate(), Err(PlanError::LastStageNotFull(90)));
    }

    #[test]
    fn only_last_stage_may_be_full() {
        // 100 before the end forces a non-increasing or >100 violation.
        let p = plan(vec![stage(0, 100), stage(1, 100)]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn percent_over_100_rejected() {
        let p = plan(vec![stage(0, 101)]);
        assert_eq!(
            p.validate(),
            Err(PlanError::PercentOutOfRange {
                order: 0,
                percent: 101
            })
        );
    }

    #[test]
    fn zero_soak_rejected() {
        let mut s = stage(0, 100);
        s.soak_time = 0;
        assert_eq!(plan(vec![s]).validate(), Err(PlanError::ZeroSoakTime(0)));
    }

    #[test]
    fn blank_slo_rejected() {
        let mut p = plan(vec![stage(0, 100)]);
        p.slos.push(Slo { value: "  ".into() });
        assert_eq!(p.validate(), Err(PlanError::EmptySlo));
    }

    #[test]
    fn unsorted_input_accepted_when_rules_hold() {
        let p = plan(vec![stage(1, 100), stage(0, 25)]);
        assert_eq!(p.validate(), Ok(()));
    }
}
