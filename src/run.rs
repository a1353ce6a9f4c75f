//! Run phase state machine.
//!
//! Terraform Cloud reports a run status string on every read. [`RunPhase`]
//! enumerates the full set so the per-phase dispatch stays exhaustive, and
//! [`RunPhase::disposition`] collapses each phase into the one of four
//! actions the reconciler takes.

use serde::{Deserialize, Serialize};

/// Status of a Terraform Cloud run as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Fetching,
    PlanQueued,
    Planning,
    Planned,
    CostEstimating,
    CostEstimated,
    PolicyChecking,
    PolicyOverride,
    PolicySoftFailed,
    PolicyChecked,
    Confirmed,
    PostPlanRunning,
    PostPlanCompleted,
    ApplyQueued,
    Applying,
    Applied,
    Discarded,
    Errored,
    Canceled,
    ForceCanceled,
    PlannedAndFinished,
    /// Statuses introduced by newer API versions; always treated as in progress.
    #[serde(other)]
    Unknown,
}

/// What the reconciler does with the current run phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDisposition {
    /// Run has not finished; poll again later.
    InProgress,
    /// Run applied successfully; extract outputs and mark ready.
    Applied,
    /// Plan-only workflow finished without applying; nothing further to do.
    PlannedAndFinished,
    /// Run ended without applying; recorded and not retried automatically.
    Failed(FailureReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Discarded,
    Canceled,
    Errored,
}

impl RunPhase {
    pub fn disposition(self) -> RunDisposition {
        match self {
            RunPhase::Applied => RunDisposition::Applied,
            RunPhase::PlannedAndFinished => RunDisposition::PlannedAndFinished,
            RunPhase::Discarded => RunDisposition::Failed(FailureReason::Discarded),
            RunPhase::Canceled | RunPhase::ForceCanceled => {
                RunDisposition::Failed(FailureReason::Canceled)
            }
            RunPhase::Errored | RunPhase::PolicySoftFailed => {
                RunDisposition::Failed(FailureReason::Errored)
            }
            RunPhase::Pending
            | RunPhase::Fetching
            | RunPhase::PlanQueued
            | RunPhase::Planning
            | RunPhase::Planned
            | RunPhase::CostEstimating
            | RunPhase::CostEstimated
            | RunPhase::PolicyChecking
            | RunPhase::PolicyOverride
            | RunPhase::PolicyChecked
            | RunPhase::Confirmed
            | RunPhase::PostPlanRunning
            | RunPhase::PostPlanCompleted
            | RunPhase::ApplyQueued
            | RunPhase::Applying
            | RunPhase::Unknown => RunDisposition::InProgress,
        }
    }

    /// Wire name of the phase, persisted verbatim into the status subresource.
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Pending => "pending",
            RunPhase::Fetching => "fetching",
            RunPhase::PlanQueued => "plan_queued",
            RunPhase::Planning => "planning",
            RunPhase::Planned => "planned",
            RunPhase::CostEstimating => "cost_estimating",
            RunPhase::CostEstimated => "cost_estimated",
            RunPhase::PolicyChecking => "policy_checking",
            RunPhase::PolicyOverride => "policy_override",
            RunPhase::PolicySoftFailed => "policy_soft_failed",
            RunPhase::PolicyChecked => "policy_checked",
            RunPhase::Confirmed => "confirmed",
            RunPhase::PostPlanRunning => "post_plan_running",
            RunPhase::PostPlanCompleted => "post_plan_completed",
            RunPhase::ApplyQueued => "apply_queued",
            RunPhase::Applying => "applying",
            RunPhase::Applied => "applied",
            RunPhase::Discarded => "discarded",
            RunPhase::Errored => "errored",
            RunPhase::Canceled => "canceled",
            RunPhase::ForceCanceled => "force_canceled",
            RunPhase::PlannedAndFinished => "planned_and_finished",
            RunPhase::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases_never_report_in_progress() {
        for phase in [
            RunPhase::Applied,
            RunPhase::PlannedAndFinished,
            RunPhase::Discarded,
            RunPhase::Canceled,
            RunPhase::ForceCanceled,
            RunPhase::Errored,
        ] {
            assert_ne!(phase.disposition(), RunDisposition::InProgress, "{phase}");
        }
    }

    #[test]
    fn in_flight_phases_keep_polling() {
        for phase in [
            RunPhase::Pending,
            RunPhase::PlanQueued,
            RunPhase::Planning,
            RunPhase::CostEstimating,
            RunPhase::PolicyChecking,
            RunPhase::ApplyQueued,
            RunPhase::Applying,
            RunPhase::Unknown,
        ] {
            assert_eq!(phase.disposition(), RunDisposition::InProgress, "{phase}");
        }
    }

    #[test]
    fn only_applied_triggers_output_extraction() {
        let applied: Vec<RunPhase> = [
            RunPhase::Pending,
            RunPhase::Planning,
            RunPhase::Applied,
            RunPhase::Discarded,
            RunPhase::Canceled,
            RunPhase::Errored,
            RunPhase::PlannedAndFinished,
        ]
        .into_iter()
        .filter(|p| p.disposition() == RunDisposition::Applied)
        .collect();
        assert_eq!(applied, vec![RunPhase::Applied]);
    }

    #[test]
    fn wire_names_round_trip() {
        for (phase, wire) in [
            (RunPhase::PlanQueued, "\"plan_queued\""),
            (RunPhase::PlannedAndFinished, "\"planned_and_finished\""),
            (RunPhase::Applied, "\"applied\""),
            (RunPhase::ForceCanceled, "\"force_canceled\""),
        ] {
            assert_eq!(serde_json::to_string(&phase).unwrap(), wire);
            assert_eq!(serde_json::from_str::<RunPhase>(wire).unwrap(), phase);
        }
    }

    #[test]
    fn unrecognized_status_parses_as_unknown() {
        let phase: RunPhase = serde_json::from_str("\"queuing_apply_v2\"").unwrap();
        assert_eq!(phase, RunPhase::Unknown);
        assert_eq!(phase.disposition(), RunDisposition::InProgress);
    }
}
