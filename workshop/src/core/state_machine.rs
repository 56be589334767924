//! Commission lifecycle states and the strict transition table.
//!
//! Every transition is triggered by exactly one event. Pairs not listed in
//! [`next_state`] are rejected; terminal states accept no events.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::policy::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionState {
    Planning,
    Generating,
    Critiquing,
    Reverting,
    Replanning,
    Succeeded,
    Stalemate,
    Escalated,
    Cancelled,
}

impl CommissionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Stalemate | Self::Escalated | Self::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Generating => "generating",
            Self::Critiquing => "critiquing",
            Self::Reverting => "reverting",
            Self::Replanning => "replanning",
            Self::Succeeded => "succeeded",
            Self::Stalemate => "stalemate",
            Self::Escalated => "escalated",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CommissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collaborator results and policy verdicts that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "verdict", rename_all = "snake_case")]
pub enum Event {
    /// The review gate approved the pending plan.
    PlanApproved,
    /// The review gate asked for another plan.
    RevisionRequested,
    /// The planner failed, or the revision budget ran out.
    PlanningExhausted,
    ArtifactProduced,
    /// The generator failed after retries; critique is skipped.
    GenerationFailed,
    /// Policy verdict for a scored (or failed) version.
    Evaluated(Verdict),
    /// A `Continue` verdict that also met the success criterion.
    SuccessReached,
    /// Revert applied for a `RevertAndRetry` verdict.
    RevertedForRetry,
    /// Revert applied for a `RevertAndReplan` verdict.
    RevertedForReplan,
    /// The planner produced a replacement plan.
    ReplanProduced,
    IterationLimitReached,
    CancelRequested,
    /// An internal invariant broke; the commission is halted.
    InternalFault,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid transition: event {event:?} in state {state}")]
    InvalidTransition {
        state: CommissionState,
        event: Event,
    },
}

/// Resolve the state that follows `event` in `state`.
pub fn next_state(state: CommissionState, event: Event) -> Result<CommissionState, TransitionError> {
    use CommissionState as S;

    if state.is_terminal() {
        return Err(TransitionError::InvalidTransition { state, event });
    }

    let next = match (state, event) {
        (_, Event::IterationLimitReached) => S::Stalemate,
        (_, Event::CancelRequested) => S::Cancelled,
        (_, Event::InternalFault) => S::Escalated,

        (S::Planning, Event::PlanApproved) => S::Generating,
        (S::Planning, Event::RevisionRequested) => S::Planning,
        (S::Planning | S::Replanning, Event::PlanningExhausted) => S::Escalated,

        (S::Generating, Event::ArtifactProduced | Event::GenerationFailed) => S::Critiquing,

        (S::Critiquing, Event::SuccessReached) => S::Succeeded,
        (S::Critiquing, Event::Evaluated(verdict)) => match verdict {
            Verdict::Continue | Verdict::EscalateGenerationDiversity => S::Generating,
            Verdict::RevertAndRetry | Verdict::RevertAndReplan => S::Reverting,
            Verdict::CatastrophicEscalation => S::Escalated,
        },

        (S::Reverting, Event::RevertedForRetry) => S::Generating,
        (S::Reverting, Event::RevertedForReplan) => S::Replanning,

        (S::Replanning, Event::ReplanProduced) => S::Planning,

        _ => return Err(TransitionError::InvalidTransition { state, event }),
    };
    Ok(next)
}
