//! Collaborator contracts for planning, review, generation, and critique.
//!
//! The orchestrator only talks to these traits. Implementations may be
//! rule-based, template-based, model-backed, or external commands
//! ([`command`]); tests use scripted doubles from `test_support`.
//!
//! Every call returns `anyhow::Result`. A returned error is a collaborator
//! failure: the orchestrator retries it with backoff and, once the retry
//! budget is spent, maps it onto the worst-case policy branch.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::score::QualityScore;
use crate::core::types::{ArtifactRef, CommissionId, Flaw, GenerationSignal, PlanArtifact};

pub mod command;

/// Input for [`Planner::propose_plan`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanRequest {
    pub commission_id: CommissionId,
    pub prompt: String,
    /// Feedback accumulated for this commission, oldest first.
    pub feedback: Vec<PlanFeedback>,
}

/// Why a previous plan was not good enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanFeedback {
    /// The review gate rejected the plan.
    RevisionRequested {
        rationale: String,
        focus_areas: Vec<String>,
    },
    /// Artifacts kept regressing under the plan.
    Regression { scores: Vec<f64>, flaws: Vec<Flaw> },
}

/// Outcome of the strategic review gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    RevisionRequested {
        rationale: String,
        focus_areas: Vec<String>,
    },
}

impl ReviewDecision {
    /// A revision request must say why and where to focus.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Approved => Ok(()),
            Self::RevisionRequested {
                rationale,
                focus_areas,
            } => {
                if rationale.trim().is_empty() {
                    return Err(anyhow!("revision request is missing a rationale"));
                }
                if focus_areas.is_empty() {
                    return Err(anyhow!("revision request must name at least one focus area"));
                }
                Ok(())
            }
        }
    }
}

/// Input for [`Generator::generate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub commission_id: CommissionId,
    pub plan: PlanArtifact,
    /// Latest active artifact, if any, to revise rather than start over.
    pub prior_artifact: Option<ArtifactRef>,
    /// Flaws reported on `prior_artifact`.
    pub flaws: Vec<Flaw>,
    pub signal: Option<GenerationSignal>,
}

/// Input for [`Critic::critique`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CritiqueRequest {
    pub commission_id: CommissionId,
    pub artifact: ArtifactRef,
    pub plan: PlanArtifact,
}

/// Score and flaw list for one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    #[serde(flatten)]
    pub score: QualityScore,
    #[serde(default)]
    pub flaws: Vec<Flaw>,
}

pub trait Planner {
    fn propose_plan(&self, request: &PlanRequest) -> Result<PlanArtifact>;
}

pub trait Reviewer {
    fn review(&self, commission_id: &CommissionId, plan: &PlanArtifact) -> Result<ReviewDecision>;
}

pub trait Generator {
    fn generate(&self, request: &GenerateRequest) -> Result<ArtifactRef>;
}

pub trait Critic {
    fn critique(&self, request: &CritiqueRequest) -> Result<Critique>;
}

/// Review gate that approves every plan.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl Reviewer for AutoApprove {
    fn review(&self, _commission_id: &CommissionId, _plan: &PlanArtifact) -> Result<ReviewDecision> {
        Ok(ReviewDecision::Approved)
    }
}

/// The four collaborators a commission needs.
#[derive(Debug, Clone)]
pub struct Agents<P, R, G, C> {
    pub planner: P,
    pub reviewer: R,
    pub generator: G,
    pub critic: C,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn revision_request_requires_rationale_and_focus() {
        let missing_focus = ReviewDecision::RevisionRequested {
            rationale: "too broad".to_string(),
            focus_areas: Vec::new(),
        };
        assert!(
            missing_focus
                .validate()
                .expect_err("no focus")
                .to_string()
                .contains("focus area")
        );

        let blank = ReviewDecision::RevisionRequested {
            rationale: "  ".to_string(),
            focus_areas: vec!["scope".to_string()],
        };
        assert!(blank.validate().is_err());
        assert!(ReviewDecision::Approved.validate().is_ok());
    }

    #[test]
    fn review_decision_parses_tagged_json() {
        let decision: ReviewDecision = serde_json::from_value(json!({
            "decision": "revision_requested",
            "rationale": "over-engineered for an MVP",
            "focus_areas": ["modules.reporting"]
        }))
        .expect("parse");
        assert_eq!(
            decision,
            ReviewDecision::RevisionRequested {
                rationale: "over-engineered for an MVP".to_string(),
                focus_areas: vec!["modules.reporting".to_string()],
            }
        );
    }

    #[test]
    fn critique_flattens_score_fields() {
        let critique: Critique = serde_json::from_value(json!({
            "overall": 0.82,
            "metrics": { "coverage": 0.7 },
            "flaws": [{ "severity": "high", "description": "no tests for parser" }]
        }))
        .expect("parse");
        assert_eq!(critique.score.overall, 0.82);
        assert_eq!(critique.score.metrics["coverage"], 0.7);
        assert_eq!(critique.flaws.len(), 1);
    }

    #[test]
    fn auto_approve_approves() {
        let id = CommissionId::parse("c-1").expect("id");
        let plan = PlanArtifact {
            summary: "anything".to_string(),
            tasks: Vec::new(),
        };
        assert_eq!(
            AutoApprove.review(&id, &plan).expect("review"),
            ReviewDecision::Approved
        );
    }
}
