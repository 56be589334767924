//! The commission aggregate: one prompt, its history, and its outcome.
//!
//! Only the orchestrator mutates a [`Commission`], and only through
//! [`Commission::transition`] and the narrow recording methods below.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::diagnostics::DiagnosticPackage;
use crate::core::policy::InterventionState;
use crate::core::score::QualityScore;
use crate::core::state_machine::{CommissionState, Event, TransitionError, next_state};
use crate::core::types::{ArtifactRef, CommissionId, PlanArtifact, VersionRecord};
use crate::core::version_store::ArtifactVersionStore;

#[derive(Debug, Clone)]
pub struct Commission {
    id: CommissionId,
    prompt: String,
    state: CommissionState,
    plan: Option<PlanArtifact>,
    /// Every plan the planner proposed, accepted or not.
    plan_history: Vec<PlanArtifact>,
    /// Number of accepted plans; the current plan's revision.
    plan_revision: u32,
    pub(crate) store: ArtifactVersionStore,
    pub(crate) intervention: InterventionState,
    /// Generate/critique cycles since the last plan acceptance.
    iteration_count: u32,
    total_iterations: u32,
    failures: Vec<String>,
    summary: Option<String>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Commission {
    pub fn new(id: CommissionId, prompt: impl Into<String>) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            state: CommissionState::Planning,
            plan: None,
            plan_history: Vec::new(),
            plan_revision: 0,
            store: ArtifactVersionStore::new(),
            intervention: InterventionState::default(),
            iteration_count: 0,
            total_iterations: 0,
            failures: Vec::new(),
            summary: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn id(&self) -> &CommissionId {
        &self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn state(&self) -> CommissionState {
        self.state
    }

    pub fn plan(&self) -> Option<&PlanArtifact> {
        self.plan.as_ref()
    }

    pub fn plan_history(&self) -> &[PlanArtifact] {
        &self.plan_history
    }

    pub fn plan_revision(&self) -> u32 {
        self.plan_revision
    }

    pub fn store(&self) -> &ArtifactVersionStore {
        &self.store
    }

    pub fn intervention(&self) -> InterventionState {
        self.intervention
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    /// Cycles across all plans.
    pub fn total_iterations(&self) -> u32 {
        self.total_iterations
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// Apply one event through the transition table.
    ///
    /// On error the state is left unchanged.
    pub fn transition(&mut self, event: Event) -> Result<CommissionState, TransitionError> {
        let next = next_state(self.state, event)?;
        info!(
            commission = %self.id,
            from = %self.state,
            to = %next,
            ?event,
            "commission transition"
        );
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(next)
    }

    /// Force the commission into `Escalated` after an internal fault.
    ///
    /// Goes through the table when the fault event is still accepted; a
    /// commission that is somehow already terminal keeps its state.
    pub(crate) fn halt_on_fault(&mut self) {
        if self.transition(Event::InternalFault).is_err() && self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }

    pub(crate) fn record_proposed_plan(&mut self, plan: PlanArtifact) {
        self.plan_history.push(plan);
    }

    /// Accept the most recently proposed plan and open a new plan window.
    pub(crate) fn accept_latest_plan(&mut self) {
        self.plan = self.plan_history.last().cloned();
        self.plan_revision += 1;
        self.iteration_count = 0;
    }

    pub(crate) fn start_iteration(&mut self) {
        self.iteration_count += 1;
        self.total_iterations += 1;
    }

    pub(crate) fn record_failure(&mut self, failure: String) {
        self.failures.push(failure);
    }

    pub(crate) fn set_summary(&mut self, summary: String) {
        self.summary = Some(summary);
    }

    pub fn status(&self) -> CommissionStatus {
        CommissionStatus {
            id: self.id.clone(),
            state: self.state,
            latest_score: self.store.latest().map(|record| record.score.overall),
            iteration_count: self.iteration_count,
            plan_revision: self.plan_revision,
            summary: self.summary.clone(),
        }
    }

    /// Persistable snapshot, including the outcome's diagnostics if any.
    pub fn record(&self, outcome: Option<&Outcome>) -> CommissionRecord {
        CommissionRecord {
            id: self.id.clone(),
            prompt: self.prompt.clone(),
            state: self.state,
            plan_history: self.plan_history.clone(),
            history: self.store.history().to_vec(),
            discarded: self.store.discarded().to_vec(),
            intervention: self.intervention,
            iteration_count: self.iteration_count,
            failures: self.failures.clone(),
            created_at: self.created_at.to_rfc3339(),
            finished_at: self.finished_at.map(|at| at.to_rfc3339()),
            summary: outcome
                .map(Outcome::summary)
                .or_else(|| self.summary.clone())
                .unwrap_or_default(),
            diagnostics: outcome.and_then(Outcome::diagnostics).cloned(),
        }
    }
}

/// Snapshot returned by the status API. Always well-formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionStatus {
    pub id: CommissionId,
    pub state: CommissionState,
    pub latest_score: Option<f64>,
    pub iteration_count: u32,
    pub plan_revision: u32,
    /// Human-readable summary, set once the commission is terminal.
    pub summary: Option<String>,
}

/// Terminal result handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded {
        artifact: ArtifactRef,
        score: QualityScore,
    },
    Stalemate {
        last_artifact: Option<ArtifactRef>,
        history: Vec<VersionRecord>,
        diagnostics: DiagnosticPackage,
    },
    Escalated {
        diagnostics: DiagnosticPackage,
    },
    Cancelled {
        history: Vec<VersionRecord>,
    },
}

impl Outcome {
    pub fn state(&self) -> CommissionState {
        match self {
            Self::Succeeded { .. } => CommissionState::Succeeded,
            Self::Stalemate { .. } => CommissionState::Stalemate,
            Self::Escalated { .. } => CommissionState::Escalated,
            Self::Cancelled { .. } => CommissionState::Cancelled,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Succeeded { artifact, score } => {
                format!("succeeded with {artifact} (score {:.3})", score.overall)
            }
            Self::Stalemate { diagnostics, .. } | Self::Escalated { diagnostics } => {
                diagnostics.summary.clone()
            }
            Self::Cancelled { history } => {
                format!("cancelled after {} version(s)", history.len())
            }
        }
    }

    pub fn diagnostics(&self) -> Option<&DiagnosticPackage> {
        match self {
            Self::Stalemate { diagnostics, .. } | Self::Escalated { diagnostics } => {
                Some(diagnostics)
            }
            Self::Succeeded { .. } | Self::Cancelled { .. } => None,
        }
    }
}

/// One archived commission (`<archive_dir>/<id>.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: CommissionId,
    pub prompt: String,
    pub state: CommissionState,
    pub plan_history: Vec<PlanArtifact>,
    pub history: Vec<VersionRecord>,
    pub discarded: Vec<VersionRecord>,
    pub intervention: InterventionState,
    pub iteration_count: u32,
    pub failures: Vec<String>,
    pub created_at: String,
    pub finished_at: Option<String>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DiagnosticPackage>,
}

/// Cooperative cancellation flag shared with a running commission.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
