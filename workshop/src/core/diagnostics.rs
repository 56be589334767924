//! Diagnostic packages assembled when a commission ends without success.

use serde::{Deserialize, Serialize};

use crate::core::types::{Flaw, FlawSeverity, PlanArtifact, VersionRecord};
use crate::core::version_store::ArtifactVersionStore;

/// Why a commission was handed to a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    /// The planner could not produce a plan within its retry budget.
    PlanningFailed { detail: String },
    /// The review gate kept requesting revisions.
    RevisionLoopExhausted { revisions: u32 },
    /// Regression persisted after a full replan.
    Catastrophic,
    /// An internal invariant broke; the commission state was dumped.
    InternalFault { detail: String },
}

/// One point of the score trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorePoint {
    pub version_index: u32,
    pub plan_revision: u32,
    pub overall: f64,
    pub discarded: bool,
}

/// Bundle handed to a human reviewer at escalation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticPackage {
    pub reason: Option<EscalationReason>,
    pub summary: String,
    /// Active history followed by discarded versions.
    pub score_history: Vec<ScorePoint>,
    pub last_known_good: Option<VersionRecord>,
    pub unresolved_flaws: Vec<Flaw>,
    pub plan_history: Vec<PlanArtifact>,
    /// Collaborator failures observed along the way.
    pub failures: Vec<String>,
}

/// Inputs gathered from the commission at a terminal state.
pub struct DiagnosticInput<'a> {
    pub reason: Option<EscalationReason>,
    pub summary: String,
    pub store: &'a ArtifactVersionStore,
    pub plan_history: &'a [PlanArtifact],
    pub failures: &'a [String],
}

pub fn assemble(input: DiagnosticInput<'_>) -> DiagnosticPackage {
    let mut score_history: Vec<ScorePoint> = input
        .store
        .history()
        .iter()
        .map(|record| score_point(record, false))
        .collect();
    score_history.extend(
        input
            .store
            .discarded()
            .iter()
            .map(|record| score_point(record, true)),
    );

    DiagnosticPackage {
        reason: input.reason,
        summary: input.summary,
        score_history,
        last_known_good: last_known_good(input.store.history()).cloned(),
        unresolved_flaws: unresolved_flaws(input.store.history()),
        plan_history: input.plan_history.to_vec(),
        failures: input.failures.to_vec(),
    }
}

/// Highest-scoring active version; the later one wins ties.
pub fn last_known_good(history: &[VersionRecord]) -> Option<&VersionRecord> {
    history
        .iter()
        .rev()
        .reduce(|best, record| {
            if record.score.overall > best.score.overall {
                record
            } else {
                best
            }
        })
}

/// Critical flaws still present on the latest active version.
pub fn unresolved_flaws(history: &[VersionRecord]) -> Vec<Flaw> {
    history
        .last()
        .map(|record| {
            record
                .flaws
                .iter()
                .filter(|flaw| flaw.severity == FlawSeverity::Critical)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn score_point(record: &VersionRecord, discarded: bool) -> ScorePoint {
    ScorePoint {
        version_index: record.version_index,
        plan_revision: record.plan_revision,
        overall: record.score.overall,
        discarded,
    }
}
