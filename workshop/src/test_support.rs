//! Test-only helpers: record builders and scripted collaborators.
//!
//! Scripted collaborators pop one response per call and remember every
//! request they receive, so tests can assert on what the orchestrator sent.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::agents::{
    Critic, Critique, CritiqueRequest, GenerateRequest, Generator, PlanRequest, Planner,
    ReviewDecision, Reviewer,
};
use crate::core::score::QualityScore;
use crate::core::types::{
    ArtifactRef, CommissionId, Flaw, FlawSeverity, PlanArtifact, VersionRecord,
};

/// Score without metrics. Panics on non-finite input.
pub fn score(overall: f64) -> QualityScore {
    QualityScore::scalar(overall).expect("finite score")
}

/// Version record with a deterministic artifact name and no flaws.
pub fn record(version_index: u32, plan_revision: u32, overall: f64) -> VersionRecord {
    VersionRecord {
        version_index,
        plan_revision,
        artifact: ArtifactRef(format!("artifact-v{version_index}")),
        score: score(overall),
        flaws: Vec::new(),
    }
}

pub fn plan(summary: &str) -> PlanArtifact {
    PlanArtifact {
        summary: summary.to_string(),
        tasks: vec![format!("{summary} task")],
    }
}

pub fn flaw(severity: FlawSeverity, description: &str) -> Flaw {
    Flaw {
        severity,
        description: description.to_string(),
    }
}

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().expect("script lock").pop_front()
}

fn remember<T: Clone>(log: &Mutex<Vec<T>>, request: &T) {
    log.lock().expect("request lock").push(request.clone());
}

/// Planner returning scripted plans; falls back to `fallback` once drained.
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    responses: Mutex<VecDeque<Result<PlanArtifact, String>>>,
    fallback: Option<PlanArtifact>,
    requests: Mutex<Vec<PlanRequest>>,
}

impl ScriptedPlanner {
    /// Errors are given as messages; an empty script fails every call.
    pub fn new(responses: Vec<Result<PlanArtifact, &str>>) -> Self {
        Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|r| r.map_err(str::to_string))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    /// Return the same plan on every call.
    pub fn always(plan: PlanArtifact) -> Self {
        Self {
            fallback: Some(plan),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<PlanRequest> {
        self.requests.lock().expect("request lock").clone()
    }
}

impl Planner for ScriptedPlanner {
    fn propose_plan(&self, request: &PlanRequest) -> Result<PlanArtifact> {
        remember(&self.requests, request);
        match pop(&self.responses) {
            Some(response) => response.map_err(|msg| anyhow!(msg)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow!("planner script exhausted")),
        }
    }
}

/// Reviewer returning scripted decisions; approves once drained.
#[derive(Debug, Default)]
pub struct ScriptedReviewer {
    responses: Mutex<VecDeque<Result<ReviewDecision, String>>>,
    reviewed: Mutex<Vec<PlanArtifact>>,
}

impl ScriptedReviewer {
    pub fn new(responses: Vec<Result<ReviewDecision, &str>>) -> Self {
        Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|r| r.map_err(str::to_string))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub fn approving() -> Self {
        Self::default()
    }

    pub fn reviewed(&self) -> Vec<PlanArtifact> {
        self.reviewed.lock().expect("request lock").clone()
    }
}

impl Reviewer for ScriptedReviewer {
    fn review(&self, _commission_id: &CommissionId, plan: &PlanArtifact) -> Result<ReviewDecision> {
        remember(&self.reviewed, plan);
        match pop(&self.responses) {
            Some(response) => response.map_err(|msg| anyhow!(msg)),
            None => Ok(ReviewDecision::Approved),
        }
    }
}

/// Generator that names artifacts `artifact-<call number>` (1-based).
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    /// 1-based call numbers that fail.
    failing_calls: Vec<usize>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            failing_calls: calls.to_vec(),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().expect("request lock").clone()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerateRequest) -> Result<ArtifactRef> {
        let call = {
            let mut requests = self.requests.lock().expect("request lock");
            requests.push(request.clone());
            requests.len()
        };
        if self.failing_calls.contains(&call) {
            return Err(anyhow!("generator failed on call {call}"));
        }
        Ok(ArtifactRef(format!("artifact-{call}")))
    }
}

/// Critic returning scripted critiques; fails once drained.
///
/// Scores are not validated here, so tests can feed NaN to the orchestrator.
#[derive(Debug, Default)]
pub struct ScriptedCritic {
    responses: Mutex<VecDeque<Result<Critique, String>>>,
    requests: Mutex<Vec<CritiqueRequest>>,
}

impl ScriptedCritic {
    pub fn new(responses: Vec<Result<f64, &str>>) -> Self {
        Self::from_critiques(responses.into_iter().map(|r| {
            r.map(|overall| raw_critique(overall, Vec::new()))
                .map_err(str::to_string)
        }))
    }

    /// Every call succeeds with the next score.
    pub fn scores(scores: &[f64]) -> Self {
        Self::from_critiques(scores.iter().map(|&overall| Ok(raw_critique(overall, Vec::new()))))
    }

    pub fn with_flaws(responses: Vec<(f64, Vec<Flaw>)>) -> Self {
        Self::from_critiques(
            responses
                .into_iter()
                .map(|(overall, flaws)| Ok(raw_critique(overall, flaws))),
        )
    }

    fn from_critiques(responses: impl Iterator<Item = Result<Critique, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.collect()),
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<CritiqueRequest> {
        self.requests.lock().expect("request lock").clone()
    }
}

impl Critic for ScriptedCritic {
    fn critique(&self, request: &CritiqueRequest) -> Result<Critique> {
        remember(&self.requests, request);
        match pop(&self.responses) {
            Some(response) => response.map_err(|msg| anyhow!(msg)),
            None => Err(anyhow!("critic script exhausted")),
        }
    }
}

fn raw_critique(overall: f64, flaws: Vec<Flaw>) -> Critique {
    Critique {
        score: QualityScore {
            overall,
            metrics: Value::Null,
        },
        flaws,
    }
}
