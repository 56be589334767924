//! Lifecycle tests driving commissions through the public `Workshop` API.
//!
//! Collaborators are scripted; each test checks the terminal outcome, the
//! status snapshot, and the history a caller can observe.

use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::Result;
use workshop::agents::{Agents, GenerateRequest, Generator};
use workshop::commission::Outcome;
use workshop::core::backoff::RetryPolicy;
use workshop::core::diagnostics::EscalationReason;
use workshop::core::state_machine::CommissionState;
use workshop::core::types::{ArtifactRef, CommissionId};
use workshop::orchestrator::LoopConfig;
use workshop::test_support::{
    ScriptedCritic, ScriptedGenerator, ScriptedPlanner, ScriptedReviewer, plan,
};
use workshop::workshop::Workshop;

fn config() -> LoopConfig {
    LoopConfig {
        retry: RetryPolicy::none(),
        ..LoopConfig::default()
    }
}

fn scripted(
    scores: &[f64],
) -> Agents<ScriptedPlanner, ScriptedReviewer, ScriptedGenerator, ScriptedCritic> {
    Agents {
        planner: ScriptedPlanner::always(plan("plan")),
        reviewer: ScriptedReviewer::approving(),
        generator: ScriptedGenerator::new(),
        critic: ScriptedCritic::scores(scores),
    }
}

/// Scores `[0.85, 0.84, 0.83]` replan once; a second regression streak under
/// the new plan escalates with the full trail.
#[test]
fn regression_ladder_ends_in_catastrophic_escalation() {
    let workshop = Workshop::new(scripted(&[0.85, 0.84, 0.83, 0.85, 0.80, 0.75]), config());
    let id = workshop.submit_commission("write a parser").expect("submit");
    let outcome = workshop.wait(&id).expect("wait");

    let Outcome::Escalated { diagnostics } = outcome else {
        panic!("expected escalation, got {outcome:?}");
    };
    assert_eq!(diagnostics.reason, Some(EscalationReason::Catastrophic));
    assert_eq!(diagnostics.plan_history.len(), 2);
    let discarded: Vec<f64> = diagnostics
        .score_history
        .iter()
        .filter(|p| p.discarded)
        .map(|p| p.overall)
        .collect();
    assert_eq!(discarded, vec![0.84, 0.83, 0.80]);

    let status = workshop.get_status(&id).expect("status");
    assert_eq!(status.state, CommissionState::Escalated);
    assert_eq!(status.plan_revision, 2);
    assert_eq!(status.latest_score, Some(0.75));
}

/// Two commissions run side by side on separate workers.
#[test]
fn concurrent_commissions_each_reach_a_terminal_state() {
    let mut config = config();
    config.limits.max_iterations = 5;
    let workshop = Workshop::new(scripted(&[0.7, 0.9, 0.95, 0.5, 0.6, 0.7]), config);
    let first = CommissionId::parse("first").expect("id");
    let second = CommissionId::parse("second").expect("id");
    workshop
        .submit_with_id(first.clone(), "one")
        .expect("submit");
    workshop
        .submit_with_id(second.clone(), "two")
        .expect("submit");

    for id in [&first, &second] {
        let outcome = workshop.wait(id).expect("wait");
        let status = workshop.get_status(id).expect("status");
        assert_eq!(&status.id, id);
        assert_eq!(status.state, outcome.state());
        assert!(status.state.is_terminal());
        assert!(status.iteration_count <= 5);
    }
}

/// Generator that blocks on its second call until released.
struct GatedGenerator {
    inner: ScriptedGenerator,
    started: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl Generator for GatedGenerator {
    fn generate(&self, request: &GenerateRequest) -> Result<ArtifactRef> {
        let artifact = self.inner.generate(request)?;
        if self.inner.requests().len() == 2 {
            self.started.lock().expect("lock").send(()).expect("signal start");
            self.release.lock().expect("lock").recv().expect("await release");
        }
        Ok(artifact)
    }
}

/// Cancelling mid-generation stops before the next critique call.
#[test]
fn cancel_during_generation_returns_partial_history() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let workshop = Workshop::new(
        Agents {
            planner: ScriptedPlanner::always(plan("plan")),
            reviewer: ScriptedReviewer::approving(),
            generator: GatedGenerator {
                inner: ScriptedGenerator::new(),
                started: Mutex::new(started_tx),
                release: Mutex::new(release_rx),
            },
            critic: ScriptedCritic::scores(&[0.5, 0.6, 0.7]),
        },
        config(),
    );

    let id = workshop.submit_commission("p").expect("submit");
    started_rx.recv().expect("second generate call");
    assert_eq!(
        workshop.get_status(&id).expect("status").state,
        CommissionState::Generating
    );
    workshop.cancel(&id).expect("cancel");
    release_tx.send(()).expect("release");

    match workshop.wait(&id).expect("wait") {
        Outcome::Cancelled { history } => {
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].score.overall, 0.5);
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(
        workshop.get_status(&id).expect("status").state,
        CommissionState::Cancelled
    );
}

/// A stalled commission stops at the iteration bound with its last artifact.
#[test]
fn iteration_bound_yields_stalemate() {
    let mut config = config();
    config.limits.max_iterations = 4;
    let workshop = Workshop::new(scripted(&[0.5, 0.5, 0.5, 0.5, 0.5]), config);
    let id = workshop.submit_commission("p").expect("submit");

    match workshop.wait(&id).expect("wait") {
        Outcome::Stalemate {
            last_artifact,
            history,
            ..
        } => {
            assert_eq!(history.len(), 4);
            assert_eq!(last_artifact, Some(ArtifactRef("artifact-4".to_string())));
        }
        other => panic!("expected stalemate, got {other:?}"),
    }
    let status = workshop.get_status(&id).expect("status");
    assert_eq!(status.iteration_count, 4);
    assert!(status.summary.expect("summary").contains("stalemate"));
}
