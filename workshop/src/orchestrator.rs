//! Drives one commission through plan, generate, and critique cycles.
//!
//! The orchestrator is the only code that mutates a [`Commission`]. Each loop
//! turn handles the current state, calls at most one collaborator, and feeds
//! exactly one event into the transition table. Collaborator failures are
//! retried with backoff and then mapped onto the intervention policy; broken
//! internal invariants halt the commission as `Escalated`.

use std::thread;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::agents::{
    Agents, Critic, CritiqueRequest, GenerateRequest, Generator, PlanFeedback, PlanRequest,
    Planner, ReviewDecision, Reviewer,
};
use crate::commission::{CancelToken, Commission, CommissionStatus, Outcome};
use crate::core::backoff::RetryPolicy;
use crate::core::diagnostics::{DiagnosticInput, DiagnosticPackage, EscalationReason, assemble};
use crate::core::policy::{PolicyConfig, Verdict, evaluate, meets_success};
use crate::core::score::QualityScore;
use crate::core::state_machine::{CommissionState, Event, TransitionError};
use crate::core::types::{ArtifactRef, GenerationSignal, VersionRecord};
use crate::core::version_store::StoreError;
use crate::io::config::{LimitsConfig, WorkshopConfig};

/// Knobs the loop needs; a subset of [`WorkshopConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopConfig {
    pub policy: PolicyConfig,
    pub limits: LimitsConfig,
    pub retry: RetryPolicy,
}

impl From<&WorkshopConfig> for LoopConfig {
    fn from(config: &WorkshopConfig) -> Self {
        Self {
            policy: config.policy.clone(),
            limits: config.limits.clone(),
            retry: config.retry.clone(),
        }
    }
}

/// Internal invariant violation. Never recovered.
#[derive(Debug, Error)]
enum Fault {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("{0}")]
    Invariant(&'static str),
}

/// Why a collaborator call did not return a value.
enum CallError {
    Cancelled,
    Failed(anyhow::Error),
}

/// Per-run scratch state that never outlives [`Orchestrator::run`].
#[derive(Default)]
struct RunScratch {
    feedback: Vec<PlanFeedback>,
    revisions: u32,
    /// A replan already proposed the plan waiting in `plan_history`.
    plan_pending_review: bool,
    signal: Option<GenerationSignal>,
    diversity_level: u32,
    /// Artifact produced in `Generating`, consumed by `Critiquing`.
    produced: Option<ArtifactRef>,
    /// Revert verdict and whether the regressed version was appended.
    pending_revert: Option<(Verdict, bool)>,
}

/// What one state handler decided.
enum Step {
    Next,
    Done(Outcome),
}

pub struct Orchestrator<'a, P, R, G, C> {
    agents: &'a Agents<P, R, G, C>,
    config: &'a LoopConfig,
}

impl<'a, P, R, G, C> Orchestrator<'a, P, R, G, C>
where
    P: Planner,
    R: Reviewer,
    G: Generator,
    C: Critic,
{
    pub fn new(agents: &'a Agents<P, R, G, C>, config: &'a LoopConfig) -> Self {
        Self { agents, config }
    }

    /// Run `commission` to a terminal state.
    ///
    /// `on_status` observes a fresh snapshot after every step. Running a
    /// commission that is already terminal is reported as an internal fault
    /// and leaves its state untouched.
    #[instrument(skip_all, fields(commission = %commission.id()))]
    pub fn run(
        &self,
        commission: &mut Commission,
        cancel: &CancelToken,
        on_status: &mut dyn FnMut(&CommissionStatus),
    ) -> Outcome {
        info!(prompt_len = commission.prompt().len(), "commission started");
        let outcome = match self.drive(commission, cancel, on_status) {
            Ok(outcome) => outcome,
            Err(fault) => fault_outcome(commission, fault.to_string()),
        };
        commission.set_summary(outcome.summary());
        info!(state = %commission.state(), summary = %outcome.summary(), "commission finished");
        on_status(&commission.status());
        outcome
    }

    fn drive(
        &self,
        commission: &mut Commission,
        cancel: &CancelToken,
        on_status: &mut dyn FnMut(&CommissionStatus),
    ) -> Result<Outcome, Fault> {
        let mut scratch = RunScratch::default();
        loop {
            on_status(&commission.status());
            let step = match commission.state() {
                CommissionState::Planning => self.plan(commission, cancel, &mut scratch)?,
                CommissionState::Generating => self.generate(commission, cancel, &mut scratch)?,
                CommissionState::Critiquing => self.critique(commission, cancel, &mut scratch)?,
                CommissionState::Reverting => revert(commission, &mut scratch)?,
                CommissionState::Replanning => self.replan(commission, cancel, &mut scratch)?,
                CommissionState::Succeeded
                | CommissionState::Stalemate
                | CommissionState::Escalated
                | CommissionState::Cancelled => {
                    return Err(Fault::Invariant("drive loop reached a terminal state"));
                }
            };
            if let Step::Done(outcome) = step {
                return Ok(outcome);
            }
        }
    }

    fn plan(
        &self,
        commission: &mut Commission,
        cancel: &CancelToken,
        scratch: &mut RunScratch,
    ) -> Result<Step, Fault> {
        if cancel.is_cancelled() {
            return cancelled(commission);
        }

        if scratch.plan_pending_review {
            scratch.plan_pending_review = false;
        } else {
            let request = PlanRequest {
                commission_id: commission.id().clone(),
                prompt: commission.prompt().to_string(),
                feedback: scratch.feedback.clone(),
            };
            match self.call("planner", commission, cancel, || {
                self.agents.planner.propose_plan(&request)
            }) {
                Ok(plan) => {
                    debug!(summary = %plan.summary, tasks = plan.tasks.len(), "plan proposed");
                    commission.record_proposed_plan(plan);
                }
                Err(CallError::Cancelled) => return cancelled(commission),
                Err(CallError::Failed(err)) => {
                    return planning_failed(commission, format!("planner failed: {err:#}"));
                }
            }
        }

        let plan = commission
            .plan_history()
            .last()
            .cloned()
            .ok_or(Fault::Invariant("no proposed plan to review"))?;
        let decision = self.call("reviewer", commission, cancel, || {
            let decision = self.agents.reviewer.review(commission.id(), &plan)?;
            decision.validate()?;
            Ok(decision)
        });
        match decision {
            Ok(ReviewDecision::Approved) => {
                commission.accept_latest_plan();
                info!(plan_revision = commission.plan_revision(), "plan approved");
                commission.transition(Event::PlanApproved)?;
                Ok(Step::Next)
            }
            Ok(ReviewDecision::RevisionRequested {
                rationale,
                focus_areas,
            }) => {
                scratch.revisions += 1;
                let max = self.config.limits.max_plan_revisions;
                if scratch.revisions > max {
                    warn!(revisions = scratch.revisions, max, "revision loop exhausted");
                    commission.transition(Event::PlanningExhausted)?;
                    let summary = format!(
                        "review requested {} revisions, more than the {max} allowed",
                        scratch.revisions
                    );
                    return Ok(Step::Done(Outcome::Escalated {
                        diagnostics: diagnostics(
                            commission,
                            Some(EscalationReason::RevisionLoopExhausted {
                                revisions: scratch.revisions,
                            }),
                            summary,
                        ),
                    }));
                }
                info!(revisions = scratch.revisions, %rationale, "review requested a revision");
                scratch.feedback.push(PlanFeedback::RevisionRequested {
                    rationale,
                    focus_areas,
                });
                commission.transition(Event::RevisionRequested)?;
                Ok(Step::Next)
            }
            Err(CallError::Cancelled) => cancelled(commission),
            Err(CallError::Failed(err)) => {
                planning_failed(commission, format!("review failed: {err:#}"))
            }
        }
    }

    fn generate(
        &self,
        commission: &mut Commission,
        cancel: &CancelToken,
        scratch: &mut RunScratch,
    ) -> Result<Step, Fault> {
        let max_iterations = self.config.limits.max_iterations;
        if commission.iteration_count() >= max_iterations {
            warn!(
                iterations = commission.iteration_count(),
                max_iterations, "iteration limit reached"
            );
            commission.transition(Event::IterationLimitReached)?;
            let summary = format!(
                "stalemate: {max_iterations} iteration(s) under plan revision {} without success",
                commission.plan_revision()
            );
            let history = commission.store().history().to_vec();
            return Ok(Step::Done(Outcome::Stalemate {
                last_artifact: commission.store().latest().map(|r| r.artifact.clone()),
                history,
                diagnostics: diagnostics(commission, None, summary),
            }));
        }
        if cancel.is_cancelled() {
            return cancelled(commission);
        }

        let plan = commission
            .plan()
            .cloned()
            .ok_or(Fault::Invariant("generating without an accepted plan"))?;
        let latest = commission.store().latest();
        let request = GenerateRequest {
            commission_id: commission.id().clone(),
            plan,
            prior_artifact: latest.map(|r| r.artifact.clone()),
            flaws: latest.map(|r| r.flaws.clone()).unwrap_or_default(),
            signal: scratch.signal.take(),
        };
        commission.start_iteration();
        debug!(
            iteration = commission.iteration_count(),
            signal = ?request.signal,
            "generating"
        );

        match self.call("generator", commission, cancel, || {
            self.agents.generator.generate(&request)
        }) {
            Ok(artifact) => {
                scratch.produced = Some(artifact);
                commission.transition(Event::ArtifactProduced)?;
            }
            Err(CallError::Cancelled) => return cancelled(commission),
            Err(CallError::Failed(err)) => {
                commission.record_failure(format!(
                    "generation failed at iteration {}: {err:#}",
                    commission.iteration_count()
                ));
                scratch.produced = None;
                commission.transition(Event::GenerationFailed)?;
            }
        }
        Ok(Step::Next)
    }

    fn critique(
        &self,
        commission: &mut Commission,
        cancel: &CancelToken,
        scratch: &mut RunScratch,
    ) -> Result<Step, Fault> {
        let plan_revision = commission.plan_revision();

        let (current, appended) = match scratch.produced.take() {
            Some(artifact) => {
                if cancel.is_cancelled() {
                    return cancelled(commission);
                }
                let plan = commission
                    .plan()
                    .cloned()
                    .ok_or(Fault::Invariant("critiquing without an accepted plan"))?;
                let request = CritiqueRequest {
                    commission_id: commission.id().clone(),
                    artifact: artifact.clone(),
                    plan,
                };
                let critique = self.call("critic", commission, cancel, || {
                    let critique = self.agents.critic.critique(&request)?;
                    critique.score.validate()?;
                    Ok(critique)
                });
                match critique {
                    Ok(critique) => {
                        let record = VersionRecord {
                            version_index: commission.store.next_version_index(),
                            plan_revision,
                            artifact,
                            score: critique.score.clone(),
                            flaws: critique.flaws,
                        };
                        commission.store.append(record)?;
                        (critique.score, true)
                    }
                    Err(CallError::Cancelled) => return cancelled(commission),
                    Err(CallError::Failed(err)) => {
                        commission.record_failure(format!(
                            "scoring failed at iteration {}: {err:#}",
                            commission.iteration_count()
                        ));
                        (QualityScore::worst(), false)
                    }
                }
            }
            None => (QualityScore::worst(), false),
        };

        let window = commission.store().plan_window(plan_revision);
        let prev = if appended {
            window.len().checked_sub(2).map(|idx| &window[idx])
        } else {
            window.last()
        };
        let decision = evaluate(
            prev.map(|r| &r.score),
            &current,
            commission.intervention(),
            &self.config.policy,
        );
        let scores: Vec<f64> = window.iter().map(|r| r.score.overall).collect();
        commission.intervention = decision.state;
        info!(
            version = ?appended.then(|| commission.store.len() - 1),
            score = current.overall,
            verdict = ?decision.verdict,
            stagnation = decision.state.consecutive_stagnation,
            regression = decision.state.consecutive_regression,
            "version evaluated"
        );

        match decision.verdict {
            Verdict::Continue => {
                if appended && meets_success(&scores, &self.config.policy) {
                    commission.transition(Event::SuccessReached)?;
                    let latest = commission
                        .store()
                        .latest()
                        .ok_or(Fault::Invariant("success without a version"))?;
                    return Ok(Step::Done(Outcome::Succeeded {
                        artifact: latest.artifact.clone(),
                        score: latest.score.clone(),
                    }));
                }
            }
            Verdict::EscalateGenerationDiversity => {
                scratch.diversity_level += 1;
                scratch.signal = Some(GenerationSignal::IncreaseExploration {
                    level: scratch.diversity_level,
                });
            }
            Verdict::RevertAndRetry | Verdict::RevertAndReplan => {
                scratch.pending_revert = Some((decision.verdict, appended));
            }
            Verdict::CatastrophicEscalation => {
                commission.transition(Event::Evaluated(decision.verdict))?;
                let summary = format!(
                    "regression persisted after replanning; best score {}",
                    best_score_label(commission)
                );
                return Ok(Step::Done(Outcome::Escalated {
                    diagnostics: diagnostics(
                        commission,
                        Some(EscalationReason::Catastrophic),
                        summary,
                    ),
                }));
            }
        }
        commission.transition(Event::Evaluated(decision.verdict))?;
        Ok(Step::Next)
    }

    fn replan(
        &self,
        commission: &mut Commission,
        cancel: &CancelToken,
        scratch: &mut RunScratch,
    ) -> Result<Step, Fault> {
        if cancel.is_cancelled() {
            return cancelled(commission);
        }
        let window = commission.store().plan_window(commission.plan_revision());
        scratch.feedback.push(PlanFeedback::Regression {
            scores: window.iter().map(|r| r.score.overall).collect(),
            flaws: window.last().map(|r| r.flaws.clone()).unwrap_or_default(),
        });
        let request = PlanRequest {
            commission_id: commission.id().clone(),
            prompt: commission.prompt().to_string(),
            feedback: scratch.feedback.clone(),
        };
        match self.call("planner", commission, cancel, || {
            self.agents.planner.propose_plan(&request)
        }) {
            Ok(plan) => {
                info!(summary = %plan.summary, "replacement plan proposed");
                commission.record_proposed_plan(plan);
                scratch.plan_pending_review = true;
                commission.transition(Event::ReplanProduced)?;
                Ok(Step::Next)
            }
            Err(CallError::Cancelled) => cancelled(commission),
            Err(CallError::Failed(err)) => {
                planning_failed(commission, format!("replanning failed: {err:#}"))
            }
        }
    }

    /// Call a collaborator, retrying failures with backoff.
    ///
    /// Cancellation is checked between attempts. Only the final failure is
    /// reported to the caller.
    fn call<T>(
        &self,
        role: &'static str,
        commission: &Commission,
        cancel: &CancelToken,
        mut attempt: impl FnMut() -> Result<T>,
    ) -> Result<T, CallError> {
        let retry = &self.config.retry;
        let mut retries = 0u32;
        loop {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(err) if retries < retry.attempts => {
                    let delay = retry.delay(retries);
                    warn!(
                        commission = %commission.id(),
                        role,
                        retry = retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %format!("{err:#}"),
                        "collaborator call failed, retrying"
                    );
                    retries += 1;
                    if cancel.is_cancelled() {
                        return Err(CallError::Cancelled);
                    }
                    thread::sleep(delay);
                    if cancel.is_cancelled() {
                        return Err(CallError::Cancelled);
                    }
                }
                Err(err) => {
                    warn!(
                        commission = %commission.id(),
                        role,
                        attempts = retries + 1,
                        error = %format!("{err:#}"),
                        "collaborator call failed"
                    );
                    return Err(CallError::Failed(err));
                }
            }
        }
    }
}

fn revert(commission: &mut Commission, scratch: &mut RunScratch) -> Result<Step, Fault> {
    let (verdict, appended) = scratch
        .pending_revert
        .take()
        .ok_or(Fault::Invariant("reverting without a revert verdict"))?;
    if appended {
        let restored = commission.store.revert_to_last()?;
        info!(
            version = restored.version_index,
            score = restored.score.overall,
            "reverted to previous version"
        );
    } else {
        debug!("failed attempt was never recorded, nothing to revert");
    }
    match verdict {
        Verdict::RevertAndRetry => {
            scratch.signal = Some(GenerationSignal::ChangeStrategy);
            commission.transition(Event::RevertedForRetry)?;
        }
        Verdict::RevertAndReplan => {
            commission.transition(Event::RevertedForReplan)?;
        }
        Verdict::Continue | Verdict::EscalateGenerationDiversity | Verdict::CatastrophicEscalation => {
            return Err(Fault::Invariant("revert verdict expected"));
        }
    }
    Ok(Step::Next)
}

/// Halt `commission` after a broken invariant, dumping its full state.
pub(crate) fn fault_outcome(commission: &mut Commission, detail: String) -> Outcome {
    error!(
        commission = %commission.id(),
        state = %commission.state(),
        error = %detail,
        dump = ?commission,
        "internal fault, halting commission"
    );
    commission.halt_on_fault();
    let summary = format!("internal fault: {detail}");
    Outcome::Escalated {
        diagnostics: diagnostics(
            commission,
            Some(EscalationReason::InternalFault { detail }),
            summary,
        ),
    }
}

fn cancelled(commission: &mut Commission) -> Result<Step, Fault> {
    info!(commission = %commission.id(), "cancellation observed");
    commission.transition(Event::CancelRequested)?;
    Ok(Step::Done(Outcome::Cancelled {
        history: commission.store().history().to_vec(),
    }))
}

fn planning_failed(commission: &mut Commission, detail: String) -> Result<Step, Fault> {
    commission.record_failure(detail.clone());
    commission.transition(Event::PlanningExhausted)?;
    let summary = format!("escalated: {detail}");
    Ok(Step::Done(Outcome::Escalated {
        diagnostics: diagnostics(
            commission,
            Some(EscalationReason::PlanningFailed { detail }),
            summary,
        ),
    }))
}

fn diagnostics(
    commission: &Commission,
    reason: Option<EscalationReason>,
    summary: String,
) -> DiagnosticPackage {
    assemble(DiagnosticInput {
        reason,
        summary,
        store: commission.store(),
        plan_history: commission.plan_history(),
        failures: commission.failures(),
    })
}

fn best_score_label(commission: &Commission) -> String {
    crate::core::diagnostics::last_known_good(commission.store().history())
        .map(|r| format!("{:.3} at version {}", r.score.overall, r.version_index))
        .unwrap_or_else(|| "n/a".to_string())
}
