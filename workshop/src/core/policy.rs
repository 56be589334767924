//! Tiered intervention policy.
//!
//! [`evaluate`] is a pure function of the previous score, the current score,
//! the intervention counters, and the configuration. The orchestrator applies
//! the side effects of the returned verdict.
//!
//! Rules, first match wins:
//!
//! 1. No previous version under the current plan: `Continue`, counters reset.
//! 2. `delta >= epsilon`: `Continue`, counters reset.
//! 3. `delta < 0`: regression. At `k_regression` consecutive regressions the
//!    commission replans once, then escalates to a human; below the bound it
//!    reverts and retries with a strategy change.
//! 4. Otherwise stagnation. At `k_stagnation` consecutive stagnant iterations
//!    the generator is asked to diversify and the streak restarts.

use serde::{Deserialize, Serialize};

use crate::core::score::{QualityScore, delta};

/// Thresholds for the decision table and the success criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Smallest delta that counts as meaningful improvement.
    pub epsilon: f64,
    /// Consecutive stagnant iterations before a diversity escalation.
    pub k_stagnation: u32,
    /// Consecutive regressions before a replan (or human escalation).
    pub k_regression: u32,
    /// Score at or above which a commission may succeed.
    pub success_threshold: f64,
    /// Number of trailing non-negative deltas required for success.
    pub k_success: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.01,
            k_stagnation: 3,
            k_regression: 2,
            success_threshold: 0.90,
            k_success: 2,
        }
    }
}

/// Counters carried alongside a commission between evaluations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionState {
    pub consecutive_stagnation: u32,
    pub consecutive_regression: u32,
    /// Set once a regression-triggered replan has run.
    pub replan_attempted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Continue,
    /// Tier 1: ask the generator for more exploration.
    EscalateGenerationDiversity,
    /// Tier 2: drop the regressed version and retry on the same plan.
    RevertAndRetry,
    /// Tier 2: drop the regressed version and produce a new plan.
    RevertAndReplan,
    /// Tier 3: halt and hand the commission to a human.
    CatastrophicEscalation,
}

/// Verdict plus the counters to carry into the next evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub state: InterventionState,
}

/// Decide the next action for a freshly scored version.
pub fn evaluate(
    prev: Option<&QualityScore>,
    curr: &QualityScore,
    state: InterventionState,
    config: &PolicyConfig,
) -> Decision {
    let mut next = state;

    let Some(prev) = prev else {
        next.consecutive_stagnation = 0;
        next.consecutive_regression = 0;
        return Decision {
            verdict: Verdict::Continue,
            state: next,
        };
    };

    let change = delta(prev, curr);

    if change >= config.epsilon {
        next.consecutive_stagnation = 0;
        next.consecutive_regression = 0;
        return Decision {
            verdict: Verdict::Continue,
            state: next,
        };
    }

    if change < 0.0 {
        next.consecutive_stagnation = 0;
        next.consecutive_regression = next.consecutive_regression.saturating_add(1);
        let verdict = if next.consecutive_regression >= config.k_regression {
            if next.replan_attempted {
                Verdict::CatastrophicEscalation
            } else {
                next.replan_attempted = true;
                next.consecutive_regression = 0;
                Verdict::RevertAndReplan
            }
        } else {
            Verdict::RevertAndRetry
        };
        return Decision {
            verdict,
            state: next,
        };
    }

    // 0 <= change < epsilon: flat scores are stagnation, not failure.
    next.consecutive_regression = 0;
    next.consecutive_stagnation = next.consecutive_stagnation.saturating_add(1);
    let verdict = if next.consecutive_stagnation >= config.k_stagnation {
        next.consecutive_stagnation = 0;
        Verdict::EscalateGenerationDiversity
    } else {
        Verdict::Continue
    };
    Decision {
        verdict,
        state: next,
    }
}

/// Success criterion, checked when the verdict is `Continue`.
///
/// `scores` are the overall scores generated under the current plan, oldest
/// first; the last one is the version just scored. It must reach the
/// threshold and the last `k_success` deltas must all be non-negative.
pub fn meets_success(scores: &[f64], config: &PolicyConfig) -> bool {
    let Some(&current) = scores.last() else {
        return false;
    };
    if current < config.success_threshold {
        return false;
    }
    let required = config.k_success as usize;
    if scores.len() <= required {
        return required == 0;
    }
    scores[scores.len() - required - 1..]
        .windows(2)
        .all(|pair| pair[1] - pair[0] >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(value: f64) -> QualityScore {
        QualityScore::scalar(value).expect("score")
    }

    fn config() -> PolicyConfig {
        PolicyConfig::default()
    }

    /// Feed a score sequence through `evaluate`, returning every verdict.
    fn run(scores: &[f64], initial: InterventionState) -> (Vec<Verdict>, InterventionState) {
        let cfg = config();
        let mut state = initial;
        let mut verdicts = Vec::new();
        let mut prev: Option<QualityScore> = None;
        for &value in scores {
            let curr = score(value);
            let decision = evaluate(prev.as_ref(), &curr, state, &cfg);
            verdicts.push(decision.verdict);
            state = decision.state;
            // Reverting verdicts keep the previous version as the comparison base.
            if !matches!(
                decision.verdict,
                Verdict::RevertAndRetry | Verdict::RevertAndReplan
            ) {
                prev = Some(curr);
            }
        }
        (verdicts, state)
    }

    #[test]
    fn first_version_always_continues() {
        for value in [0.0, 0.7, -5.0, 1.0] {
            let state = InterventionState {
                consecutive_stagnation: 2,
                consecutive_regression: 1,
                replan_attempted: true,
            };
            let decision = evaluate(None, &score(value), state, &config());
            assert_eq!(decision.verdict, Verdict::Continue);
            assert_eq!(decision.state.consecutive_stagnation, 0);
            assert_eq!(decision.state.consecutive_regression, 0);
            assert!(decision.state.replan_attempted);
        }
    }

    #[test]
    fn meaningful_improvement_continues_and_resets() {
        let state = InterventionState {
            consecutive_stagnation: 2,
            consecutive_regression: 1,
            replan_attempted: false,
        };
        let decision = evaluate(Some(&score(0.70)), &score(0.85), state, &config());
        assert_eq!(decision.verdict, Verdict::Continue);
        assert_eq!(decision.state, InterventionState::default());
    }

    #[test]
    fn single_regression_reverts_and_retries() {
        let decision = evaluate(
            Some(&score(0.85)),
            &score(0.84),
            InterventionState::default(),
            &config(),
        );
        assert_eq!(decision.verdict, Verdict::RevertAndRetry);
        assert_eq!(decision.state.consecutive_regression, 1);
        assert!(!decision.state.replan_attempted);
    }

    #[test]
    fn second_consecutive_regression_replans_once() {
        let (verdicts, state) = run(&[0.85, 0.84, 0.83], InterventionState::default());
        assert_eq!(
            verdicts,
            vec![
                Verdict::Continue,
                Verdict::RevertAndRetry,
                Verdict::RevertAndReplan
            ]
        );
        assert!(state.replan_attempted);
        assert_eq!(state.consecutive_regression, 0);
    }

    #[test]
    fn regression_after_replan_escalates_catastrophically() {
        let after_replan = InterventionState {
            replan_attempted: true,
            ..InterventionState::default()
        };
        let (verdicts, _) = run(&[0.85, 0.80, 0.75], after_replan);
        assert_eq!(
            verdicts,
            vec![
                Verdict::Continue,
                Verdict::RevertAndRetry,
                Verdict::CatastrophicEscalation
            ]
        );
    }

    #[test]
    fn third_stagnant_iteration_escalates_diversity() {
        let (verdicts, state) = run(&[0.70, 0.705, 0.706, 0.706], InterventionState::default());
        assert_eq!(
            verdicts,
            vec![
                Verdict::Continue,
                Verdict::Continue,
                Verdict::Continue,
                Verdict::EscalateGenerationDiversity
            ]
        );
        assert_eq!(state.consecutive_stagnation, 0);
    }

    #[test]
    fn zero_delta_is_stagnation() {
        let decision = evaluate(
            Some(&score(0.5)),
            &score(0.5),
            InterventionState {
                consecutive_regression: 1,
                ..InterventionState::default()
            },
            &config(),
        );
        assert_eq!(decision.verdict, Verdict::Continue);
        assert_eq!(decision.state.consecutive_stagnation, 1);
        assert_eq!(decision.state.consecutive_regression, 0);
    }

    #[test]
    fn improvement_resets_stagnation_streak() {
        let cfg = config();
        let near_limit = InterventionState {
            consecutive_stagnation: cfg.k_stagnation - 1,
            ..InterventionState::default()
        };
        let decision = evaluate(Some(&score(0.5)), &score(0.6), near_limit, &cfg);
        assert_eq!(decision.verdict, Verdict::Continue);
        assert_eq!(decision.state.consecutive_stagnation, 0);
    }

    #[test]
    fn worst_score_counts_as_regression() {
        let decision = evaluate(
            Some(&score(0.5)),
            &QualityScore::worst(),
            InterventionState::default(),
            &config(),
        );
        assert_eq!(decision.verdict, Verdict::RevertAndRetry);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let cfg = PolicyConfig {
            epsilon: 0.05,
            k_stagnation: 2,
            k_regression: 3,
            ..PolicyConfig::default()
        };
        let state = InterventionState {
            consecutive_stagnation: 1,
            consecutive_regression: 2,
            replan_attempted: true,
        };
        let first = evaluate(Some(&score(0.4)), &score(0.42), state, &cfg);
        for _ in 0..10 {
            assert_eq!(evaluate(Some(&score(0.4)), &score(0.42), state, &cfg), first);
        }
        assert_eq!(first.verdict, Verdict::EscalateGenerationDiversity);
    }

    #[test]
    fn success_requires_threshold_and_non_negative_trailing_deltas() {
        let cfg = config();
        assert!(meets_success(&[0.85, 0.90, 0.95], &cfg));
        assert!(meets_success(&[0.99, 0.85, 0.90, 0.95], &cfg));
        assert!(!meets_success(&[0.95, 0.97, 0.96], &cfg));
        assert!(!meets_success(&[0.80, 0.85, 0.89], &cfg));
        assert!(!meets_success(&[0.90, 0.95], &cfg));
        assert!(!meets_success(&[], &cfg));
    }

    #[test]
    fn success_with_zero_trailing_deltas_only_needs_threshold() {
        let cfg = PolicyConfig {
            k_success: 0,
            ..PolicyConfig::default()
        };
        assert!(meets_success(&[0.95], &cfg));
        assert!(!meets_success(&[0.5], &cfg));
    }
}
