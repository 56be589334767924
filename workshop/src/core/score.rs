//! Quality scores produced by the external critic.
//!
//! The core never computes a score. It only validates, compares, and
//! subtracts them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A scored artifact version (`C(v)`). Higher is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Scalar quality on the critic's scale.
    pub overall: f64,
    /// Opaque per-metric breakdown, carried for reporting only.
    #[serde(default)]
    pub metrics: Value,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    #[error("overall score must be finite, got {0}")]
    NonFinite(f64),
}

impl QualityScore {
    /// Build a score, rejecting NaN and infinities.
    pub fn new(overall: f64, metrics: Value) -> Result<Self, ScoreError> {
        if !overall.is_finite() {
            return Err(ScoreError::NonFinite(overall));
        }
        Ok(Self { overall, metrics })
    }

    /// Score without a metric breakdown.
    pub fn scalar(overall: f64) -> Result<Self, ScoreError> {
        Self::new(overall, Value::Null)
    }

    /// Stand-in for a failed generation or critique.
    ///
    /// Compares below every finite score, so any delta against it is a
    /// regression. Never stored in a version record.
    pub fn worst() -> Self {
        Self {
            overall: f64::NEG_INFINITY,
            metrics: Value::Null,
        }
    }

    /// Check a score received from outside the process.
    pub fn validate(&self) -> Result<(), ScoreError> {
        if !self.overall.is_finite() {
            return Err(ScoreError::NonFinite(self.overall));
        }
        Ok(())
    }
}

/// `ΔC = curr - prev`.
pub fn delta(prev: &QualityScore, curr: &QualityScore) -> f64 {
    curr.overall - prev.overall
}
