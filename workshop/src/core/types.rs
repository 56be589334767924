//! Shared deterministic types for the commission core.
//!
//! These types define stable contracts between the core, the collaborators,
//! and the persisted commission record. They carry no I/O.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::score::QualityScore;

/// Opaque commission identifier, safe to use as a file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommissionId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("id must not be empty")]
    Empty,
    #[error("id must be [A-Za-z0-9._-] only (got '{0}')")]
    InvalidCharacters(String),
}

impl CommissionId {
    pub fn parse(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        if id
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
        {
            return Err(IdError::InvalidCharacters(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CommissionId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<CommissionId> for String {
    fn from(value: CommissionId) -> Self {
        value.0
    }
}

impl fmt::Display for CommissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Plan produced by the planner. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanArtifact {
    pub summary: String,
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// Handle to an artifact owned by the generator (usually a path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlawSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A single problem reported by the critic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flaw {
    pub severity: FlawSeverity,
    pub description: String,
}

/// One scored artifact version. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Position in the active history (contiguous from 0).
    pub version_index: u32,
    /// Plan revision the artifact was generated under (1-based).
    pub plan_revision: u32,
    pub artifact: ArtifactRef,
    pub score: QualityScore,
    pub flaws: Vec<Flaw>,
}

/// Hint attached to the next generate call after an intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationSignal {
    /// The previous attempt regressed; try a different approach on the same plan.
    ChangeStrategy,
    /// Progress has stalled; explore more widely. `level` counts escalations so far.
    IncreaseExploration { level: u32 },
}
