//! Ordered artifact history for one commission.
//!
//! Reversion never deletes: the dropped record moves to a discard log so the
//! diagnostic trail stays complete.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::VersionRecord;

/// Contract violations. These indicate a bug in the caller, not a runtime
/// condition to recover from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("out-of-order version: expected index {expected}, got {actual}")]
    OutOfOrderVersion { expected: u32, actual: u32 },
    #[error("cannot revert: history holds {len} version(s), need at least 2")]
    NoPriorVersion { len: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactVersionStore {
    history: Vec<VersionRecord>,
    discarded: Vec<VersionRecord>,
}

impl ArtifactVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next appended record must carry.
    pub fn next_version_index(&self) -> u32 {
        self.history.len() as u32
    }

    /// Append a record; its index must equal the current history length.
    pub fn append(&mut self, record: VersionRecord) -> Result<(), StoreError> {
        let expected = self.next_version_index();
        if record.version_index != expected {
            return Err(StoreError::OutOfOrderVersion {
                expected,
                actual: record.version_index,
            });
        }
        self.history.push(record);
        Ok(())
    }

    pub fn latest(&self) -> Option<&VersionRecord> {
        self.history.last()
    }

    /// Drop the most recent record into the discard log and return the one
    /// before it, which becomes the latest.
    pub fn revert_to_last(&mut self) -> Result<&VersionRecord, StoreError> {
        if self.history.len() < 2 {
            return Err(StoreError::NoPriorVersion {
                len: self.history.len(),
            });
        }
        if let Some(dropped) = self.history.pop() {
            self.discarded.push(dropped);
        }
        self.history
            .last()
            .ok_or(StoreError::NoPriorVersion { len: 0 })
    }

    /// Active history, oldest first.
    pub fn history(&self) -> &[VersionRecord] {
        &self.history
    }

    /// Records removed by reversion, in the order they were discarded.
    pub fn discarded(&self) -> &[VersionRecord] {
        &self.discarded
    }

    /// Trailing records generated under `plan_revision`.
    ///
    /// Plan revisions never decrease along the history, so this is a suffix.
    pub fn plan_window(&self, plan_revision: u32) -> &[VersionRecord] {
        let start = self
            .history
            .iter()
            .rposition(|record| record.plan_revision != plan_revision)
            .map_or(0, |idx| idx + 1);
        &self.history[start..]
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
