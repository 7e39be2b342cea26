//! Per-target alert state storage
//!
//! The [`StateStore`] trait is the contract the alert engine and the HTTP
//! handlers rely on. Backends serialize all mutations for a given target id,
//! so a liveness report can never interleave with a scheduler decision for
//! the same target.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mutable state tracked for a single target.
///
/// Absent timestamps are `None`, never a zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    /// Last liveness report
    pub last_acted: Option<DateTime<Utc>>,
    /// Time of the outstanding alert, if any
    pub last_alerted: Option<DateTime<Utc>>,
    /// Suppresses alert dispatch until the next liveness report
    #[serde(default)]
    pub muted: bool,
}

impl TargetState {
    /// Whether an alert is currently outstanding
    pub fn alert_outstanding(&self) -> bool {
        self.last_alerted.is_some()
    }

    /// Apply a liveness report: the target proved it is alive.
    pub fn record_liveness(&mut self, now: DateTime<Utc>) {
        self.last_acted = Some(now);
        self.last_alerted = None;
        self.muted = false;
    }
}

/// Storage backend for [`TargetState`] records.
///
/// Reading an id that was never written yields `TargetState::default()`.
pub trait StateStore: Send + Sync {
    /// Read the current state of a target
    fn get_state(&self, id: &str) -> Result<TargetState, StoreError>;

    /// Atomically read, modify and write one target's state.
    fn update(
        &self,
        id: &str,
        f: &mut dyn FnMut(&mut TargetState),
    ) -> Result<TargetState, StoreError>;

    /// Drop a target's state entirely
    fn remove(&self, id: &str) -> Result<(), StoreError>;

    /// Ids with a stored state record
    fn ids(&self) -> Result<Vec<String>, StoreError>;

    fn set_last_acted(&self, id: &str, time: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(id, &mut |state| state.last_acted = Some(time))
            .map(|_| ())
    }

    fn set_last_alerted(&self, id: &str, time: Option<DateTime<Utc>>) -> Result<(), StoreError> {
        self.update(id, &mut |state| state.last_alerted = time)
            .map(|_| ())
    }

    fn set_muted(&self, id: &str, muted: bool) -> Result<(), StoreError> {
        self.update(id, &mut |state| state.muted = muted).map(|_| ())
    }

    /// Record a liveness report as a single transaction: sets `last_acted`,
    /// clears `last_alerted` and `muted`.
    fn record_liveness(&self, id: &str, now: DateTime<Utc>) -> Result<TargetState, StoreError> {
        self.update(id, &mut |state| state.record_liveness(now))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted state for '{id}': {reason}")]
    Corrupted { id: String, reason: String },
}
