// src/stage/state.rs

//! Per-dataset, per-stage status records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Status of one stage for one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    /// Waiting for upstream dependencies.
    Pending,
    /// All dependencies Succeeded/Skipped; waiting for a resource slot.
    Ready,
    /// Dispatched and holding a slot of its resource class.
    Running,
    Succeeded,
    /// Terminal once retries are exhausted or the failure is deterministic.
    Failed,
    /// Disabled by configuration; satisfies dependents like Succeeded.
    Skipped,
    /// Operator-cancelled before reaching a terminal state.
    Cancelled,
}

impl StageStatus {
    /// Whether the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Succeeded
                | StageStatus::Failed
                | StageStatus::Skipped
                | StageStatus::Cancelled
        )
    }

    /// Whether this status satisfies a dependent's dependency check.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Skipped)
    }
}

/// Bookkeeping for one stage of one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    /// Number of execution attempts so far.
    pub attempts: u32,
    /// Last failure diagnostic, if any.
    pub last_error: Option<String>,
    /// Output artifact path recorded on success.
    pub artifact: Option<PathBuf>,
    /// A retry timer is pending for this stage; readiness sweeps must not
    /// pick it up until the timer fires. Not persisted: after a restart the
    /// stage is simply retried immediately.
    #[serde(skip)]
    pub awaiting_retry: bool,
}

impl StageRecord {
    pub fn pending() -> Self {
        Self {
            status: StageStatus::Pending,
            attempts: 0,
            last_error: None,
            artifact: None,
            awaiting_retry: false,
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: StageStatus::Skipped,
            attempts: 0,
            last_error: None,
            artifact: None,
            awaiting_retry: false,
        }
    }
}
