// src/sched/step.rs

//! Result types for scheduler steps.

use std::time::Duration;

use crate::registry::DatasetId;
use crate::stage::Stage;

/// A stage the scheduler wants dispatched now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyStage {
    pub dataset: DatasetId,
    pub stage: Stage,
    /// Execution attempt this dispatch will be (1 for the first run).
    pub attempt: u32,
}

/// A retry the IO shell should schedule after a backoff delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRequest {
    pub dataset: DatasetId,
    pub stage: Stage,
    /// Attempts completed so far.
    pub attempt: u32,
    pub delay: Duration,
}

/// Structured result of a single scheduler step.
///
/// Useful for tests that manually step the state machine and assert exactly
/// what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Stages that became ready to dispatch as a result of this step.
    pub newly_ready: Vec<ReadyStage>,
    /// Stages newly marked Failed (the failing stage and any dependents
    /// failed by propagation).
    pub newly_failed: Vec<(DatasetId, Stage)>,
    /// Retry to schedule, if the step recorded a retryable failure.
    pub retry: Option<RetryRequest>,
    /// Whether this step brought the dataset to a terminal state.
    pub dataset_finished: bool,
}
