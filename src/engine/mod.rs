// src/engine/mod.rs

//! Orchestration engine for cryopipe.
//!
//! This module ties together:
//! - the stage scheduler
//! - the dispatcher that runs stage tools under resource slots
//! - the main runtime event loop that reacts to:
//!   - dataset discovery / arrival from the watcher
//!   - stage start/finish reports from workers
//!   - retry timers
//!   - operator cancellation
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::path::PathBuf;

use tokio::sync::{mpsc, watch};

use crate::registry::{DatasetId, StatusReport};
use crate::stage::Stage;
use crate::watch::DiscoveredDataset;

/// Outcome of one stage execution, as classified by the stage runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded {
        /// Path of the produced artifact.
        artifact: PathBuf,
    },
    /// Retryable: resource exhaustion, timeout, transient I/O.
    TransientFailure { reason: String },
    /// Not retryable: malformed input, invalid parameters, convergence
    /// failure.
    DeterministicFailure { reason: String },
    /// The execution was cancelled by the operator.
    Cancelled,
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once every dataset is terminal (used for
    /// `--once`).
    pub exit_when_idle: bool,
}

/// Events flowing into the runtime from the watcher, workers, and timers.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// The watcher found a (new or changed) dataset.
    DatasetDiscovered { dataset: DiscoveredDataset },
    /// A dataset's raw file set has settled; processing may begin.
    DatasetArrived { dataset: DatasetId },
    /// A dispatched stage acquired its resource slot and started.
    StageStarted { dataset: DatasetId, stage: Stage },
    /// A stage execution finished with a classified outcome.
    StageFinished {
        dataset: DatasetId,
        stage: Stage,
        outcome: StageOutcome,
    },
    /// A retry backoff timer elapsed.
    RetryDue { dataset: DatasetId, stage: Stage },
    /// Operator requested cancellation of one dataset.
    CancelDataset { dataset: DatasetId },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Handle for operating a running orchestrator in-process.
///
/// Cloneable; used by embedding code and tests to cancel datasets, request
/// shutdown, and read status snapshots published after every event.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<RuntimeEvent>,
    status: watch::Receiver<StatusReport>,
}

impl OrchestratorHandle {
    pub fn new(tx: mpsc::Sender<RuntimeEvent>, status: watch::Receiver<StatusReport>) -> Self {
        Self { tx, status }
    }

    pub async fn cancel_dataset(&self, dataset: DatasetId) {
        let _ = self.tx.send(RuntimeEvent::CancelDataset { dataset }).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(RuntimeEvent::ShutdownRequested).await;
    }

    /// Latest published status snapshot.
    pub fn status(&self) -> StatusReport {
        self.status.borrow().clone()
    }

    /// Watch receiver for callers that want change notifications.
    pub fn subscribe(&self) -> watch::Receiver<StatusReport> {
        self.status.clone()
    }
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use self::core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
