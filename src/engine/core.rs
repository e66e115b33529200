// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated scheduler/registry state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `StageTask`s to the dispatcher
//! - spawning retry timers
//! - persisting state snapshots and publishing status
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels, filesystem, or processes.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::engine::event_handlers::{
    handle_cancel_dataset, handle_dataset_arrived, handle_dataset_discovered,
    handle_retry_due, handle_stage_finished, handle_stage_started, CoreCommand, CoreStep,
};
use crate::engine::{RuntimeEvent, RuntimeOptions};
use crate::registry::{DatasetRegistry, StatusReport};
use crate::sched::Scheduler;

/// Pure core runtime state.
///
/// This owns the scheduler (and through it the dataset registry) plus the
/// validated configuration. It has **no** channels, no Tokio types, and
/// performs no IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    config: Arc<PipelineConfig>,
    options: RuntimeOptions,
}

impl CoreRuntime {
    pub fn new(
        scheduler: Scheduler,
        config: Arc<PipelineConfig>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            scheduler,
            config,
            options,
        }
    }

    pub fn registry(&self) -> &DatasetRegistry {
        self.scheduler.registry()
    }

    pub fn snapshot(&self) -> StatusReport {
        self.scheduler.snapshot()
    }

    /// Expose idleness (used by the shell's `--once` exit check and tests).
    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    /// Whether the shell should stop once idle with an empty event queue.
    pub fn exit_when_idle(&self) -> bool {
        self.options.exit_when_idle
    }

    /// Initial step after construction: dispatch whatever a resumed registry
    /// already has ready.
    pub fn bootstrap(&mut self) -> CoreStep {
        let ready = self.scheduler.collect_ready();
        let mut commands = Vec::new();

        let tasks = super::event_handlers::build_stage_tasks(
            &self.scheduler,
            &self.config,
            ready,
        );
        if !tasks.is_empty() {
            commands.push(CoreCommand::DispatchStages(tasks));
        }

        CoreStep {
            commands,
            keep_running: true,
        }
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::DatasetDiscovered { dataset } => {
                handle_dataset_discovered(&mut self.scheduler, &self.config, dataset)
            }
            RuntimeEvent::DatasetArrived { dataset } => {
                handle_dataset_arrived(&mut self.scheduler, &self.config, dataset)
            }
            RuntimeEvent::StageStarted { dataset, stage } => {
                handle_stage_started(&mut self.scheduler, dataset, stage)
            }
            RuntimeEvent::StageFinished {
                dataset,
                stage,
                outcome,
            } => handle_stage_finished(
                &mut self.scheduler,
                &self.config,
                dataset,
                stage,
                outcome,
            ),
            RuntimeEvent::RetryDue { dataset, stage } => {
                handle_retry_due(&mut self.scheduler, &self.config, dataset, stage)
            }
            RuntimeEvent::CancelDataset { dataset } => {
                handle_cancel_dataset(&mut self.scheduler, dataset)
            }
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }
}
