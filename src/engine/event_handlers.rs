// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::time::Duration;

use tracing::{debug, error, warn};

use crate::config::{DuplicatePolicy, PipelineConfig};
use crate::dispatch::{ResourceNeed, StageTask};
use crate::errors::PipelineError;
use crate::exec::plan;
use crate::registry::DatasetId;
use crate::sched::{ReadyStage, Scheduler};
use crate::stage::Stage;
use crate::engine::StageOutcome;
use crate::watch::DiscoveredDataset;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these prepared tasks to the dispatcher.
    DispatchStages(Vec<StageTask>),
    /// Kill any queued or running task of this dataset, freeing its slots.
    CancelActive { dataset: DatasetId },
    /// Post a `RetryDue` event after the backoff delay.
    ScheduleRetry {
        dataset: DatasetId,
        stage: Stage,
        delay: Duration,
    },
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn running(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }
}

/// Handle a dataset discovery from the watcher.
///
/// New datasets are registered (their optional stages Skipped up front). A
/// re-discovery with changed acquisition-log content is resolved per the
/// configured duplicate policy.
pub fn handle_dataset_discovered(
    scheduler: &mut Scheduler,
    cfg: &PipelineConfig,
    discovered: DiscoveredDataset,
) -> CoreStep {
    let id = discovered.id.clone();

    if !scheduler.is_registered(&id) {
        scheduler.register_dataset(
            id,
            discovered.metadata,
            discovered.discovered_at,
            discovered.mdoc_path,
            discovered.mdoc_hash,
        );
        return CoreStep::running(Vec::new());
    }

    let known_hash = scheduler.mdoc_hash(&id).map(String::from);
    if known_hash == discovered.mdoc_hash {
        debug!(dataset = %id, "re-discovery with unchanged acquisition log; ignoring");
        return CoreStep::running(Vec::new());
    }

    match cfg.orchestrator.duplicate_mdoc {
        DuplicatePolicy::Overwrite => {
            warn!(dataset = %id, "acquisition log changed; overwriting metadata");
            scheduler.update_metadata(&id, discovered.metadata, discovered.mdoc_hash);
        }
        DuplicatePolicy::Reject => {
            // Recoverable and dataset-scoped: the registered record stands,
            // the conflicting log is dropped, and the watcher carries on.
            let err = PipelineError::DuplicateDataset(id.to_string());
            error!(dataset = %id, "{err}; keeping registered metadata");
        }
    }

    CoreStep::running(Vec::new())
}

/// Handle a dataset becoming fully arrived: its root stages may dispatch.
pub fn handle_dataset_arrived(
    scheduler: &mut Scheduler,
    cfg: &PipelineConfig,
    dataset: DatasetId,
) -> CoreStep {
    let step = scheduler.mark_arrived(&dataset);
    CoreStep::running(dispatch_commands(scheduler, cfg, step.newly_ready))
}

/// Record that a dispatched stage acquired its slot.
pub fn handle_stage_started(
    scheduler: &mut Scheduler,
    dataset: DatasetId,
    stage: Stage,
) -> CoreStep {
    scheduler.mark_running(&dataset, stage);
    CoreStep::running(Vec::new())
}

/// Handle a stage outcome: schedule dependents, retries, or propagation.
pub fn handle_stage_finished(
    scheduler: &mut Scheduler,
    cfg: &PipelineConfig,
    dataset: DatasetId,
    stage: Stage,
    outcome: StageOutcome,
) -> CoreStep {
    let step = scheduler.handle_completion(&dataset, stage, outcome);

    let mut commands = dispatch_commands(scheduler, cfg, step.newly_ready);
    if let Some(retry) = step.retry {
        commands.push(CoreCommand::ScheduleRetry {
            dataset: retry.dataset,
            stage: retry.stage,
            delay: retry.delay,
        });
    }

    CoreStep::running(commands)
}

/// A retry backoff timer elapsed.
pub fn handle_retry_due(
    scheduler: &mut Scheduler,
    cfg: &PipelineConfig,
    dataset: DatasetId,
    stage: Stage,
) -> CoreStep {
    let step = scheduler.retry_due(&dataset, stage);
    CoreStep::running(dispatch_commands(scheduler, cfg, step.newly_ready))
}

/// Operator cancellation of one dataset.
pub fn handle_cancel_dataset(scheduler: &mut Scheduler, dataset: DatasetId) -> CoreStep {
    let mut commands = Vec::new();

    if scheduler.cancel_dataset(&dataset) {
        commands.push(CoreCommand::CancelActive { dataset });
    }

    CoreStep::running(commands)
}

/// Turn ready stages into fully prepared dispatch commands.
fn dispatch_commands(
    scheduler: &Scheduler,
    cfg: &PipelineConfig,
    ready: Vec<ReadyStage>,
) -> Vec<CoreCommand> {
    let tasks = build_stage_tasks(scheduler, cfg, ready);
    if tasks.is_empty() {
        Vec::new()
    } else {
        vec![CoreCommand::DispatchStages(tasks)]
    }
}

/// Map each ready stage to its tool invocation, slot need, and timeout.
pub fn build_stage_tasks(
    scheduler: &Scheduler,
    cfg: &PipelineConfig,
    ready: Vec<ReadyStage>,
) -> Vec<StageTask> {
    ready
        .into_iter()
        .filter_map(|r| {
            let Some(record) = scheduler.registry().get(&r.dataset) else {
                warn!(dataset = %r.dataset, "ready stage for unknown dataset; dropping");
                return None;
            };

            Some(StageTask {
                dataset: r.dataset,
                stage: r.stage,
                attempt: r.attempt,
                invocation: plan::build_invocation(r.stage, cfg, record),
                need: ResourceNeed::for_class(
                    r.stage.resource_class(),
                    cfg.orchestrator.gpu_host_cpu,
                ),
                timeout: cfg.orchestrator.stage_timeout,
            })
        })
        .collect()
}
