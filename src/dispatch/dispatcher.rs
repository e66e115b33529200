// src/dispatch/dispatcher.rs

//! Background dispatch loop that manages running stage tasks.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::dispatch::{DispatcherBackend, ResourcePool, StageTask};
use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result};
use crate::exec::StageRunner;
use crate::registry::DatasetId;
use crate::stage::Stage;

/// Messages accepted by the dispatch loop.
#[derive(Debug)]
pub enum DispatchMsg {
    Run(StageTask),
    /// Cancel all tasks of one dataset.
    Cancel(DatasetId),
}

/// Internal handle for a queued or running stage task.
///
/// - `cancel` stops the task: while it waits for slots it simply exits;
///   once the tool is running, the process is killed.
/// - `handle` is the Tokio task driving the execution.
struct ActiveTask {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background dispatch loop.
///
/// Each submitted task runs in its own Tokio task: it first acquires the
/// slots its resource need describes (waiting in the semaphore's FIFO queue
/// if the ceiling is reached), reports `StageStarted`, runs the stage tool,
/// and reports `StageFinished`. Slots are RAII permits, so they are released
/// on every exit path.
pub fn spawn_dispatcher(
    pool: ResourcePool,
    runner: Arc<dyn StageRunner>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> mpsc::Sender<DispatchMsg> {
    let (tx, mut rx) = mpsc::channel::<DispatchMsg>(32);

    tokio::spawn(async move {
        info!(
            cpu_slots = pool.cpu_limit(),
            gpu_slots = pool.gpu_limit(),
            "dispatch loop started"
        );

        let mut active: HashMap<(DatasetId, Stage), ActiveTask> = HashMap::new();

        while let Some(msg) = rx.recv().await {
            // Drop bookkeeping for tasks that have finished on their own.
            active.retain(|_, t| !t.handle.is_finished());

            match msg {
                DispatchMsg::Run(task) => {
                    handle_run(task, &mut active, &pool, &runner, &runtime_tx);
                }
                DispatchMsg::Cancel(dataset) => {
                    handle_cancel(&dataset, &mut active);
                }
            }
        }

        info!("dispatch loop finished (channel closed)");
    });

    tx
}

fn handle_run(
    task: StageTask,
    active: &mut HashMap<(DatasetId, Stage), ActiveTask>,
    pool: &ResourcePool,
    runner: &Arc<dyn StageRunner>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    let key = (task.dataset.clone(), task.stage);

    if let Some(existing) = active.get(&key) {
        if !existing.handle.is_finished() {
            // The scheduler never double-dispatches a Ready stage; seeing
            // this means an event was duplicated somewhere upstream.
            warn!(
                dataset = %key.0,
                stage = %key.1,
                "task already active; ignoring duplicate dispatch"
            );
            return;
        }
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let pool = pool.clone();
    let runner = Arc::clone(runner);
    let rt_tx = runtime_tx.clone();

    let handle = tokio::spawn(async move {
        run_stage_task(task, pool, runner, rt_tx, cancel_rx).await;
    });

    active.insert(
        key,
        ActiveTask {
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn handle_cancel(dataset: &DatasetId, active: &mut HashMap<(DatasetId, Stage), ActiveTask>) {
    for ((ds, stage), task) in active.iter_mut() {
        if ds != dataset {
            continue;
        }
        if let Some(cancel) = task.cancel.take() {
            info!(dataset = %ds, stage = %stage, "cancelling active stage task");
            if cancel.send(()).is_err() {
                debug!(
                    dataset = %ds,
                    stage = %stage,
                    "stage task already finished while cancelling"
                );
            }
        }
    }
}

/// How long a task may sit in the slot queue before the delay is reported.
const SLOT_WAIT_REPORT: std::time::Duration = std::time::Duration::from_secs(300);

/// Drive one stage task: acquire slots, report start, run, report outcome.
async fn run_stage_task(
    task: StageTask,
    pool: ResourcePool,
    runner: Arc<dyn StageRunner>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    // Waiting for a slot is cancellable: a cancelled dataset must not
    // occupy a slot it no longer needs. A long wait is a scheduling delay,
    // reported but never treated as a dataset failure.
    let acquire = pool.acquire(task.need);
    tokio::pin!(acquire);
    let guard = loop {
        tokio::select! {
            guard = &mut acquire => break guard,
            _ = &mut cancel_rx => {
                debug!(
                    dataset = %task.dataset,
                    stage = %task.stage,
                    "task cancelled while waiting for slots; nothing to release"
                );
                return;
            }
            _ = tokio::time::sleep(SLOT_WAIT_REPORT) => {
                let delay = crate::errors::PipelineError::ResourceExhausted(format!(
                    "no {:?} slot granted to {}/{} within {}s",
                    task.need.class,
                    task.dataset,
                    task.stage,
                    SLOT_WAIT_REPORT.as_secs()
                ));
                warn!("{delay}; task stays queued");
            }
        }
    };

    if runtime_tx
        .send(RuntimeEvent::StageStarted {
            dataset: task.dataset.clone(),
            stage: task.stage,
        })
        .await
        .is_err()
    {
        // Runtime is gone; drop the guard and bail.
        return;
    }

    let dataset = task.dataset.clone();
    let stage = task.stage;
    let outcome = runner.run(task, cancel_rx).await;

    // Free the slots before the scheduler processes the outcome, so the
    // next ready task can start within one scheduling cycle.
    drop(guard);

    let _ = runtime_tx
        .send(RuntimeEvent::StageFinished {
            dataset,
            stage,
            outcome,
        })
        .await;
}

/// Real dispatcher backend used in production.
///
/// Wraps the background dispatch loop; the runtime calls `dispatch`/`cancel`
/// which forward over the loop's mpsc channel.
pub struct RealDispatcherBackend {
    tx: mpsc::Sender<DispatchMsg>,
}

impl RealDispatcherBackend {
    /// Create a new real dispatcher backend, wiring it to the given runtime
    /// event sender. This spawns the background dispatch loop immediately.
    pub fn new(
        pool: ResourcePool,
        runner: Arc<dyn StageRunner>,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        let tx = spawn_dispatcher(pool, runner, runtime_tx);
        Self { tx }
    }
}

impl DispatcherBackend for RealDispatcherBackend {
    fn dispatch(
        &mut self,
        tasks: Vec<StageTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            for task in tasks {
                tx.send(DispatchMsg::Run(task))
                    .await
                    .map_err(|e| Error::msg(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn cancel(
        &mut self,
        dataset: DatasetId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            tx.send(DispatchMsg::Cancel(dataset))
                .await
                .map_err(|e| Error::msg(e.to_string()))?;
            Ok(())
        })
    }
}
