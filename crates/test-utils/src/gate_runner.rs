use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Semaphore};

use cryopipe::dispatch::StageTask;
use cryopipe::engine::StageOutcome;
use cryopipe::exec::StageRunner;
use cryopipe::registry::DatasetId;
use cryopipe::stage::Stage;

/// A stage runner whose executions block on a gate until the test releases
/// them (or cancellation fires).
///
/// Used with the real dispatcher to observe how many tasks hold slots
/// concurrently.
pub struct GateRunner {
    started: Arc<Mutex<Vec<(DatasetId, Stage)>>>,
    gate: Arc<Semaphore>,
}

impl GateRunner {
    pub fn new() -> Self {
        Self {
            started: Arc::new(Mutex::new(Vec::new())),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    /// Allow `n` blocked executions to finish (successfully).
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Executions that have entered the runner so far.
    pub fn started(&self) -> Arc<Mutex<Vec<(DatasetId, Stage)>>> {
        Arc::clone(&self.started)
    }

    pub fn started_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }
}

impl Default for GateRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl StageRunner for GateRunner {
    fn run(
        &self,
        task: StageTask,
        mut cancel: oneshot::Receiver<()>,
    ) -> Pin<Box<dyn Future<Output = StageOutcome> + Send + '_>> {
        self.started
            .lock()
            .unwrap()
            .push((task.dataset.clone(), task.stage));

        let gate = Arc::clone(&self.gate);
        Box::pin(async move {
            tokio::select! {
                permit = gate.acquire() => {
                    permit.expect("gate semaphore closed").forget();
                    StageOutcome::Succeeded {
                        artifact: task.invocation.artifact.clone(),
                    }
                }
                _ = &mut cancel => StageOutcome::Cancelled,
            }
        })
    }
}
