use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use cryopipe::dispatch::{DispatcherBackend, StageTask};
use cryopipe::engine::{RuntimeEvent, StageOutcome};
use cryopipe::errors::Result;
use cryopipe::registry::DatasetId;
use cryopipe::stage::Stage;

/// A fake dispatcher that:
/// - records which stage tasks were dispatched (in order)
/// - immediately reports `StageStarted` then `StageFinished` for each,
///   using a scripted outcome when one is queued, `Succeeded` otherwise
/// - records cancel requests.
pub struct FakeDispatcher {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<(DatasetId, Stage)>>>,
    cancelled: Arc<Mutex<Vec<DatasetId>>>,
    outcomes: Arc<Mutex<HashMap<(DatasetId, Stage), VecDeque<StageOutcome>>>>,
}

impl FakeDispatcher {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runtime_tx,
            executed: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(Vec::new())),
            outcomes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Queue an outcome for the next dispatch of (dataset, stage).
    pub fn script_outcome(&self, dataset: &DatasetId, stage: Stage, outcome: StageOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .entry((dataset.clone(), stage))
            .or_default()
            .push_back(outcome);
    }

    /// Shared handle to the dispatch log.
    pub fn executed(&self) -> Arc<Mutex<Vec<(DatasetId, Stage)>>> {
        Arc::clone(&self.executed)
    }

    /// Shared handle to the cancel log.
    pub fn cancelled(&self) -> Arc<Mutex<Vec<DatasetId>>> {
        Arc::clone(&self.cancelled)
    }
}

impl DispatcherBackend for FakeDispatcher {
    fn dispatch(
        &mut self,
        tasks: Vec<StageTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let outcomes = Arc::clone(&self.outcomes);

        Box::pin(async move {
            for task in tasks {
                executed
                    .lock()
                    .unwrap()
                    .push((task.dataset.clone(), task.stage));

                tx.send(RuntimeEvent::StageStarted {
                    dataset: task.dataset.clone(),
                    stage: task.stage,
                })
                .await
                .map_err(|e| anyhow::Error::msg(e.to_string()))?;

                let scripted = outcomes
                    .lock()
                    .unwrap()
                    .get_mut(&(task.dataset.clone(), task.stage))
                    .and_then(|queue| queue.pop_front());

                let outcome = scripted.unwrap_or(StageOutcome::Succeeded {
                    artifact: task.invocation.artifact.clone(),
                });

                tx.send(RuntimeEvent::StageFinished {
                    dataset: task.dataset.clone(),
                    stage: task.stage,
                    outcome,
                })
                .await
                .map_err(|e| anyhow::Error::msg(e.to_string()))?;
            }
            Ok(())
        })
    }

    fn cancel(
        &mut self,
        dataset: DatasetId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let cancelled = Arc::clone(&self.cancelled);
        Box::pin(async move {
            cancelled.lock().unwrap().push(dataset);
            Ok(())
        })
    }
}
