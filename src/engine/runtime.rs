// src/engine/runtime.rs

use std::fmt;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::dispatch::DispatcherBackend;
use crate::errors::Result;
use crate::registry::{StateStore, StatusReport};

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// What the event loop should do next.
enum NextEvent {
    Process(RuntimeEvent),
    Wait,
    Exit,
}

/// Drives the scheduler in response to `RuntimeEvent`s and delegates stage
/// execution to a `DispatcherBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// scheduling semantics. This struct handles async IO: reading events from
/// the channel, dispatching tasks, spawning retry timers, persisting state
/// snapshots after every step, and publishing status.
pub struct Runtime<D: DispatcherBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    /// Sender side of the same channel, used for retry timers.
    event_tx: mpsc::Sender<RuntimeEvent>,
    dispatcher: D,
    store: StateStore,
    status_tx: watch::Sender<StatusReport>,
}

impl<D: DispatcherBackend> fmt::Debug for Runtime<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<D: DispatcherBackend> Runtime<D> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        event_tx: mpsc::Sender<RuntimeEvent>,
        dispatcher: D,
        store: StateStore,
        status_tx: watch::Sender<StatusReport>,
    ) -> Self {
        Self {
            core,
            event_rx,
            event_tx,
            dispatcher,
            store,
            status_tx,
        }
    }

    /// Main event loop.
    ///
    /// - Bootstraps from the (possibly resumed) registry.
    /// - Consumes `RuntimeEvent`s.
    /// - Feeds them into the core runtime.
    /// - Executes the commands the core returns.
    /// - Persists a state snapshot and publishes status after every step.
    pub async fn run(mut self) -> Result<()> {
        info!("cryopipe runtime started");

        let step = self.core.bootstrap();
        for command in step.commands {
            self.execute_command(command).await?;
        }
        self.persist_and_publish();

        loop {
            let event = match self.next_event() {
                NextEvent::Process(event) => event,
                NextEvent::Wait => match self.event_rx.recv().await {
                    Some(e) => e,
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                },
                NextEvent::Exit => {
                    info!("idle with no pending events; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            self.persist_and_publish();

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        info!("runtime exiting");
        Ok(())
    }

    /// In `--once` mode, an idle core only consumes events that are already
    /// queued; once the queue is drained, the runtime exits instead of
    /// waiting for more.
    fn next_event(&mut self) -> NextEvent {
        if !(self.core.exit_when_idle() && self.core.is_idle()) {
            return NextEvent::Wait;
        }
        match self.event_rx.try_recv() {
            Ok(event) => NextEvent::Process(event),
            Err(_) => NextEvent::Exit,
        }
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchStages(tasks) => {
                if tasks.is_empty() {
                    return Ok(());
                }
                let names: Vec<String> = tasks
                    .iter()
                    .map(|t| format!("{}/{}", t.dataset, t.stage))
                    .collect();
                debug!(?names, "dispatching ready stages");
                self.dispatcher.dispatch(tasks).await?;
            }
            CoreCommand::CancelActive { dataset } => {
                self.dispatcher.cancel(dataset).await?;
            }
            CoreCommand::ScheduleRetry {
                dataset,
                stage,
                delay,
            } => {
                let tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(RuntimeEvent::RetryDue { dataset, stage }).await;
                });
            }
        }
        Ok(())
    }

    /// Persist the registry snapshot and publish a fresh status report.
    ///
    /// A persistence failure is logged rather than fatal: processing can
    /// continue, at the cost of a stale resume point.
    fn persist_and_publish(&mut self) {
        if let Err(e) = self.store.save(self.core.registry()) {
            warn!(error = %e, "failed to persist state snapshot");
        }
        self.status_tx.send_replace(self.core.snapshot());
    }
}
