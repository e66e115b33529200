// src/watch/watcher.rs

use std::time::Instant;

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::engine::RuntimeEvent;
use crate::errors::Result;
use crate::registry::{DatasetId, StateStore};
use crate::watch::scan::{DatasetScanner, ScanEvent};

/// Handle for the raw-data watcher.
///
/// Keeps the underlying `RecommendedWatcher` alive; dropping this handle
/// stops filesystem notifications (polling sweeps stop when the runtime
/// drops the event channel).
pub struct WatcherHandle {
    _inner: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Spawn the dataset watcher.
///
/// Discovery runs as a recurring sweep on the configured poll interval;
/// filesystem notifications (when available) trigger an early sweep so new
/// data is picked up promptly. Each sweep also drains operator cancel
/// markers. The watcher only ever emits discovery, arrival, and cancel
/// events — it never touches stage state.
pub fn spawn_watcher(
    cfg: &PipelineConfig,
    store: StateStore,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> Result<WatcherHandle> {
    let mut scanner = DatasetScanner::new(cfg)?;
    let poll_interval = cfg.orchestrator.poll_interval;
    let raw_dir = cfg.setup.raw_data_dir.clone();

    // Channel from the blocking notify callback into the async world.
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<()>();

    // Filesystem notifications are an accelerator; the poll sweep alone is
    // sufficient (e.g. for network shares where notify is unreliable).
    let watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(_event) => {
                let _ = notify_tx.send(());
            }
            Err(err) => {
                eprintln!("cryopipe: file watch error: {err}");
            }
        },
        Config::default(),
    ) {
        Ok(mut watcher) => match watcher.watch(&raw_dir, RecursiveMode::Recursive) {
            Ok(()) => {
                info!(dir = %raw_dir.display(), "file watcher started");
                Some(watcher)
            }
            Err(e) => {
                warn!(
                    dir = %raw_dir.display(),
                    error = %e,
                    "cannot watch raw-data directory; relying on polling only"
                );
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "cannot create file watcher; relying on polling only");
            None
        }
    };

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut notify_open = true;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = notify_rx.recv(), if notify_open => {
                    if changed.is_none() {
                        debug!("notify channel closed; polling only");
                        notify_open = false;
                    }
                }
            }
            // Coalesce a burst of notifications into one sweep.
            while notify_rx.try_recv().is_ok() {}

            for name in store.take_cancel_requests() {
                let event = RuntimeEvent::CancelDataset {
                    dataset: DatasetId::new(name),
                };
                if runtime_tx.send(event).await.is_err() {
                    debug!("runtime gone; watcher stopping");
                    return;
                }
            }

            for scan_event in scanner.sweep(Instant::now()) {
                let event = match scan_event {
                    ScanEvent::Discovered(dataset) => {
                        RuntimeEvent::DatasetDiscovered { dataset }
                    }
                    ScanEvent::Arrived(dataset) => RuntimeEvent::DatasetArrived { dataset },
                };
                if runtime_tx.send(event).await.is_err() {
                    debug!("runtime gone; watcher stopping");
                    return;
                }
            }
        }
    });

    Ok(WatcherHandle { _inner: watcher })
}
