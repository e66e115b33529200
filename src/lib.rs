// src/lib.rs

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod registry;
pub mod sched;
pub mod stage;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch as watch_channel};
use tracing::info;

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::PipelineConfig;
use crate::dispatch::{RealDispatcherBackend, ResourcePool};
use crate::engine::{
    CoreRuntime, OrchestratorHandle, Runtime, RuntimeEvent, RuntimeOptions,
};
use crate::exec::{ProcessStageRunner, StageRunner};
use crate::registry::{StateStore, StatusReport};
use crate::sched::Scheduler;
use crate::stage::StageGraph;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - state-store resume
/// - scheduler / core / runtime
/// - dispatcher with the CPU/GPU slot pool
/// - the raw-data watcher
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let store = StateStore::new(&cfg.orchestrator.state_file);

    if args.status {
        print_status(&store)?;
        return Ok(());
    }

    if let Some(dataset) = &args.cancel {
        store.request_cancel(dataset)?;
        return Ok(());
    }

    // Resume from the persisted snapshot; interrupted stages go back to
    // Pending, finished ones stay finished.
    let registry = store.load_for_resume()?;
    let scheduler = Scheduler::new(&cfg, registry);
    let cfg = Arc::new(cfg);

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(cfg.orchestrator.event_channel_capacity);

    // Status snapshots published after every event.
    let (status_tx, status_rx) = watch_channel::channel(StatusReport::default());
    let _handle = OrchestratorHandle::new(rt_tx.clone(), status_rx);

    // Dispatcher with the bounded slot pool.
    let pool = ResourcePool::new(cfg.setup.cpus, cfg.setup.gpus);
    let runner: Arc<dyn StageRunner> = Arc::new(ProcessStageRunner::new());
    let dispatcher = RealDispatcherBackend::new(pool, runner, rt_tx.clone());

    // Raw-data watcher (disabled in --once mode: only the persisted backlog
    // is processed).
    let _watcher_handle = if !args.once {
        Some(watch::spawn_watcher(&cfg, store.clone(), rt_tx.clone())?)
    } else {
        None
    };

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let options = RuntimeOptions {
        exit_when_idle: args.once,
    };

    info!(
        config = %config_path.display(),
        raw_dir = %cfg.setup.raw_data_dir.display(),
        cpus = cfg.setup.cpus,
        gpus = cfg.setup.gpus,
        "starting orchestrator"
    );

    let core = CoreRuntime::new(scheduler, Arc::clone(&cfg), options);
    let runtime = Runtime::new(core, rt_rx, rt_tx, dispatcher, store, status_tx);
    runtime.run().await?;
    Ok(())
}

/// Print the stage plan implied by the config, without executing anything.
fn print_dry_run(cfg: &PipelineConfig) {
    let graph = StageGraph::new();

    println!("cryopipe dry-run");
    println!("  raw data dir: {}", cfg.setup.raw_data_dir.display());
    println!(
        "  slots: {} CPU, {} GPU (gpu stages claim host cpu: {})",
        cfg.setup.cpus, cfg.setup.gpus, cfg.orchestrator.gpu_host_cpu
    );
    println!(
        "  retries: {} attempts, backoff {}s..{}s, stage timeout {}s",
        cfg.orchestrator.max_attempts,
        cfg.orchestrator.retry_base.as_secs(),
        cfg.orchestrator.retry_max.as_secs(),
        cfg.orchestrator.stage_timeout.as_secs()
    );
    println!();

    println!("stages:");
    for stage in graph.stages() {
        let enabled = if stage.enabled(cfg) { "run" } else { "skip" };
        let deps: Vec<&str> = graph
            .dependencies_of(stage)
            .iter()
            .map(|d| d.name())
            .collect();
        println!(
            "  - {:<17} [{:>4}] {:?} deps: {:?}",
            stage.name(),
            enabled,
            stage.resource_class(),
            deps
        );
    }
}

/// Print per-dataset and aggregate status from the persisted snapshot.
fn print_status(store: &StateStore) -> Result<()> {
    let Some(registry) = store.load()? else {
        println!("no state snapshot at {}", store.path().display());
        return Ok(());
    };

    let report = registry.snapshot();

    println!(
        "datasets: {} ({} arriving, {} in progress, {} succeeded, {} failed, {} cancelled)",
        report.datasets.len(),
        report.aggregate.arriving,
        report.aggregate.in_progress,
        report.aggregate.succeeded,
        report.aggregate.failed,
        report.aggregate.cancelled,
    );

    for entry in &report.datasets {
        println!();
        println!(
            "{}  [{:?}]  discovered {}",
            entry.id, entry.status, entry.discovered_at
        );
        for stage in &entry.stages {
            let error = stage
                .last_error
                .as_deref()
                .map(|e| format!("  ({e})"))
                .unwrap_or_default();
            println!(
                "    {:<17} {:?} attempts={}{}",
                stage.stage.name(),
                stage.status,
                stage.attempts,
                error
            );
        }
    }

    Ok(())
}
