// tests/resource_limits.rs

//! Slot ceilings and cancellation against the real dispatch loop.

mod common;
use crate::common::{discovered, init_tracing};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use cryopipe::config::PipelineConfig;
use cryopipe::dispatch::{spawn_dispatcher, DispatchMsg, ResourceNeed, ResourcePool, StageTask};
use cryopipe::engine::{RuntimeEvent, StageOutcome};
use cryopipe::exec::build_invocation;
use cryopipe::registry::{DatasetId, DatasetRecord};
use cryopipe::stage::{Stage, StageRecord};
use cryopipe_test_utils::builders::PipelineConfigBuilder;
use cryopipe_test_utils::gate_runner::GateRunner;

fn record_for(name: &str) -> DatasetRecord {
    let d = discovered(name, 0);
    let stages: BTreeMap<Stage, StageRecord> = Stage::ALL
        .iter()
        .map(|s| (*s, StageRecord::pending()))
        .collect();
    DatasetRecord {
        id: DatasetId::new(name),
        metadata: d.metadata,
        discovered_at: d.discovered_at,
        arrived: true,
        mdoc_path: None,
        mdoc_hash: d.mdoc_hash,
        cancelled: false,
        stages,
    }
}

fn task_for(cfg: &PipelineConfig, name: &str, stage: Stage, gpu_host_cpu: bool) -> StageTask {
    let record = record_for(name);
    StageTask {
        dataset: record.id.clone(),
        stage,
        attempt: 1,
        invocation: build_invocation(stage, cfg, &record),
        need: ResourceNeed::for_class(stage.resource_class(), gpu_host_cpu),
        timeout: Duration::from_secs(60),
    }
}

/// Poll until `cond` holds or the deadline passes.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2 seconds");
}

#[tokio::test]
async fn cpu_ceiling_bounds_concurrent_stage_tasks() {
    init_tracing();

    let cfg = PipelineConfigBuilder::new().cpus(2).gpus(1).build();
    let pool = ResourcePool::new(2, 1);
    let runner = Arc::new(GateRunner::new());
    let (rt_tx, mut rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let dispatch_tx = spawn_dispatcher(pool.clone(), runner.clone(), rt_tx);

    // Four CPU-class tasks from four datasets compete for two CPU slots.
    for i in 0..4 {
        let task = task_for(&cfg, &format!("ds{i}"), Stage::Tracking, true);
        dispatch_tx.send(DispatchMsg::Run(task)).await.unwrap();
    }

    wait_until(|| runner.started_count() == 2).await;
    // Give the dispatcher every chance to (incorrectly) start more.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runner.started_count(), 2, "CPU ceiling respected");
    assert_eq!(pool.available_cpus(), 0);

    // Releasing one execution frees a slot for the next queued task.
    runner.release(1);
    wait_until(|| runner.started_count() == 3).await;

    runner.release(3);
    wait_until(|| runner.started_count() == 4).await;

    // All four eventually report success.
    let mut successes = 0;
    while successes < 4 {
        match rt_rx.recv().await.expect("runtime events") {
            RuntimeEvent::StageFinished {
                outcome: StageOutcome::Succeeded { .. },
                ..
            } => successes += 1,
            _ => {}
        }
    }
    assert_eq!(pool.available_cpus(), 2, "all slots returned");
}

#[tokio::test]
async fn gpu_ceiling_bounds_gpu_stages_independently() {
    init_tracing();

    let cfg = PipelineConfigBuilder::new().cpus(4).gpus(1).build();
    let pool = ResourcePool::new(4, 1);
    let runner = Arc::new(GateRunner::new());
    let (rt_tx, _rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let dispatch_tx = spawn_dispatcher(pool.clone(), runner.clone(), rt_tx);

    for i in 0..3 {
        let task = task_for(&cfg, &format!("ds{i}"), Stage::FinalAlignment, true);
        dispatch_tx.send(DispatchMsg::Run(task)).await.unwrap();
    }

    wait_until(|| runner.started_count() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runner.started_count(), 1, "one GPU slot, one running task");
    assert_eq!(pool.available_gpus(), 0);
    assert_eq!(
        pool.available_cpus(),
        3,
        "a GPU stage claims one host CPU slot"
    );

    runner.release(1);
    wait_until(|| runner.started_count() == 2).await;
}

#[tokio::test]
async fn cancellation_frees_the_gpu_slot_for_the_next_task() {
    init_tracing();

    let cfg = PipelineConfigBuilder::new().cpus(4).gpus(1).build();
    let pool = ResourcePool::new(4, 1);
    let runner = Arc::new(GateRunner::new());
    let (rt_tx, mut rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let dispatch_tx = spawn_dispatcher(pool.clone(), runner.clone(), rt_tx);

    // ds-a holds the only GPU slot mid-alignment; ds-b waits.
    let a = task_for(&cfg, "ds-a", Stage::FinalAlignment, false);
    let b = task_for(&cfg, "ds-b", Stage::FinalAlignment, false);
    dispatch_tx.send(DispatchMsg::Run(a)).await.unwrap();
    wait_until(|| runner.started_count() == 1).await;
    dispatch_tx.send(DispatchMsg::Run(b)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runner.started_count(), 1, "ds-b blocked on the GPU slot");

    // Cancelling ds-a must hand the slot to ds-b.
    dispatch_tx
        .send(DispatchMsg::Cancel(DatasetId::new("ds-a")))
        .await
        .unwrap();

    wait_until(|| runner.started_count() == 2).await;

    // ds-a reported Cancelled; its slot went to ds-b.
    let mut saw_cancelled = false;
    while !saw_cancelled {
        match rt_rx.recv().await.expect("runtime events") {
            RuntimeEvent::StageFinished {
                dataset,
                outcome: StageOutcome::Cancelled,
                ..
            } => {
                assert_eq!(dataset, DatasetId::new("ds-a"));
                saw_cancelled = true;
            }
            _ => {}
        }
    }

    runner.release(1);
    wait_until(|| pool.available_gpus() == 1).await;
}

#[tokio::test]
async fn cancel_while_queued_never_takes_a_slot() {
    init_tracing();

    let cfg = PipelineConfigBuilder::new().cpus(4).gpus(1).build();
    let pool = ResourcePool::new(4, 1);
    let runner = Arc::new(GateRunner::new());
    let (rt_tx, _rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let dispatch_tx = spawn_dispatcher(pool.clone(), runner.clone(), rt_tx);

    let a = task_for(&cfg, "ds-a", Stage::Reconstruction, false);
    let b = task_for(&cfg, "ds-b", Stage::Reconstruction, false);
    dispatch_tx.send(DispatchMsg::Run(a)).await.unwrap();
    wait_until(|| runner.started_count() == 1).await;
    dispatch_tx.send(DispatchMsg::Run(b)).await.unwrap();

    // ds-b is cancelled while still waiting for the slot.
    dispatch_tx
        .send(DispatchMsg::Cancel(DatasetId::new("ds-b")))
        .await
        .unwrap();

    // ds-a finishes; the slot must come back even though ds-b was queued.
    runner.release(1);
    wait_until(|| pool.available_gpus() == 1).await;
    assert_eq!(runner.started_count(), 1, "ds-b never entered the runner");
}
