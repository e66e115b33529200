// tests/resume_store.rs

//! Crash/resume behaviour of the persisted state snapshot.

mod common;
use crate::common::{full_chain_config, init_tracing, register_and_arrive};

use std::path::PathBuf;

use cryopipe::engine::StageOutcome;
use cryopipe::registry::{DatasetId, DatasetRegistry, StateStore};
use cryopipe::sched::Scheduler;
use cryopipe::stage::{Stage, StageStatus};

#[test]
fn resume_restarts_at_first_non_terminal_stage() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path().join("state.json"));
    let cfg = full_chain_config();
    let id = DatasetId::new("ds1");

    // First life: motion correction succeeds, tracking is mid-flight when
    // the process dies.
    {
        let mut scheduler = Scheduler::new(&cfg, DatasetRegistry::new());
        register_and_arrive(&mut scheduler, "ds1", 0);
        scheduler.mark_running(&id, Stage::MotionCorrection);
        scheduler.handle_completion(
            &id,
            Stage::MotionCorrection,
            StageOutcome::Succeeded {
                artifact: PathBuf::from("ds1_ali.mrc"),
            },
        );
        scheduler.mark_running(&id, Stage::Tracking);

        store.save(scheduler.registry()).unwrap();
    }

    // Second life: resume from the snapshot.
    let registry = store.load_for_resume().unwrap();
    let mut scheduler = Scheduler::new(&cfg, registry);

    let record = scheduler.registry().get(&id).unwrap();
    assert_eq!(
        record.stage(Stage::MotionCorrection).unwrap().status,
        StageStatus::Succeeded,
        "finished stages stay finished"
    );
    assert_eq!(
        record.stage(Stage::MotionCorrection).unwrap().artifact,
        Some(PathBuf::from("ds1_ali.mrc")),
        "artifact references survive the restart"
    );
    assert_eq!(
        record.stage(Stage::Tracking).unwrap().status,
        StageStatus::Pending,
        "interrupted stages are re-evaluated"
    );
    assert!(record.arrived, "arrival survives the restart");

    // The first sweep resumes exactly at the interrupted frontier; the
    // succeeded stage is not re-dispatched.
    let ready: Vec<Stage> = scheduler.collect_ready().iter().map(|r| r.stage).collect();
    assert!(ready.contains(&Stage::Tracking));
    assert!(ready.contains(&Stage::CtfEstimation));
    assert!(!ready.contains(&Stage::MotionCorrection));
}

#[test]
fn snapshot_overwrites_atomically_and_reloads() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path().join("nested").join("state.json"));
    let cfg = full_chain_config();

    let mut scheduler = Scheduler::new(&cfg, DatasetRegistry::new());
    register_and_arrive(&mut scheduler, "ds1", 0);
    store.save(scheduler.registry()).unwrap();

    register_and_arrive(&mut scheduler, "ds2", 1);
    store.save(scheduler.registry()).unwrap();

    let reloaded = store.load().unwrap().expect("snapshot exists");
    assert_eq!(reloaded.len(), 2);
    assert!(reloaded.contains(&DatasetId::new("ds1")));
    assert!(reloaded.contains(&DatasetId::new("ds2")));
}

#[test]
fn missing_snapshot_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path().join("state.json"));

    let registry = store.load_for_resume().unwrap();
    assert!(registry.is_empty());
}

#[test]
fn cancel_markers_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path().join("state.json"));

    store.request_cancel("ds1").unwrap();
    store.request_cancel("ds2").unwrap();

    let mut names = store.take_cancel_requests();
    names.sort();
    assert_eq!(names, vec!["ds1".to_string(), "ds2".to_string()]);

    assert!(
        store.take_cancel_requests().is_empty(),
        "markers are consumed"
    );
}

#[test]
fn terminal_failures_survive_resume() {
    init_tracing();

    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path().join("state.json"));
    let cfg = full_chain_config();
    let id = DatasetId::new("ds1");

    {
        let mut scheduler = Scheduler::new(&cfg, DatasetRegistry::new());
        register_and_arrive(&mut scheduler, "ds1", 0);
        scheduler.mark_running(&id, Stage::MotionCorrection);
        scheduler.handle_completion(
            &id,
            Stage::MotionCorrection,
            StageOutcome::DeterministicFailure {
                reason: "is not a valid MRC file".into(),
            },
        );
        store.save(scheduler.registry()).unwrap();
    }

    let registry = store.load_for_resume().unwrap();
    let mut scheduler = Scheduler::new(&cfg, registry);

    let record = scheduler.registry().get(&id).unwrap();
    assert_eq!(
        record.stage(Stage::MotionCorrection).unwrap().status,
        StageStatus::Failed
    );
    assert!(
        record
            .stage(Stage::MotionCorrection)
            .unwrap()
            .last_error
            .is_some(),
        "the recorded cause survives"
    );
    assert!(
        scheduler.collect_ready().is_empty(),
        "a failed chain does not restart by itself"
    );
}
