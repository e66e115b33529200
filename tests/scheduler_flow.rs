// tests/scheduler_flow.rs

//! Scenario tests driving the scheduler state machine directly.

mod common;
use crate::common::{full_chain_config, init_tracing, register_and_arrive, stage_status};

use std::path::PathBuf;

use cryopipe::engine::StageOutcome;
use cryopipe::registry::{DatasetId, DatasetRegistry, DatasetStatus};
use cryopipe::sched::Scheduler;
use cryopipe::stage::{Stage, StageStatus};
use cryopipe_test_utils::builders::PipelineConfigBuilder;

fn succeed(scheduler: &mut Scheduler, id: &DatasetId, stage: Stage) -> Vec<Stage> {
    assert!(
        scheduler.mark_running(id, stage),
        "{stage} should be dispatchable"
    );
    scheduler
        .handle_completion(
            id,
            stage,
            StageOutcome::Succeeded {
                artifact: PathBuf::from(format!("{id}_{stage}.out")),
            },
        )
        .newly_ready
        .into_iter()
        .map(|r| r.stage)
        .collect()
}

#[test]
fn full_chain_runs_in_dependency_order() {
    init_tracing();

    let cfg = full_chain_config();
    let mut scheduler = Scheduler::new(&cfg, DatasetRegistry::new());
    let id = DatasetId::new("ds1");

    let ready = register_and_arrive(&mut scheduler, "ds1", 0);
    assert_eq!(
        ready,
        vec![(id.clone(), Stage::MotionCorrection)],
        "only motion correction can start on arrival"
    );

    // Motion correction feeds the parallel CTF / tracking branch.
    let mut next = succeed(&mut scheduler, &id, Stage::MotionCorrection);
    next.sort();
    assert_eq!(next, vec![Stage::CtfEstimation, Stage::Tracking]);

    // Final alignment waits for both branches.
    assert!(succeed(&mut scheduler, &id, Stage::CtfEstimation).is_empty());
    let next = succeed(&mut scheduler, &id, Stage::Tracking);
    assert_eq!(next, vec![Stage::FinalAlignment]);

    // Dose weighting is disabled, so reconstruction follows directly.
    assert_eq!(stage_status(&scheduler, "ds1", Stage::DoseWeighting), StageStatus::Skipped);
    let next = succeed(&mut scheduler, &id, Stage::FinalAlignment);
    assert_eq!(next, vec![Stage::Reconstruction]);

    let next = succeed(&mut scheduler, &id, Stage::Reconstruction);
    assert_eq!(next, vec![Stage::PostProcess]);

    let next = succeed(&mut scheduler, &id, Stage::PostProcess);
    assert_eq!(next, vec![Stage::Denoising]);

    assert!(succeed(&mut scheduler, &id, Stage::Denoising).is_empty());

    let record = scheduler.registry().get(&id).unwrap();
    assert_eq!(record.status(), DatasetStatus::Succeeded);
    assert!(scheduler.is_idle());
}

#[test]
fn stage_never_ready_before_dependencies() {
    init_tracing();

    let cfg = full_chain_config();
    let mut scheduler = Scheduler::new(&cfg, DatasetRegistry::new());
    let id = DatasetId::new("ds1");

    register_and_arrive(&mut scheduler, "ds1", 0);

    // With motion correction still running, nothing downstream may start.
    assert!(scheduler.mark_running(&id, Stage::MotionCorrection));
    for stage in [
        Stage::CtfEstimation,
        Stage::Tracking,
        Stage::FinalAlignment,
        Stage::Reconstruction,
    ] {
        assert_eq!(stage_status(&scheduler, "ds1", stage), StageStatus::Pending);
        assert!(
            !scheduler.mark_running(&id, stage),
            "{stage} must not start before its dependencies"
        );
    }
}

#[test]
fn disabled_dose_weighting_is_skipped_and_chain_succeeds() {
    init_tracing();

    let cfg = PipelineConfigBuilder::new()
        .do_dose_weighting(false)
        .do_trimvol(false)
        .do_denoising(false)
        .build();
    let mut scheduler = Scheduler::new(&cfg, DatasetRegistry::new());
    let id = DatasetId::new("ds1");

    register_and_arrive(&mut scheduler, "ds1", 0);

    for stage in [Stage::DoseWeighting, Stage::PostProcess, Stage::Denoising] {
        assert_eq!(stage_status(&scheduler, "ds1", stage), StageStatus::Skipped);
    }

    succeed(&mut scheduler, &id, Stage::MotionCorrection);
    succeed(&mut scheduler, &id, Stage::CtfEstimation);
    succeed(&mut scheduler, &id, Stage::Tracking);
    succeed(&mut scheduler, &id, Stage::FinalAlignment);
    succeed(&mut scheduler, &id, Stage::Reconstruction);

    let record = scheduler.registry().get(&id).unwrap();
    assert_eq!(record.status(), DatasetStatus::Succeeded);
}

#[test]
fn skipped_ctf_estimation_still_releases_final_alignment() {
    init_tracing();

    let cfg = PipelineConfigBuilder::new().do_ctf(false).build();
    let mut scheduler = Scheduler::new(&cfg, DatasetRegistry::new());
    let id = DatasetId::new("ds1");

    register_and_arrive(&mut scheduler, "ds1", 0);
    assert_eq!(stage_status(&scheduler, "ds1", Stage::CtfEstimation), StageStatus::Skipped);

    succeed(&mut scheduler, &id, Stage::MotionCorrection);
    let next = succeed(&mut scheduler, &id, Stage::Tracking);
    assert_eq!(
        next,
        vec![Stage::FinalAlignment],
        "a skipped dependency satisfies its dependents"
    );
}

#[test]
fn deterministic_failure_propagates_to_dependents() {
    init_tracing();

    let cfg = full_chain_config();
    let mut scheduler = Scheduler::new(&cfg, DatasetRegistry::new());
    let id = DatasetId::new("ds1");

    register_and_arrive(&mut scheduler, "ds1", 0);
    succeed(&mut scheduler, &id, Stage::MotionCorrection);
    succeed(&mut scheduler, &id, Stage::CtfEstimation);
    succeed(&mut scheduler, &id, Stage::Tracking);
    succeed(&mut scheduler, &id, Stage::FinalAlignment);

    assert!(scheduler.mark_running(&id, Stage::Reconstruction));
    let step = scheduler.handle_completion(
        &id,
        Stage::Reconstruction,
        StageOutcome::DeterministicFailure {
            reason: "bad image dimensions".into(),
        },
    );

    // The failing stage and both dependents fail in the same step; none of
    // the dependents ever ran.
    let failed: Vec<Stage> = step.newly_failed.iter().map(|(_, s)| *s).collect();
    assert!(failed.contains(&Stage::Reconstruction));
    assert!(failed.contains(&Stage::PostProcess));
    assert!(failed.contains(&Stage::Denoising));
    assert!(step.retry.is_none());
    assert!(step.dataset_finished);

    for stage in [Stage::PostProcess, Stage::Denoising] {
        let record = scheduler.registry().get(&id).unwrap();
        let stage_record = record.stage(stage).unwrap();
        assert_eq!(stage_record.status, StageStatus::Failed);
        assert_eq!(stage_record.attempts, 0, "{stage} must never have run");
        assert!(
            stage_record
                .last_error
                .as_deref()
                .unwrap()
                .contains("upstream"),
        );
    }

    let record = scheduler.registry().get(&id).unwrap();
    assert_eq!(record.status(), DatasetStatus::Failed);
}

#[test]
fn transient_failure_retries_until_exhausted() {
    init_tracing();

    let cfg = PipelineConfigBuilder::new()
        .max_attempts(3)
        .retry_secs(30, 600)
        .build();
    let mut scheduler = Scheduler::new(&cfg, DatasetRegistry::new());
    let id = DatasetId::new("ds1");

    register_and_arrive(&mut scheduler, "ds1", 0);
    succeed(&mut scheduler, &id, Stage::MotionCorrection);
    succeed(&mut scheduler, &id, Stage::CtfEstimation);
    succeed(&mut scheduler, &id, Stage::Tracking);
    succeed(&mut scheduler, &id, Stage::FinalAlignment);

    // Attempts 1 and 2 fail transiently and schedule growing backoffs.
    for (attempt, delay_secs) in [(1u32, 30u64), (2, 60)] {
        assert!(scheduler.mark_running(&id, Stage::Reconstruction));
        let step = scheduler.handle_completion(
            &id,
            Stage::Reconstruction,
            StageOutcome::TransientFailure {
                reason: "out of memory".into(),
            },
        );
        let retry = step.retry.expect("retry scheduled");
        assert_eq!(retry.attempt, attempt);
        assert_eq!(retry.delay.as_secs(), delay_secs);
        assert!(step.newly_failed.is_empty());

        // Not ready again until the timer fires.
        assert!(scheduler.collect_ready().is_empty());
        let step = scheduler.retry_due(&id, Stage::Reconstruction);
        assert_eq!(step.newly_ready.len(), 1);
        assert_eq!(step.newly_ready[0].stage, Stage::Reconstruction);
    }

    // Attempt 3 exhausts the bound: terminal failure plus propagation.
    assert!(scheduler.mark_running(&id, Stage::Reconstruction));
    let step = scheduler.handle_completion(
        &id,
        Stage::Reconstruction,
        StageOutcome::TransientFailure {
            reason: "out of memory".into(),
        },
    );
    assert!(step.retry.is_none());
    assert!(!step.newly_failed.is_empty());

    let record = scheduler.registry().get(&id).unwrap();
    assert_eq!(record.stage(Stage::Reconstruction).unwrap().attempts, 3);
    assert_eq!(record.status(), DatasetStatus::Failed);
    assert_eq!(
        record.stage(Stage::PostProcess).unwrap().status,
        StageStatus::Failed
    );
}

#[test]
fn ready_stages_come_in_discovery_order() {
    init_tracing();

    let cfg = full_chain_config();

    // Both datasets are arrived with work pending (the situation after a
    // restart); ds-late was registered first but discovered later. A single
    // readiness sweep must order by discovery timestamp, not registration
    // order.
    let mut registry = DatasetRegistry::new();
    for (name, n) in [("ds-late", 30u32), ("ds-early", 5)] {
        let d = crate::common::discovered(name, n);
        let stages = Stage::ALL
            .iter()
            .map(|s| {
                let r = if s.enabled(&cfg) {
                    cryopipe::stage::StageRecord::pending()
                } else {
                    cryopipe::stage::StageRecord::skipped()
                };
                (*s, r)
            })
            .collect();
        registry.insert(d.id.clone(), d.metadata, d.discovered_at, None, None, stages);
        registry.get_mut(&d.id).unwrap().arrived = true;
    }

    let mut scheduler = Scheduler::new(&cfg, registry);
    let ready = scheduler.collect_ready();

    let order: Vec<&str> = ready.iter().map(|r| r.dataset.as_str()).collect();
    assert_eq!(order, vec!["ds-early", "ds-late"]);
}

#[test]
fn cancel_transitions_remaining_stages_and_is_idempotent() {
    init_tracing();

    let cfg = full_chain_config();
    let mut scheduler = Scheduler::new(&cfg, DatasetRegistry::new());
    let id = DatasetId::new("ds1");

    register_and_arrive(&mut scheduler, "ds1", 0);
    succeed(&mut scheduler, &id, Stage::MotionCorrection);
    assert!(scheduler.mark_running(&id, Stage::Tracking));

    assert!(scheduler.cancel_dataset(&id), "first cancel does work");

    let record = scheduler.registry().get(&id).unwrap();
    assert_eq!(record.status(), DatasetStatus::Cancelled);
    assert_eq!(
        record.stage(Stage::MotionCorrection).unwrap().status,
        StageStatus::Succeeded,
        "finished work is left alone"
    );
    for stage in [Stage::Tracking, Stage::FinalAlignment, Stage::Denoising] {
        assert_eq!(record.stage(stage).unwrap().status, StageStatus::Cancelled);
    }

    // Cancelling again, or cancelling an unknown dataset, is a no-op.
    assert!(!scheduler.cancel_dataset(&id));
    assert!(!scheduler.cancel_dataset(&DatasetId::new("nope")));

    // A late completion report from the killed tool changes nothing.
    let step = scheduler.handle_completion(&id, Stage::Tracking, StageOutcome::Cancelled);
    assert!(step.newly_ready.is_empty());
    assert_eq!(
        scheduler
            .registry()
            .get(&id)
            .unwrap()
            .stage(Stage::Tracking)
            .unwrap()
            .status,
        StageStatus::Cancelled
    );
}

#[test]
fn cancel_of_succeeded_dataset_is_noop() {
    init_tracing();

    let cfg = PipelineConfigBuilder::new()
        .do_dose_weighting(false)
        .do_trimvol(false)
        .do_denoising(false)
        .build();
    let mut scheduler = Scheduler::new(&cfg, DatasetRegistry::new());
    let id = DatasetId::new("ds1");

    register_and_arrive(&mut scheduler, "ds1", 0);
    for stage in [
        Stage::MotionCorrection,
        Stage::CtfEstimation,
        Stage::Tracking,
        Stage::FinalAlignment,
        Stage::Reconstruction,
    ] {
        succeed(&mut scheduler, &id, stage);
    }
    assert_eq!(
        scheduler.registry().get(&id).unwrap().status(),
        DatasetStatus::Succeeded
    );

    assert!(!scheduler.cancel_dataset(&id));
    assert_eq!(
        scheduler.registry().get(&id).unwrap().status(),
        DatasetStatus::Succeeded,
        "a terminal dataset keeps its status"
    );
}
