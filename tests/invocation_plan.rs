// tests/invocation_plan.rs

//! Checks on the config → tool-invocation mapping.

mod common;
use crate::common::{discovered, init_tracing};

use std::collections::BTreeMap;

use cryopipe::config::PipelineConfig;
use cryopipe::exec::build_invocation;
use cryopipe::registry::{DatasetId, DatasetRecord};
use cryopipe::stage::{Stage, StageRecord};
use cryopipe_test_utils::builders::PipelineConfigBuilder;

fn record_for(cfg: &PipelineConfig, name: &str) -> DatasetRecord {
    let d = discovered(name, 0);
    let stages: BTreeMap<Stage, StageRecord> = Stage::ALL
        .iter()
        .map(|s| {
            let r = if s.enabled(cfg) {
                StageRecord::pending()
            } else {
                StageRecord::skipped()
            };
            (*s, r)
        })
        .collect();
    DatasetRecord {
        id: DatasetId::new(name),
        metadata: d.metadata,
        discovered_at: d.discovered_at,
        arrived: true,
        mdoc_path: Some(cfg.setup.raw_data_dir.join(format!("{name}.mrc.mdoc"))),
        mdoc_hash: d.mdoc_hash,
        cancelled: false,
        stages,
    }
}

#[test]
fn fiducial_tracking_uses_bead_seeding() {
    init_tracing();

    let cfg = PipelineConfigBuilder::new().track_method(0).build();
    let record = record_for(&cfg, "ds1");

    let inv = build_invocation(Stage::Tracking, &cfg, &record);
    assert_eq!(inv.program, "autofidseed");
    assert!(inv.args.contains(&"-TargetNumberOfBeads".to_string()));
    assert!(inv.args.contains(&"25".to_string()));
    assert!(inv.args.contains(&"-SobelFilterCentering".to_string()));
}

#[test]
fn patch_tracking_uses_cross_correlation() {
    init_tracing();

    let cfg = PipelineConfigBuilder::new()
        .track_method(1)
        .patch(680, 512, 0.33, 0.25)
        .build();
    let record = record_for(&cfg, "ds1");

    let inv = build_invocation(Stage::Tracking, &cfg, &record);
    assert_eq!(inv.program, "tiltxcorr");
    assert!(inv.args.contains(&"-SizeOfPatchesXandY".to_string()));
    assert!(inv.args.contains(&"680,512".to_string()));
    assert!(inv.args.contains(&"0.33,0.25".to_string()));
}

#[test]
fn exactly_one_tracking_tool_per_method() {
    // The tracking stage maps to one tool, selected by TRACK_METHOD.
    let fid_cfg = PipelineConfigBuilder::new().track_method(0).build();
    let patch_cfg = PipelineConfigBuilder::new()
        .track_method(1)
        .patch(300, 300, 0.33, 0.33)
        .build();

    let fid = build_invocation(Stage::Tracking, &fid_cfg, &record_for(&fid_cfg, "ds1"));
    let patch = build_invocation(Stage::Tracking, &patch_cfg, &record_for(&patch_cfg, "ds1"));

    assert_ne!(fid.program, patch.program);
}

#[test]
fn motion_correction_reads_the_acquisition_log() {
    let cfg = PipelineConfigBuilder::new().build();
    let record = record_for(&cfg, "ds1");

    let inv = build_invocation(Stage::MotionCorrection, &cfg, &record);
    assert_eq!(inv.program, "alignframes");
    assert!(inv.args.contains(&"-MetadataFile".to_string()));
    assert!(inv.artifact.to_string_lossy().ends_with("ds1_ali.mrc"));
}

#[test]
fn ctf_estimation_carries_optics_and_scan_range() {
    let cfg = PipelineConfigBuilder::new().build();
    let record = record_for(&cfg, "ds1");

    let inv = build_invocation(Stage::CtfEstimation, &cfg, &record);
    assert_eq!(inv.program, "ctfplotter");
    assert!(inv.args.contains(&"-Voltage".to_string()));
    assert!(inv.args.contains(&"300".to_string()));
    assert!(inv.args.contains(&"-ScanDefocusRange".to_string()));
    assert!(inv.args.contains(&"0.1,10".to_string()));
    assert!(inv.artifact.to_string_lossy().ends_with("ds1.defocus"));
}

#[test]
fn reconstruction_program_follows_method() {
    let wbp = PipelineConfigBuilder::new().reconstruct_method(1).build();
    let sirt = PipelineConfigBuilder::new().reconstruct_method(2).build();

    let wbp_inv = build_invocation(Stage::Reconstruction, &wbp, &record_for(&wbp, "ds1"));
    let sirt_inv = build_invocation(Stage::Reconstruction, &sirt, &record_for(&sirt, "ds1"));

    assert_eq!(wbp_inv.program, "tilt");
    assert_eq!(sirt_inv.program, "sirtsetup");
    assert!(sirt_inv.args.contains(&"-NumberOfIterations".to_string()));
}

#[test]
fn reconstruction_input_respects_dose_weighting() {
    let with_dw = PipelineConfigBuilder::new().do_dose_weighting(true).build();
    let without_dw = PipelineConfigBuilder::new().do_dose_weighting(false).build();

    let dw_inv = build_invocation(
        Stage::Reconstruction,
        &with_dw,
        &record_for(&with_dw, "ds1"),
    );
    let plain_inv = build_invocation(
        Stage::Reconstruction,
        &without_dw,
        &record_for(&without_dw, "ds1"),
    );

    assert!(dw_inv.args.iter().any(|a| a.ends_with("ds1_dw.mrc")));
    assert!(plain_inv.args.iter().any(|a| a.ends_with("ds1_ali.mrc")));
}

#[test]
fn denoising_prefers_the_trimmed_tomogram() {
    let trimmed = PipelineConfigBuilder::new()
        .do_trimvol(true)
        .do_denoising(true)
        .build();
    let untrimmed = PipelineConfigBuilder::new()
        .do_trimvol(false)
        .do_denoising(true)
        .build();

    let t = build_invocation(Stage::Denoising, &trimmed, &record_for(&trimmed, "ds1"));
    let u = build_invocation(Stage::Denoising, &untrimmed, &record_for(&untrimmed, "ds1"));

    assert!(t.args.iter().any(|a| a.ends_with("ds1_rec.mrc")));
    assert!(u.args.iter().any(|a| a.ends_with("ds1_full_rec.mrc")));
}

#[test]
fn postprocess_reorients_when_configured() {
    let cfg = PipelineConfigBuilder::new().do_trimvol(true).build();
    let record = record_for(&cfg, "ds1");

    let inv = build_invocation(Stage::PostProcess, &cfg, &record);
    assert_eq!(inv.program, "trimvol");
    assert_eq!(inv.args.first().map(String::as_str), Some("-rx"));
    assert!(inv.artifact.to_string_lossy().ends_with("ds1_rec.mrc"));
}
