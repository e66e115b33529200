// tests/config_validation.rs

mod common;
use crate::common::init_tracing;

use cryopipe::config::loader::load_and_validate;
use cryopipe::config::{PipelineConfig, ReconstructMethod, TrackMethod};
use cryopipe::errors::PipelineError;
use cryopipe_test_utils::builders::PipelineConfigBuilder;

fn expect_config_error(result: Result<PipelineConfig, PipelineError>, needle: &str) {
    match result {
        Err(PipelineError::Config(msg)) => {
            assert!(
                msg.contains(needle),
                "expected config error mentioning '{needle}', got: {msg}"
            );
        }
        Err(other) => panic!("expected Config error, got: {other}"),
        Ok(_) => panic!("expected config error mentioning '{needle}', got Ok"),
    }
}

#[test]
fn minimal_config_validates_with_defaults() {
    init_tracing();

    let cfg = PipelineConfigBuilder::new().build();

    assert_eq!(cfg.setup.cpus, 4);
    assert_eq!(cfg.setup.gpus, 1);
    assert_eq!(cfg.imod.tracking.method, TrackMethod::Fiducial);
    assert_eq!(cfg.imod.tracking.fiducial.num_beads, 25);
    assert_eq!(
        cfg.imod.reconstruction.method,
        ReconstructMethod::WeightedBackProjection
    );
    assert_eq!(cfg.orchestrator.max_attempts, 3);
    assert_eq!(cfg.orchestrator.stage_timeout.as_secs(), 3600);
}

#[test]
fn zero_cpus_rejected() {
    let raw = PipelineConfigBuilder::new().cpus(0).build_raw();
    expect_config_error(PipelineConfig::try_from(raw), "setup.CPUS");
}

#[test]
fn zero_gpus_rejected() {
    let raw = PipelineConfigBuilder::new().gpus(0).build_raw();
    expect_config_error(PipelineConfig::try_from(raw), "setup.GPUS");
}

#[test]
fn nonpositive_pixel_size_rejected() {
    let raw = PipelineConfigBuilder::new().pixel_size(-0.27).build_raw();
    expect_config_error(PipelineConfig::try_from(raw), "data.PIXEL_SIZE");
}

#[test]
fn nonpositive_exposure_rejected() {
    let raw = PipelineConfigBuilder::new().exposure(0.0).build_raw();
    expect_config_error(PipelineConfig::try_from(raw), "data.EXPOSURE");
}

#[test]
fn data_section_required_without_mdoc() {
    let raw = PipelineConfigBuilder::new()
        .read_mdoc(false)
        .no_data_section()
        .build_raw();
    expect_config_error(PipelineConfig::try_from(raw), "READ_MDOC = 0");
}

#[test]
fn unknown_track_method_rejected() {
    let raw = PipelineConfigBuilder::new().track_method(3).build_raw();
    expect_config_error(PipelineConfig::try_from(raw), "TRACK_METHOD");
}

#[test]
fn patch_tracking_requires_patch_table() {
    let raw = PipelineConfigBuilder::new().track_method(1).build_raw();
    expect_config_error(PipelineConfig::try_from(raw), "imod.tracking.patch");
}

#[test]
fn patch_overlap_must_be_fractional() {
    let raw = PipelineConfigBuilder::new()
        .track_method(1)
        .patch(300, 300, 1.5, 0.33)
        .build_raw();
    expect_config_error(PipelineConfig::try_from(raw), "PATCH_OVERLAP_X");
}

#[test]
fn unknown_reconstruct_method_rejected() {
    let raw = PipelineConfigBuilder::new().reconstruct_method(0).build_raw();
    expect_config_error(PipelineConfig::try_from(raw), "RECONSTRUCT_METHOD");
}

#[test]
fn inverted_defocus_range_rejected() {
    let mut raw = PipelineConfigBuilder::new().build_raw();
    raw.imod.ctf.defocus_range_low = 10.0;
    raw.imod.ctf.defocus_range_high = 0.1;
    expect_config_error(PipelineConfig::try_from(raw), "DEFOCUS_RANGE_LOW");
}

#[test]
fn switches_must_be_zero_or_one() {
    let mut raw = PipelineConfigBuilder::new().build_raw();
    raw.denoising.do_denoising = 2;
    expect_config_error(PipelineConfig::try_from(raw), "DO_DENOISING");
}

#[test]
fn zero_final_bin_rejected() {
    let mut raw = PipelineConfigBuilder::new().build_raw();
    raw.imod.final_alignment.final_bin = 0;
    expect_config_error(PipelineConfig::try_from(raw), "FINAL_BIN");
}

#[test]
fn retry_ceiling_below_base_rejected() {
    let raw = PipelineConfigBuilder::new().retry_secs(60, 30).build_raw();
    expect_config_error(PipelineConfig::try_from(raw), "RETRY_MAX_SECS");
}

#[test]
fn binned_thickness_scales_by_final_bin() {
    let mut raw = PipelineConfigBuilder::new().build_raw();
    raw.imod.reconstruction.thickness_binned = Some(400);
    raw.imod.final_alignment.final_bin = 6;
    let cfg = PipelineConfig::try_from(raw).unwrap();
    assert_eq!(cfg.effective_thickness(), 2400);
}

#[test]
fn toml_round_trip_with_screaming_keys() {
    init_tracing();

    let toml = r#"
[setup]
CPUS = 8
GPUS = 2
SOFTWARE = 2
TILTAXIS = -94.7

[setup.data]
RAW_DATA_DIR = "/data/glacios/session_42"
READ_MDOC = 1
MDOC_DUPLICATE = "-dup"

[data]
EXTENSION = "tif"

[mc]
DOSE_FRACTIONS = 1
RUN_FRAMEWATCHER = 1

[imod.tracking]
TRACK_METHOD = 1
SIZE_GOLD = 10.0

[imod.tracking.patch]
PATCH_SIZE_X = 680
PATCH_SIZE_Y = 680
PATCH_OVERLAP_X = 0.33
PATCH_OVERLAP_Y = 0.33

[imod.reconstruction]
RECONSTRUCT_METHOD = 2
SIRT_ITERS = 12

[denoising]
DO_DENOISING = 1

[orchestrator]
POLL_INTERVAL_SECS = 5
MAX_ATTEMPTS = 5
"#;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Cryopipe.toml");
    std::fs::write(&path, toml).unwrap();

    let cfg = load_and_validate(&path).unwrap();

    assert_eq!(cfg.setup.cpus, 8);
    assert_eq!(cfg.setup.gpus, 2);
    assert_eq!(cfg.setup.tilt_axis, -94.7);
    assert_eq!(cfg.setup.mdoc_duplicate.as_deref(), Some("-dup"));
    assert_eq!(cfg.data.extension, "tif");
    assert_eq!(cfg.imod.tracking.method, TrackMethod::Patch);
    let patch = cfg.imod.tracking.patch.as_ref().unwrap();
    assert_eq!((patch.size_x, patch.size_y), (680, 680));
    assert_eq!(cfg.imod.reconstruction.method, ReconstructMethod::Sirt);
    assert_eq!(cfg.imod.reconstruction.sirt_iters, 12);
    assert!(cfg.denoising.do_denoising);
    assert_eq!(cfg.orchestrator.poll_interval.as_secs(), 5);
    assert_eq!(cfg.orchestrator.max_attempts, 5);
}
