#![allow(dead_code)]

use std::path::PathBuf;

use cryopipe::config::model::{
    RawDataSection, RawPatchSection, RawPipelineConfig, RawSetupDataSection,
    RawSetupSection,
};
use cryopipe::config::{DuplicatePolicy, PipelineConfig};

/// Builder for a valid [`PipelineConfig`] to simplify test setup.
///
/// Starts from a minimal sane configuration (4 CPU slots, 1 GPU slot,
/// mdoc-driven metadata) and lets tests override the knobs they care about.
pub struct PipelineConfigBuilder {
    raw: RawPipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        let raw = RawPipelineConfig {
            setup: RawSetupSection {
                cpus: 4,
                gpus: 1,
                software: 1,
                tiltaxis: 85.3,
                data: RawSetupDataSection {
                    frames_name: "Frames".to_string(),
                    gain_path: None,
                    mdoc_duplicate: None,
                    raw_data_dir: PathBuf::from("raw_data"),
                    read_mdoc: 1,
                    transfer_raw_data: 0,
                },
            },
            data: Some(RawDataSection {
                exposure: Some(3.0),
                extension: "mrc".to_string(),
                pixel_size: Some(0.27),
            }),
            mc: Default::default(),
            imod: Default::default(),
            denoising: Default::default(),
            orchestrator: Default::default(),
        };

        Self { raw }
    }

    pub fn cpus(mut self, cpus: u32) -> Self {
        self.raw.setup.cpus = cpus;
        self
    }

    pub fn gpus(mut self, gpus: u32) -> Self {
        self.raw.setup.gpus = gpus;
        self
    }

    pub fn raw_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.raw.setup.data.raw_data_dir = dir.into();
        self
    }

    pub fn read_mdoc(mut self, on: bool) -> Self {
        self.raw.setup.data.read_mdoc = on as u8;
        self
    }

    pub fn mdoc_duplicate(mut self, marker: &str) -> Self {
        self.raw.setup.data.mdoc_duplicate = Some(marker.to_string());
        self
    }

    pub fn pixel_size(mut self, px: f64) -> Self {
        self.raw.data.get_or_insert_with(Default::default).pixel_size = Some(px);
        self
    }

    pub fn exposure(mut self, dose: f64) -> Self {
        self.raw.data.get_or_insert_with(Default::default).exposure = Some(dose);
        self
    }

    pub fn no_data_section(mut self) -> Self {
        self.raw.data = None;
        self
    }

    pub fn dose_fractions(mut self, on: bool) -> Self {
        self.raw.mc.dose_fractions = on as u8;
        self
    }

    pub fn run_framewatcher(mut self, on: bool) -> Self {
        self.raw.mc.run_framewatcher = on as u8;
        self
    }

    pub fn track_method(mut self, method: u8) -> Self {
        self.raw.imod.tracking.track_method = method;
        self
    }

    pub fn patch(mut self, size_x: u32, size_y: u32, overlap_x: f64, overlap_y: f64) -> Self {
        self.raw.imod.tracking.patch = Some(RawPatchSection {
            patch_size_x: size_x,
            patch_size_y: size_y,
            patch_overlap_x: overlap_x,
            patch_overlap_y: overlap_y,
        });
        self
    }

    pub fn do_ctf(mut self, on: bool) -> Self {
        self.raw.imod.final_alignment.do_ctf = on as u8;
        self
    }

    pub fn do_dose_weighting(mut self, on: bool) -> Self {
        self.raw.imod.final_alignment.do_dose_weighting = on as u8;
        self
    }

    pub fn reconstruct_method(mut self, method: u8) -> Self {
        self.raw.imod.reconstruction.reconstruct_method = method;
        self
    }

    pub fn do_trimvol(mut self, on: bool) -> Self {
        self.raw.imod.postprocess.do_trimvol = on as u8;
        self
    }

    pub fn do_denoising(mut self, on: bool) -> Self {
        self.raw.denoising.do_denoising = on as u8;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.raw.orchestrator.max_attempts = attempts;
        self
    }

    pub fn retry_secs(mut self, base: u64, max: u64) -> Self {
        self.raw.orchestrator.retry_base_secs = base;
        self.raw.orchestrator.retry_max_secs = max;
        self
    }

    pub fn stage_timeout_secs(mut self, secs: u64) -> Self {
        self.raw.orchestrator.stage_timeout_secs = secs;
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.raw.orchestrator.poll_interval_secs = secs;
        self
    }

    pub fn settle_secs(mut self, secs: u64) -> Self {
        self.raw.orchestrator.settle_secs = secs;
        self
    }

    pub fn duplicate_mdoc(mut self, policy: DuplicatePolicy) -> Self {
        self.raw.orchestrator.duplicate_mdoc = policy;
        self
    }

    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.raw.orchestrator.state_file = path.into();
        self
    }

    /// The raw config, for tests exercising validation failures.
    pub fn build_raw(self) -> RawPipelineConfig {
        self.raw
    }

    pub fn build(self) -> PipelineConfig {
        PipelineConfig::try_from(self.raw).expect("Failed to build valid config from builder")
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
