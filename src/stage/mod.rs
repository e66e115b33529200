// src/stage/mod.rs

//! Processing stages and their fixed dependency graph.
//!
//! - [`graph`] holds the static DAG over the eight stages.
//! - [`state`] holds per-dataset, per-stage status records.

pub mod graph;
pub mod state;

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;

pub use graph::StageGraph;
pub use state::{StageRecord, StageStatus};

/// One discrete processing step of the tilt-series pipeline.
///
/// The set and order are fixed; which optional stages actually run for a
/// dataset is decided by configuration at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    MotionCorrection,
    CtfEstimation,
    Tracking,
    FinalAlignment,
    DoseWeighting,
    Reconstruction,
    PostProcess,
    Denoising,
}

/// Resource class a stage's external tool runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceClass {
    Cpu,
    Gpu,
}

impl Stage {
    /// All stages in canonical pipeline order.
    pub const ALL: [Stage; 8] = [
        Stage::MotionCorrection,
        Stage::CtfEstimation,
        Stage::Tracking,
        Stage::FinalAlignment,
        Stage::DoseWeighting,
        Stage::Reconstruction,
        Stage::PostProcess,
        Stage::Denoising,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::MotionCorrection => "motion_correction",
            Stage::CtfEstimation => "ctf_estimation",
            Stage::Tracking => "tracking",
            Stage::FinalAlignment => "final_alignment",
            Stage::DoseWeighting => "dose_weighting",
            Stage::Reconstruction => "reconstruction",
            Stage::PostProcess => "postprocess",
            Stage::Denoising => "denoising",
        }
    }

    /// Which slot class the stage's tool occupies while running.
    pub fn resource_class(&self) -> ResourceClass {
        match self {
            Stage::MotionCorrection
            | Stage::FinalAlignment
            | Stage::Reconstruction
            | Stage::Denoising => ResourceClass::Gpu,
            Stage::CtfEstimation
            | Stage::Tracking
            | Stage::DoseWeighting
            | Stage::PostProcess => ResourceClass::Cpu,
        }
    }

    /// Whether the stage runs for datasets under the given configuration.
    ///
    /// A disabled stage is recorded as Skipped at registration and satisfies
    /// its dependents exactly like a Succeeded one.
    pub fn enabled(&self, cfg: &PipelineConfig) -> bool {
        match self {
            Stage::MotionCorrection => cfg.mc.run_framewatcher && cfg.mc.dose_fractions,
            Stage::CtfEstimation => cfg.imod.final_alignment.do_ctf,
            Stage::Tracking => true,
            Stage::FinalAlignment => true,
            Stage::DoseWeighting => cfg.imod.final_alignment.do_dose_weighting,
            Stage::Reconstruction => true,
            Stage::PostProcess => cfg.imod.postprocess.do_trimvol,
            Stage::Denoising => cfg.denoising.do_denoising,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
