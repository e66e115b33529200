// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{
    AcquisitionSoftware, CtfConfig, DataConfig, DenoisingConfig, DoseWeightConfig,
    FiducialConfig, FinalAlignmentConfig, ImodConfig, McConfig, OrchestratorConfig,
    PatchConfig, PipelineConfig, PostprocessConfig, RawPipelineConfig,
    ReconstructMethod, ReconstructionConfig, SetupConfig, TrackMethod, TrackingConfig,
};
use crate::errors::{PipelineError, Result};

impl TryFrom<RawPipelineConfig> for PipelineConfig {
    type Error = PipelineError;

    fn try_from(raw: RawPipelineConfig) -> std::result::Result<Self, Self::Error> {
        let setup = validate_setup(&raw)?;
        let data = validate_data(&raw, setup.read_mdoc)?;
        let mc = validate_mc(&raw)?;
        let imod = validate_imod(&raw)?;
        let denoising = DenoisingConfig {
            do_denoising: flag("denoising.DO_DENOISING", raw.denoising.do_denoising)?,
        };
        let orchestrator = validate_orchestrator(&raw)?;

        Ok(PipelineConfig {
            setup,
            data,
            mc,
            imod,
            denoising,
            orchestrator,
        })
    }
}

fn validate_setup(raw: &RawPipelineConfig) -> Result<SetupConfig> {
    let s = &raw.setup;

    if s.cpus == 0 {
        return Err(config_err("setup.CPUS must be >= 1 (got 0)"));
    }
    // Motion correction, alignment, and reconstruction are GPU-bound.
    if s.gpus == 0 {
        return Err(config_err("setup.GPUS must be >= 1 (got 0)"));
    }

    let software = match s.software {
        1 => AcquisitionSoftware::SerialEm,
        2 => AcquisitionSoftware::Tomo5,
        other => {
            return Err(config_err(format!(
                "setup.SOFTWARE must be 1 (SerialEM) or 2 (Tomography 5), got {other}"
            )));
        }
    };

    if s.data.raw_data_dir.as_os_str().is_empty() {
        return Err(config_err("setup.data.RAW_DATA_DIR must not be empty"));
    }

    Ok(SetupConfig {
        cpus: s.cpus as usize,
        gpus: s.gpus as usize,
        software,
        tilt_axis: s.tiltaxis,
        frames_name: s.data.frames_name.clone(),
        gain_path: s.data.gain_path.clone(),
        mdoc_duplicate: s.data.mdoc_duplicate.clone(),
        raw_data_dir: s.data.raw_data_dir.clone(),
        read_mdoc: flag("setup.data.READ_MDOC", s.data.read_mdoc)?,
        transfer_raw_data: flag("setup.data.TRANSFER_RAW_DATA", s.data.transfer_raw_data)?,
    })
}

fn validate_data(raw: &RawPipelineConfig, read_mdoc: bool) -> Result<DataConfig> {
    let d = raw.data.clone().unwrap_or_default();

    if let Some(px) = d.pixel_size {
        if px <= 0.0 {
            return Err(config_err(format!("data.PIXEL_SIZE must be > 0 (got {px})")));
        }
    }
    if let Some(exp) = d.exposure {
        if exp <= 0.0 {
            return Err(config_err(format!("data.EXPOSURE must be > 0 (got {exp})")));
        }
    }
    if d.extension.is_empty() {
        return Err(config_err("data.EXTENSION must not be empty"));
    }

    // With no acquisition logs to read, pixel size and exposure must come
    // from the config itself.
    if !read_mdoc {
        if d.pixel_size.is_none() {
            return Err(config_err(
                "data.PIXEL_SIZE is required when setup.data.READ_MDOC = 0",
            ));
        }
        if d.exposure.is_none() {
            return Err(config_err(
                "data.EXPOSURE is required when setup.data.READ_MDOC = 0",
            ));
        }
    }

    Ok(DataConfig {
        exposure: d.exposure,
        extension: d.extension,
        pixel_size: d.pixel_size,
    })
}

fn validate_mc(raw: &RawPipelineConfig) -> Result<McConfig> {
    let m = &raw.mc;

    if m.drop_mean < 0.0 {
        return Err(config_err(format!(
            "mc.DROP_MEAN must be >= 0 (got {})",
            m.drop_mean
        )));
    }

    Ok(McConfig {
        dose_fractions: flag("mc.DOSE_FRACTIONS", m.dose_fractions)?,
        do_mc_doseweight: flag("mc.DO_MC_DOSEWEIGHT", m.do_mc_doseweight)?,
        drop_mean: m.drop_mean,
        run_framewatcher: flag("mc.RUN_FRAMEWATCHER", m.run_framewatcher)?,
    })
}

fn validate_imod(raw: &RawPipelineConfig) -> Result<ImodConfig> {
    let i = &raw.imod;

    if i.prealign_bin == 0 {
        return Err(config_err("imod.PREALIGN_BIN must be >= 1 (got 0)"));
    }

    let tracking = validate_tracking(raw)?;
    let final_alignment = validate_final_alignment(raw)?;
    let ctf = validate_ctf(raw)?;
    let reconstruction = validate_reconstruction(raw)?;

    Ok(ImodConfig {
        prealign_bin: i.prealign_bin,
        remove_xrays: flag("imod.REMOVE_XRAYS", i.remove_xrays)?,
        tracking,
        final_alignment,
        ctf,
        dose_weight: DoseWeightConfig {
            dose_sym: flag("imod.dose_weight.DOSE_SYM", i.dose_weight.dose_sym)?,
        },
        reconstruction,
        postprocess: PostprocessConfig {
            do_trimvol: flag("imod.postprocess.DO_TRIMVOL", i.postprocess.do_trimvol)?,
            reorient: flag("imod.postprocess.REORIENT", i.postprocess.reorient)?,
        },
    })
}

fn validate_tracking(raw: &RawPipelineConfig) -> Result<TrackingConfig> {
    let t = &raw.imod.tracking;

    if t.size_gold <= 0.0 {
        return Err(config_err(format!(
            "imod.tracking.SIZE_GOLD must be > 0 (got {})",
            t.size_gold
        )));
    }

    let method = match t.track_method {
        0 => TrackMethod::Fiducial,
        1 => TrackMethod::Patch,
        other => {
            return Err(config_err(format!(
                "imod.tracking.TRACK_METHOD must be 0 (fiducial) or 1 (patch), got {other}"
            )));
        }
    };

    if t.fiducial.num_beads == 0 {
        return Err(config_err(
            "imod.tracking.fiducial.NUM_BEADS must be >= 1 (got 0)",
        ));
    }
    if t.fiducial.sobel_sigma <= 0.0 {
        return Err(config_err(format!(
            "imod.tracking.fiducial.SOBEL_SIGMA must be > 0 (got {})",
            t.fiducial.sobel_sigma
        )));
    }

    let patch = match (&method, &t.patch) {
        (TrackMethod::Patch, None) => {
            return Err(config_err(
                "imod.tracking.patch is required when TRACK_METHOD = 1",
            ));
        }
        (_, Some(p)) => {
            if p.patch_size_x == 0 || p.patch_size_y == 0 {
                return Err(config_err(
                    "imod.tracking.patch.PATCH_SIZE_X/Y must be >= 1",
                ));
            }
            for (key, v) in [
                ("PATCH_OVERLAP_X", p.patch_overlap_x),
                ("PATCH_OVERLAP_Y", p.patch_overlap_y),
            ] {
                if v <= 0.0 || v >= 1.0 {
                    return Err(config_err(format!(
                        "imod.tracking.patch.{key} must be in (0, 1), got {v}"
                    )));
                }
            }
            Some(PatchConfig {
                size_x: p.patch_size_x,
                size_y: p.patch_size_y,
                overlap_x: p.patch_overlap_x,
                overlap_y: p.patch_overlap_y,
            })
        }
        (TrackMethod::Fiducial, None) => None,
    };

    Ok(TrackingConfig {
        size_gold: t.size_gold,
        method,
        fiducial: FiducialConfig {
            num_beads: t.fiducial.num_beads,
            sobel_sigma: t.fiducial.sobel_sigma,
            use_sobel: flag("imod.tracking.fiducial.USE_SOBEL", t.fiducial.use_sobel)?,
        },
        patch,
    })
}

fn validate_final_alignment(raw: &RawPipelineConfig) -> Result<FinalAlignmentConfig> {
    let f = &raw.imod.final_alignment;

    if f.final_bin == 0 {
        return Err(config_err(
            "imod.final_alignment.FINAL_BIN must be >= 1 (got 0)",
        ));
    }

    Ok(FinalAlignmentConfig {
        do_ctf: flag("imod.final_alignment.DO_CTF", f.do_ctf)?,
        do_dose_weighting: flag("imod.final_alignment.DO_DOSE_WEIGHTING", f.do_dose_weighting)?,
        final_bin: f.final_bin,
    })
}

fn validate_ctf(raw: &RawPipelineConfig) -> Result<CtfConfig> {
    let c = &raw.imod.ctf;

    if c.voltage == 0 {
        return Err(config_err("imod.ctf.VOLTAGE must be > 0 (got 0)"));
    }
    if c.defocus_range_low >= c.defocus_range_high {
        return Err(config_err(format!(
            "imod.ctf.DEFOCUS_RANGE_LOW ({}) must be < DEFOCUS_RANGE_HIGH ({})",
            c.defocus_range_low, c.defocus_range_high
        )));
    }
    if c.autofit_step <= 0.0 {
        return Err(config_err(format!(
            "imod.ctf.AUTOFIT_STEP must be > 0 (got {})",
            c.autofit_step
        )));
    }

    Ok(CtfConfig {
        autofit_range: c.autofit_range,
        autofit_step: c.autofit_step,
        cs: c.cs,
        defocus_range_low: c.defocus_range_low,
        defocus_range_high: c.defocus_range_high,
        tune_fitting_sampling: flag("imod.ctf.TUNE_FITTING_SAMPLING", c.tune_fitting_sampling)?,
        voltage: c.voltage,
    })
}

fn validate_reconstruction(raw: &RawPipelineConfig) -> Result<ReconstructionConfig> {
    let r = &raw.imod.reconstruction;

    let method = match r.reconstruct_method {
        1 => ReconstructMethod::WeightedBackProjection,
        2 => ReconstructMethod::Sirt,
        other => {
            return Err(config_err(format!(
                "imod.reconstruction.RECONSTRUCT_METHOD must be 1 (back-projection) or 2 (SIRT), got {other}"
            )));
        }
    };

    if r.thickness_unbinned == 0 && r.thickness_binned.is_none() {
        return Err(config_err(
            "imod.reconstruction.THICKNESS_UNBINNED must be > 0 when THICKNESS_BINNED is not set",
        ));
    }
    if let Some(0) = r.thickness_binned {
        return Err(config_err(
            "imod.reconstruction.THICKNESS_BINNED must be > 0 when set",
        ));
    }

    Ok(ReconstructionConfig {
        fake_sirt_iters: r.fake_sirt_iters,
        method,
        sirt_iters: r.sirt_iters,
        thickness_binned: r.thickness_binned,
        thickness_unbinned: r.thickness_unbinned,
    })
}

fn validate_orchestrator(raw: &RawPipelineConfig) -> Result<OrchestratorConfig> {
    let o = &raw.orchestrator;

    if o.poll_interval_secs == 0 {
        return Err(config_err("orchestrator.POLL_INTERVAL_SECS must be >= 1 (got 0)"));
    }
    if o.max_attempts == 0 {
        return Err(config_err("orchestrator.MAX_ATTEMPTS must be >= 1 (got 0)"));
    }
    if o.retry_base_secs == 0 {
        return Err(config_err("orchestrator.RETRY_BASE_SECS must be >= 1 (got 0)"));
    }
    if o.retry_max_secs < o.retry_base_secs {
        return Err(config_err(format!(
            "orchestrator.RETRY_MAX_SECS ({}) must be >= RETRY_BASE_SECS ({})",
            o.retry_max_secs, o.retry_base_secs
        )));
    }
    if o.stage_timeout_secs == 0 {
        return Err(config_err("orchestrator.STAGE_TIMEOUT_SECS must be >= 1 (got 0)"));
    }
    if o.event_channel_capacity == 0 {
        return Err(config_err(
            "orchestrator.EVENT_CHANNEL_CAPACITY must be >= 1 (got 0)",
        ));
    }

    Ok(OrchestratorConfig {
        poll_interval: Duration::from_secs(o.poll_interval_secs),
        settle: Duration::from_secs(o.settle_secs),
        max_attempts: o.max_attempts,
        retry_base: Duration::from_secs(o.retry_base_secs),
        retry_max: Duration::from_secs(o.retry_max_secs),
        stage_timeout: Duration::from_secs(o.stage_timeout_secs),
        gpu_host_cpu: flag("orchestrator.GPU_HOST_CPU", o.gpu_host_cpu)?,
        duplicate_mdoc: o.duplicate_mdoc,
        state_file: o.state_file.clone(),
        event_channel_capacity: o.event_channel_capacity,
    })
}

/// Convert a 0/1 switch to `bool`, rejecting anything else.
fn flag(key: &str, value: u8) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(config_err(format!("{key} must be 0 or 1, got {other}"))),
    }
}

fn config_err(msg: impl Into<String>) -> PipelineError {
    PipelineError::Config(msg.into())
}
