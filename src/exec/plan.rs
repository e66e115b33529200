// src/exec/plan.rs

//! Per-stage parameter mapping.
//!
//! Each function maps the relevant configuration section plus a dataset's
//! acquisition metadata into the external tool's invocation. The tools are
//! black boxes to the orchestrator; only their parameter surface and the
//! artifact they leave behind matter here.

use std::path::PathBuf;

use crate::config::{PipelineConfig, ReconstructMethod, TrackMethod};
use crate::exec::invocation::ToolInvocation;
use crate::registry::DatasetRecord;
use crate::stage::Stage;

/// Processing directory for one dataset, under the raw-data tree.
pub fn processing_dir(cfg: &PipelineConfig, record: &DatasetRecord) -> PathBuf {
    cfg.setup
        .raw_data_dir
        .join("Aligned")
        .join(record.id.as_str())
}

/// Directory dose-fraction movies are grouped into.
pub fn frames_dir(cfg: &PipelineConfig) -> PathBuf {
    cfg.setup.raw_data_dir.join("Frames")
}

/// Build the tool invocation for one stage of one dataset.
pub fn build_invocation(
    stage: Stage,
    cfg: &PipelineConfig,
    record: &DatasetRecord,
) -> ToolInvocation {
    match stage {
        Stage::MotionCorrection => motion_correction(cfg, record),
        Stage::CtfEstimation => ctf_estimation(cfg, record),
        Stage::Tracking => tracking(cfg, record),
        Stage::FinalAlignment => final_alignment(cfg, record),
        Stage::DoseWeighting => dose_weighting(cfg, record),
        Stage::Reconstruction => reconstruction(cfg, record),
        Stage::PostProcess => postprocess(cfg, record),
        Stage::Denoising => denoising(cfg, record),
    }
}

/// Pixel size in nm, preferring the dataset's mdoc over the config.
fn pixel_size(cfg: &PipelineConfig, record: &DatasetRecord) -> Option<f64> {
    record.metadata.pixel_size.or(cfg.data.pixel_size)
}

/// Exposure dose, preferring the dataset's mdoc over the config.
fn exposure(cfg: &PipelineConfig, record: &DatasetRecord) -> Option<f64> {
    record.metadata.exposure.or(cfg.data.exposure)
}

fn tilt_axis(cfg: &PipelineConfig, record: &DatasetRecord) -> f64 {
    record.metadata.tilt_axis.unwrap_or(cfg.setup.tilt_axis)
}

/// The motion-corrected tilt stack; `alignframes` appends `_ali` to the
/// series name.
fn corrected_stack(cfg: &PipelineConfig, record: &DatasetRecord) -> PathBuf {
    let name = if Stage::MotionCorrection.enabled(cfg) {
        format!("{}_ali.mrc", record.id)
    } else {
        format!("{}.{}", record.id, cfg.data.extension)
    };
    processing_dir(cfg, record).join(name)
}

fn motion_correction(cfg: &PipelineConfig, record: &DatasetRecord) -> ToolInvocation {
    let workdir = processing_dir(cfg, record);
    let artifact = workdir.join(format!("{}_ali.mrc", record.id));

    let mut args: Vec<String> = vec!["-UseGPU".into(), "0".into()];

    match &record.mdoc_path {
        Some(mdoc) => {
            args.push("-MetadataFile".into());
            args.push(mdoc.display().to_string());
        }
        None => {
            args.push("-InputFile".into());
            args.push(
                frames_dir(cfg)
                    .join(format!("{}.{}", record.id, cfg.data.extension))
                    .display()
                    .to_string(),
            );
        }
    }

    if let Some(gain) = &cfg.setup.gain_path {
        args.push("-GainReferenceFile".into());
        args.push(gain.display().to_string());
    }
    if cfg.mc.do_mc_doseweight {
        if let Some(dose) = exposure(cfg, record) {
            args.push("-TotalDose".into());
            args.push(format!("{dose}"));
        }
    }
    if cfg.mc.drop_mean > 0.0 {
        args.push("-DropBelowMean".into());
        args.push(format!("{}", cfg.mc.drop_mean));
    }

    args.push("-OutputImageFile".into());
    args.push(artifact.display().to_string());

    ToolInvocation {
        program: "alignframes".into(),
        args,
        workdir,
        artifact,
    }
}

fn ctf_estimation(cfg: &PipelineConfig, record: &DatasetRecord) -> ToolInvocation {
    let workdir = processing_dir(cfg, record);
    let artifact = workdir.join(format!("{}.defocus", record.id));
    let ctf = &cfg.imod.ctf;

    let mut args: Vec<String> = vec![
        "-InputStack".into(),
        corrected_stack(cfg, record).display().to_string(),
        "-DefocusFile".into(),
        artifact.display().to_string(),
        "-AxisAngle".into(),
        format!("{}", tilt_axis(cfg, record)),
        "-Voltage".into(),
        format!("{}", ctf.voltage),
        "-SphericalAberration".into(),
        format!("{}", ctf.cs),
        "-ScanDefocusRange".into(),
        format!("{},{}", ctf.defocus_range_low, ctf.defocus_range_high),
        "-AutoFitRangeAndStep".into(),
        format!("{},{}", ctf.autofit_range, ctf.autofit_step),
        "-BaselineFittingOrder".into(),
        "4".into(),
        "-SearchAstigmatism".into(),
        "1".into(),
    ];

    if let Some(px) = pixel_size(cfg, record) {
        args.push("-PixelSize".into());
        args.push(format!("{px}"));
    }
    if ctf.tune_fitting_sampling {
        args.push("-TuneFittingSampling".into());
    }
    args.push("-SaveAndExit".into());

    ToolInvocation {
        program: "ctfplotter".into(),
        args,
        workdir,
        artifact,
    }
}

fn tracking(cfg: &PipelineConfig, record: &DatasetRecord) -> ToolInvocation {
    let workdir = processing_dir(cfg, record);
    let artifact = workdir.join(format!("{}.fid", record.id));
    let tracking = &cfg.imod.tracking;
    let stack = corrected_stack(cfg, record).display().to_string();

    match tracking.method {
        TrackMethod::Fiducial => {
            let fid = &tracking.fiducial;
            let mut args: Vec<String> = vec![
                "-InputStack".into(),
                stack,
                "-OutputModel".into(),
                artifact.display().to_string(),
                "-BeadSize".into(),
                format!("{}", tracking.size_gold),
                "-TargetNumberOfBeads".into(),
                format!("{}", fid.num_beads),
            ];
            if fid.use_sobel {
                args.push("-SobelFilterCentering".into());
                args.push("-KernelSigmaForSobel".into());
                args.push(format!("{}", fid.sobel_sigma));
            }

            ToolInvocation {
                program: "autofidseed".into(),
                args,
                workdir,
                artifact,
            }
        }
        TrackMethod::Patch => {
            // Validation guarantees the patch table exists for this method.
            let patch = tracking
                .patch
                .as_ref()
                .expect("patch tracking config present");
            let args: Vec<String> = vec![
                "-InputFile".into(),
                stack,
                "-OutputFile".into(),
                artifact.display().to_string(),
                "-RotationAngle".into(),
                format!("{}", tilt_axis(cfg, record)),
                "-SizeOfPatchesXandY".into(),
                format!("{},{}", patch.size_x, patch.size_y),
                "-OverlapOfPatchesXandY".into(),
                format!("{},{}", patch.overlap_x, patch.overlap_y),
            ];

            ToolInvocation {
                program: "tiltxcorr".into(),
                args,
                workdir,
                artifact,
            }
        }
    }
}

fn final_alignment(cfg: &PipelineConfig, record: &DatasetRecord) -> ToolInvocation {
    let workdir = processing_dir(cfg, record);
    let artifact = workdir.join(format!("{}.xf", record.id));
    let fa = &cfg.imod.final_alignment;

    let mut args: Vec<String> = vec![
        "-ModelFile".into(),
        workdir
            .join(format!("{}.fid", record.id))
            .display()
            .to_string(),
        "-ImageFile".into(),
        corrected_stack(cfg, record).display().to_string(),
        "-OutputTransformFile".into(),
        artifact.display().to_string(),
        "-RotationAngle".into(),
        format!("{}", tilt_axis(cfg, record)),
        "-ImagesAreBinned".into(),
        format!("{}", cfg.imod.prealign_bin),
        "-BinByFactor".into(),
        format!("{}", fa.final_bin),
    ];

    if fa.do_ctf {
        args.push("-DefocusFile".into());
        args.push(
            workdir
                .join(format!("{}.defocus", record.id))
                .display()
                .to_string(),
        );
    }

    ToolInvocation {
        program: "tiltalign".into(),
        args,
        workdir,
        artifact,
    }
}

fn dose_weighting(cfg: &PipelineConfig, record: &DatasetRecord) -> ToolInvocation {
    let workdir = processing_dir(cfg, record);
    let artifact = workdir.join(format!("{}_dw.mrc", record.id));

    let mut args: Vec<String> = vec![
        "-DoseWeighting".into(),
        "-InputFile".into(),
        corrected_stack(cfg, record).display().to_string(),
        "-OutputFile".into(),
        artifact.display().to_string(),
        "-Voltage".into(),
        format!("{}", cfg.imod.ctf.voltage),
    ];

    if let Some(dose) = exposure(cfg, record) {
        args.push("-DosePerImage".into());
        args.push(format!("{dose}"));
    }
    if cfg.imod.dose_weight.dose_sym {
        args.push("-DoseSymmetric".into());
    }

    ToolInvocation {
        program: "mtffilter".into(),
        args,
        workdir,
        artifact,
    }
}

fn reconstruction(cfg: &PipelineConfig, record: &DatasetRecord) -> ToolInvocation {
    let workdir = processing_dir(cfg, record);
    let artifact = workdir.join(format!("{}_full_rec.mrc", record.id));
    let rec = &cfg.imod.reconstruction;

    let input = if Stage::DoseWeighting.enabled(cfg) {
        workdir.join(format!("{}_dw.mrc", record.id))
    } else {
        corrected_stack(cfg, record)
    };

    let mut args: Vec<String> = vec![
        "-InputProjections".into(),
        input.display().to_string(),
        "-TILTFILE".into(),
        workdir
            .join(format!("{}.tlt", record.id))
            .display()
            .to_string(),
        "-XFORMFILE".into(),
        workdir
            .join(format!("{}.xf", record.id))
            .display()
            .to_string(),
        "-THICKNESS".into(),
        format!("{}", cfg.effective_thickness()),
        "-UseGPU".into(),
        "0".into(),
        "-OutputFile".into(),
        artifact.display().to_string(),
    ];

    let program = match rec.method {
        ReconstructMethod::WeightedBackProjection => {
            if rec.fake_sirt_iters > 0 {
                args.push("-FakeSIRTiterations".into());
                args.push(format!("{}", rec.fake_sirt_iters));
            }
            "tilt"
        }
        ReconstructMethod::Sirt => {
            args.push("-NumberOfIterations".into());
            args.push(format!("{}", rec.sirt_iters));
            "sirtsetup"
        }
    };

    ToolInvocation {
        program: program.into(),
        args,
        workdir,
        artifact,
    }
}

fn postprocess(cfg: &PipelineConfig, record: &DatasetRecord) -> ToolInvocation {
    let workdir = processing_dir(cfg, record);
    let artifact = workdir.join(format!("{}_rec.mrc", record.id));

    let mut args: Vec<String> = Vec::new();
    if cfg.imod.postprocess.reorient {
        args.push("-rx".into());
    }
    args.push(
        workdir
            .join(format!("{}_full_rec.mrc", record.id))
            .display()
            .to_string(),
    );
    args.push(artifact.display().to_string());

    ToolInvocation {
        program: "trimvol".into(),
        args,
        workdir,
        artifact,
    }
}

fn denoising(cfg: &PipelineConfig, record: &DatasetRecord) -> ToolInvocation {
    let workdir = processing_dir(cfg, record);
    let artifact = workdir.join(format!("{}_rec_dn.mrc", record.id));

    // The trimmed tomogram when postprocessing ran, the full one otherwise.
    let input = if Stage::PostProcess.enabled(cfg) {
        workdir.join(format!("{}_rec.mrc", record.id))
    } else {
        workdir.join(format!("{}_full_rec.mrc", record.id))
    };

    let args: Vec<String> = vec![
        "-InputVolume".into(),
        input.display().to_string(),
        "-OutputVolume".into(),
        artifact.display().to_string(),
    ];

    ToolInvocation {
        program: "cryocare_predict".into(),
        args,
        workdir,
        artifact,
    }
}
