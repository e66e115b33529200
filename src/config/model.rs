// src/config/model.rs

//! Raw and validated configuration models.
//!
//! The raw structs below are a direct serde mapping of the pipeline TOML:
//!
//! ```toml
//! [setup]
//! CPUS = 8
//! GPUS = 1
//! TILTAXIS = 85.3
//!
//! [setup.data]
//! RAW_DATA_DIR = "/data/glacios/session_42"
//! READ_MDOC = 1
//!
//! [imod.tracking]
//! TRACK_METHOD = 0
//!
//! [imod.tracking.fiducial]
//! NUM_BEADS = 25
//! ```
//!
//! Scalar on/off switches use the acquisition software's 0/1 convention and
//! are converted to `bool` during validation (`config::validate`). The
//! validated [`PipelineConfig`] is immutable after load; everything
//! downstream reads typed fields, never raw keys.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level raw configuration as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPipelineConfig {
    pub setup: RawSetupSection,

    /// Acquisition parameters; required when `READ_MDOC = 0`, otherwise the
    /// values are taken from each dataset's mdoc.
    #[serde(default)]
    pub data: Option<RawDataSection>,

    #[serde(default)]
    pub mc: RawMcSection,

    #[serde(default)]
    pub imod: RawImodSection,

    #[serde(default)]
    pub denoising: RawDenoisingSection,

    #[serde(default)]
    pub orchestrator: RawOrchestratorSection,
}

/// `[setup]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawSetupSection {
    /// Number of CPU slots available to the pipeline.
    pub cpus: u32,

    /// Number of GPU slots available to the pipeline.
    pub gpus: u32,

    /// Acquisition software: 1 = SerialEM, 2 = Tomography 5.
    #[serde(default = "default_software")]
    pub software: u8,

    /// Nominal tilt-axis rotation angle in degrees.
    pub tiltaxis: f64,

    #[serde(rename = "data")]
    pub data: RawSetupDataSection,
}

fn default_software() -> u8 {
    1
}

/// `[setup.data]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawSetupDataSection {
    /// Substring identifying dose-fraction movie files.
    #[serde(default = "default_frames_name")]
    pub frames_name: String,

    /// Gain reference for motion correction, if the camera needs one.
    #[serde(default)]
    pub gain_path: Option<PathBuf>,

    /// Marker found in duplicated mdoc file names written by the microscope.
    #[serde(default)]
    pub mdoc_duplicate: Option<String>,

    /// Root directory the microscope writes raw tilt series into.
    pub raw_data_dir: PathBuf,

    /// Read per-dataset metadata from mdoc acquisition logs (0/1).
    #[serde(default = "default_one")]
    pub read_mdoc: u8,

    /// Whether raw data is staged in by an external transfer step (0/1).
    /// The orchestrator itself never copies raw data.
    #[serde(default)]
    pub transfer_raw_data: u8,
}

fn default_frames_name() -> String {
    "Frames".to_string()
}

fn default_one() -> u8 {
    1
}

/// `[data]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawDataSection {
    /// Exposure dose per tilt image (e/Å²).
    #[serde(default)]
    pub exposure: Option<f64>,

    /// Movie file extension to scan for (without the dot).
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Pixel size in nm.
    #[serde(default)]
    pub pixel_size: Option<f64>,
}

fn default_extension() -> String {
    "mrc".to_string()
}

impl Default for RawDataSection {
    fn default() -> Self {
        Self {
            exposure: None,
            extension: default_extension(),
            pixel_size: None,
        }
    }
}

/// `[mc]` section — motion correction.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawMcSection {
    /// Raw movies are dose-fractionated (0/1).
    #[serde(default = "default_one")]
    pub dose_fractions: u8,

    /// Apply dose weighting during frame alignment (0/1).
    #[serde(default)]
    pub do_mc_doseweight: u8,

    /// Drop frames whose mean counts fall below this fraction of the
    /// stack mean; 0 disables the filter.
    #[serde(default)]
    pub drop_mean: f64,

    /// Run the frame watcher for on-the-fly motion correction (0/1).
    #[serde(default = "default_one")]
    pub run_framewatcher: u8,
}

impl Default for RawMcSection {
    fn default() -> Self {
        Self {
            dose_fractions: default_one(),
            do_mc_doseweight: 0,
            drop_mean: 0.0,
            run_framewatcher: default_one(),
        }
    }
}

/// `[imod]` section and subsections.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawImodSection {
    /// Binning for the prealigned stack.
    #[serde(default = "default_prealign_bin")]
    pub prealign_bin: u32,

    /// Remove X-ray artifacts during preprocessing (0/1).
    #[serde(default = "default_one")]
    pub remove_xrays: u8,

    #[serde(rename = "tracking", default)]
    pub tracking: RawTrackingSection,

    #[serde(rename = "final_alignment", default)]
    pub final_alignment: RawFinalAlignmentSection,

    #[serde(rename = "ctf", default)]
    pub ctf: RawCtfSection,

    #[serde(rename = "dose_weight", default)]
    pub dose_weight: RawDoseWeightSection,

    #[serde(rename = "reconstruction", default)]
    pub reconstruction: RawReconstructionSection,

    #[serde(rename = "postprocess", default)]
    pub postprocess: RawPostprocessSection,
}

fn default_prealign_bin() -> u32 {
    2
}

impl Default for RawImodSection {
    fn default() -> Self {
        Self {
            prealign_bin: default_prealign_bin(),
            remove_xrays: default_one(),
            tracking: RawTrackingSection::default(),
            final_alignment: RawFinalAlignmentSection::default(),
            ctf: RawCtfSection::default(),
            dose_weight: RawDoseWeightSection::default(),
            reconstruction: RawReconstructionSection::default(),
            postprocess: RawPostprocessSection::default(),
        }
    }
}

/// `[imod.tracking]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawTrackingSection {
    /// Gold bead diameter in nm.
    #[serde(default = "default_size_gold")]
    pub size_gold: f64,

    /// 0 = fiducial bead tracking, 1 = patch tracking.
    #[serde(default)]
    pub track_method: u8,

    #[serde(rename = "fiducial", default)]
    pub fiducial: RawFiducialSection,

    /// Required when `TRACK_METHOD = 1`.
    #[serde(rename = "patch", default)]
    pub patch: Option<RawPatchSection>,
}

fn default_size_gold() -> f64 {
    10.0
}

impl Default for RawTrackingSection {
    fn default() -> Self {
        Self {
            size_gold: default_size_gold(),
            track_method: 0,
            fiducial: RawFiducialSection::default(),
            patch: None,
        }
    }
}

/// `[imod.tracking.fiducial]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawFiducialSection {
    /// Target number of beads for automatic seeding.
    #[serde(default = "default_num_beads")]
    pub num_beads: u32,

    /// Kernel sigma for Sobel-filtered bead centering.
    #[serde(default = "default_sobel_sigma")]
    pub sobel_sigma: f64,

    /// Use Sobel filter centering (0/1).
    #[serde(default = "default_one")]
    pub use_sobel: u8,
}

fn default_num_beads() -> u32 {
    25
}

fn default_sobel_sigma() -> f64 {
    1.5
}

impl Default for RawFiducialSection {
    fn default() -> Self {
        Self {
            num_beads: default_num_beads(),
            sobel_sigma: default_sobel_sigma(),
            use_sobel: default_one(),
        }
    }
}

/// `[imod.tracking.patch]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawPatchSection {
    pub patch_size_x: u32,
    pub patch_size_y: u32,

    /// Fractional overlap between adjacent patches, in (0, 1).
    pub patch_overlap_x: f64,
    pub patch_overlap_y: f64,
}

/// `[imod.final_alignment]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawFinalAlignmentSection {
    /// Estimate and correct CTF (0/1).
    #[serde(default = "default_one")]
    pub do_ctf: u8,

    /// Apply dose weighting to the aligned stack (0/1).
    #[serde(default)]
    pub do_dose_weighting: u8,

    /// Binning for the final aligned stack.
    #[serde(default = "default_final_bin")]
    pub final_bin: u32,
}

fn default_final_bin() -> u32 {
    6
}

impl Default for RawFinalAlignmentSection {
    fn default() -> Self {
        Self {
            do_ctf: default_one(),
            do_dose_weighting: 0,
            final_bin: default_final_bin(),
        }
    }
}

/// `[imod.ctf]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawCtfSection {
    /// Autofit tilt-angle range in degrees; 0 fits all views together.
    #[serde(default)]
    pub autofit_range: f64,

    /// Autofit step in degrees.
    #[serde(default = "default_autofit_step")]
    pub autofit_step: f64,

    /// Spherical aberration in mm.
    #[serde(default = "default_cs")]
    pub cs: f64,

    /// Defocus scan range in microns, low bound.
    #[serde(default = "default_defocus_low")]
    pub defocus_range_low: f64,

    /// Defocus scan range in microns, high bound.
    #[serde(default = "default_defocus_high")]
    pub defocus_range_high: f64,

    /// Tune the fitting sampling before the scan (0/1).
    #[serde(default)]
    pub tune_fitting_sampling: u8,

    /// Acceleration voltage in kV.
    #[serde(default = "default_voltage")]
    pub voltage: u32,
}

fn default_autofit_step() -> f64 {
    1.0
}

fn default_cs() -> f64 {
    2.7
}

fn default_defocus_low() -> f64 {
    0.1
}

fn default_defocus_high() -> f64 {
    10.0
}

fn default_voltage() -> u32 {
    300
}

impl Default for RawCtfSection {
    fn default() -> Self {
        Self {
            autofit_range: 0.0,
            autofit_step: default_autofit_step(),
            cs: default_cs(),
            defocus_range_low: default_defocus_low(),
            defocus_range_high: default_defocus_high(),
            tune_fitting_sampling: 0,
            voltage: default_voltage(),
        }
    }
}

/// `[imod.dose_weight]` section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawDoseWeightSection {
    /// Tilt scheme is dose-symmetric (0/1).
    #[serde(default)]
    pub dose_sym: u8,
}

/// `[imod.reconstruction]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawReconstructionSection {
    /// Fake-SIRT-like filter iterations for back-projection.
    #[serde(default)]
    pub fake_sirt_iters: u32,

    /// 1 = weighted back-projection, 2 = SIRT.
    #[serde(default = "default_reconstruct_method")]
    pub reconstruct_method: u8,

    /// SIRT iterations when `RECONSTRUCT_METHOD = 2`.
    #[serde(default = "default_sirt_iters")]
    pub sirt_iters: u32,

    /// Tomogram thickness in binned pixels; when set, the unbinned
    /// thickness is derived as `THICKNESS_BINNED * FINAL_BIN`.
    #[serde(default)]
    pub thickness_binned: Option<u32>,

    /// Tomogram thickness in unbinned pixels.
    #[serde(default = "default_thickness_unbinned")]
    pub thickness_unbinned: u32,
}

fn default_reconstruct_method() -> u8 {
    1
}

fn default_sirt_iters() -> u32 {
    10
}

fn default_thickness_unbinned() -> u32 {
    2000
}

impl Default for RawReconstructionSection {
    fn default() -> Self {
        Self {
            fake_sirt_iters: 0,
            reconstruct_method: default_reconstruct_method(),
            sirt_iters: default_sirt_iters(),
            thickness_binned: None,
            thickness_unbinned: default_thickness_unbinned(),
        }
    }
}

/// `[imod.postprocess]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawPostprocessSection {
    /// Trim the reconstructed volume (0/1).
    #[serde(default = "default_one")]
    pub do_trimvol: u8,

    /// Reorient (rotate around X) during trimming (0/1).
    #[serde(default = "default_one")]
    pub reorient: u8,
}

impl Default for RawPostprocessSection {
    fn default() -> Self {
        Self {
            do_trimvol: default_one(),
            reorient: default_one(),
        }
    }
}

/// `[denoising]` section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawDenoisingSection {
    /// Denoise the final tomogram (0/1).
    #[serde(default)]
    pub do_denoising: u8,
}

/// `[orchestrator]` section — scheduling tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RawOrchestratorSection {
    /// Watcher sweep interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// A dataset counts as fully arrived once its file set has been
    /// unchanged for this long.
    #[serde(default = "default_settle")]
    pub settle_secs: u64,

    /// Maximum attempts per stage for transient failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential retry backoff, in seconds.
    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,

    /// Ceiling for the retry backoff delay, in seconds.
    #[serde(default = "default_retry_max")]
    pub retry_max_secs: u64,

    /// Wall-clock ceiling per stage execution, in seconds.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// GPU stages also claim one CPU slot for host-side work (0/1).
    #[serde(default = "default_one")]
    pub gpu_host_cpu: u8,

    /// Policy when a second acquisition log appears for a registered
    /// dataset: `"overwrite"` or `"reject"`.
    #[serde(default)]
    pub duplicate_mdoc: DuplicatePolicy,

    /// Path of the persisted state snapshot.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Capacity of the runtime event channel.
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_settle() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base() -> u64 {
    30
}

fn default_retry_max() -> u64 {
    600
}

fn default_stage_timeout() -> u64 {
    3600
}

fn default_state_file() -> PathBuf {
    PathBuf::from(".cryopipe/state.json")
}

fn default_event_capacity() -> usize {
    64
}

impl Default for RawOrchestratorSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            settle_secs: default_settle(),
            max_attempts: default_max_attempts(),
            retry_base_secs: default_retry_base(),
            retry_max_secs: default_retry_max(),
            stage_timeout_secs: default_stage_timeout(),
            gpu_host_cpu: default_one(),
            duplicate_mdoc: DuplicatePolicy::default(),
            state_file: default_state_file(),
            event_channel_capacity: default_event_capacity(),
        }
    }
}

/// Policy for duplicate acquisition logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Replace the registered metadata with the newer log.
    #[default]
    Overwrite,
    /// Keep the registered metadata and halt that dataset's ingestion.
    Reject,
}

/// Acquisition software the raw data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionSoftware {
    SerialEm,
    Tomo5,
}

/// Tilt-series alignment tracking method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMethod {
    Fiducial,
    Patch,
}

/// Tomographic reconstruction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructMethod {
    WeightedBackProjection,
    Sirt,
}

/// Validated, immutable pipeline configuration.
///
/// Constructed only via `TryFrom<RawPipelineConfig>` in `config::validate`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub setup: SetupConfig,
    pub data: DataConfig,
    pub mc: McConfig,
    pub imod: ImodConfig,
    pub denoising: DenoisingConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone)]
pub struct SetupConfig {
    pub cpus: usize,
    pub gpus: usize,
    pub software: AcquisitionSoftware,
    pub tilt_axis: f64,
    pub frames_name: String,
    pub gain_path: Option<PathBuf>,
    pub mdoc_duplicate: Option<String>,
    pub raw_data_dir: PathBuf,
    pub read_mdoc: bool,
    pub transfer_raw_data: bool,
}

#[derive(Debug, Clone)]
pub struct DataConfig {
    pub exposure: Option<f64>,
    pub extension: String,
    pub pixel_size: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct McConfig {
    pub dose_fractions: bool,
    pub do_mc_doseweight: bool,
    pub drop_mean: f64,
    pub run_framewatcher: bool,
}

#[derive(Debug, Clone)]
pub struct ImodConfig {
    pub prealign_bin: u32,
    pub remove_xrays: bool,
    pub tracking: TrackingConfig,
    pub final_alignment: FinalAlignmentConfig,
    pub ctf: CtfConfig,
    pub dose_weight: DoseWeightConfig,
    pub reconstruction: ReconstructionConfig,
    pub postprocess: PostprocessConfig,
}

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub size_gold: f64,
    pub method: TrackMethod,
    pub fiducial: FiducialConfig,
    pub patch: Option<PatchConfig>,
}

#[derive(Debug, Clone)]
pub struct FiducialConfig {
    pub num_beads: u32,
    pub sobel_sigma: f64,
    pub use_sobel: bool,
}

#[derive(Debug, Clone)]
pub struct PatchConfig {
    pub size_x: u32,
    pub size_y: u32,
    pub overlap_x: f64,
    pub overlap_y: f64,
}

#[derive(Debug, Clone)]
pub struct FinalAlignmentConfig {
    pub do_ctf: bool,
    pub do_dose_weighting: bool,
    pub final_bin: u32,
}

#[derive(Debug, Clone)]
pub struct CtfConfig {
    pub autofit_range: f64,
    pub autofit_step: f64,
    pub cs: f64,
    pub defocus_range_low: f64,
    pub defocus_range_high: f64,
    pub tune_fitting_sampling: bool,
    pub voltage: u32,
}

#[derive(Debug, Clone)]
pub struct DoseWeightConfig {
    pub dose_sym: bool,
}

#[derive(Debug, Clone)]
pub struct ReconstructionConfig {
    pub fake_sirt_iters: u32,
    pub method: ReconstructMethod,
    pub sirt_iters: u32,
    pub thickness_binned: Option<u32>,
    pub thickness_unbinned: u32,
}

#[derive(Debug, Clone)]
pub struct PostprocessConfig {
    pub do_trimvol: bool,
    pub reorient: bool,
}

#[derive(Debug, Clone)]
pub struct DenoisingConfig {
    pub do_denoising: bool,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub settle: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub stage_timeout: Duration,
    pub gpu_host_cpu: bool,
    pub duplicate_mdoc: DuplicatePolicy,
    pub state_file: PathBuf,
    pub event_channel_capacity: usize,
}

impl PipelineConfig {
    /// Effective unbinned tomogram thickness, with the binned override
    /// applied when present.
    pub fn effective_thickness(&self) -> u32 {
        match self.imod.reconstruction.thickness_binned {
            Some(binned) => binned * self.imod.final_alignment.final_bin,
            None => self.imod.reconstruction.thickness_unbinned,
        }
    }
}
