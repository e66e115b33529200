// src/registry/dataset.rs

//! Dataset identity, acquisition metadata, and per-dataset records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::{Stage, StageRecord, StageStatus};

/// Identity of one tilt-series dataset, derived from the raw-data base name
/// (the mdoc / movie-group file stem).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatasetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Acquisition metadata for one dataset.
///
/// Populated from the mdoc when `READ_MDOC = 1`, otherwise from the `[data]`
/// config section. Fields the source can't provide stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionMetadata {
    /// Pixel size in nm.
    pub pixel_size: Option<f64>,
    /// Exposure dose per tilt image (e/Å²).
    pub exposure: Option<f64>,
    /// Tilt-axis rotation angle in degrees.
    pub tilt_axis: Option<f64>,
    pub tilt_min: Option<f64>,
    pub tilt_max: Option<f64>,
    /// Nominal tilt increment in degrees.
    pub tilt_step: Option<f64>,
    /// Mean of the per-view target defocus values, in microns.
    pub defocus_avg: Option<f64>,
    /// Number of dose-fraction movie files belonging to the series.
    pub frame_count: usize,
}

/// Overall progress of a dataset through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetStatus {
    /// Discovered, still being written by the microscope.
    Arriving,
    /// At least one stage still Pending/Ready/Running.
    InProgress,
    /// Every enabled stage Succeeded (or was Skipped).
    Succeeded,
    /// Some stage terminally Failed.
    Failed,
    Cancelled,
}

/// One registered dataset with its full stage-state record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: DatasetId,
    pub metadata: AcquisitionMetadata,
    pub discovered_at: DateTime<Utc>,
    /// Set once the raw file set has settled; stages only run after this.
    pub arrived: bool,
    /// Acquisition log this dataset was discovered from, if any.
    pub mdoc_path: Option<std::path::PathBuf>,
    /// blake3 hex digest of the acquisition log, for duplicate detection.
    pub mdoc_hash: Option<String>,
    pub cancelled: bool,
    pub stages: BTreeMap<Stage, StageRecord>,
}

impl DatasetRecord {
    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.get(&stage)
    }

    pub fn stage_mut(&mut self, stage: Stage) -> Option<&mut StageRecord> {
        self.stages.get_mut(&stage)
    }

    /// Overall status derived from the per-stage records.
    pub fn status(&self) -> DatasetStatus {
        if self.cancelled {
            return DatasetStatus::Cancelled;
        }
        if !self.arrived {
            return DatasetStatus::Arriving;
        }

        let mut all_satisfied = true;
        for record in self.stages.values() {
            match record.status {
                StageStatus::Failed => return DatasetStatus::Failed,
                StageStatus::Cancelled => return DatasetStatus::Cancelled,
                StageStatus::Succeeded | StageStatus::Skipped => {}
                StageStatus::Pending | StageStatus::Ready | StageStatus::Running => {
                    all_satisfied = false;
                }
            }
        }

        if all_satisfied {
            DatasetStatus::Succeeded
        } else {
            DatasetStatus::InProgress
        }
    }

    /// Whether every stage is terminal.
    pub fn is_terminal(&self) -> bool {
        self.stages.values().all(|r| r.status.is_terminal())
    }

    /// Last recorded error across stages, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.stages
            .values()
            .filter_map(|r| r.last_error.as_deref())
            .next_back()
    }
}
