// src/watch/mdoc.rs

//! Parsing of SerialEM-style mdoc acquisition logs.
//!
//! An mdoc is a sequence of `Key = Value` lines, one block per tilt image.
//! The watcher pulls out the handful of values downstream stages need:
//! pixel size, exposure dose, tilt axis and angles, per-view defocus, and
//! the dose-fraction movie files belonging to the series.

use std::path::Path;

use crate::errors::Result;
use crate::registry::AcquisitionMetadata;

/// Values recovered from one mdoc file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MdocInfo {
    /// Pixel size in nm (the mdoc records PixelSpacing in Å).
    pub pixel_size: Option<f64>,
    /// Tilt-axis rotation angle in degrees.
    pub tilt_axis: Option<f64>,
    /// Exposure dose per tilt image (e/Å²).
    pub exposure: Option<f64>,
    pub magnification: Option<f64>,
    pub tilt_angles: Vec<f64>,
    /// Per-view measured defocus, in microns.
    pub defocus: Vec<f64>,
    /// Basenames of the dose-fraction movie files.
    pub sub_frame_paths: Vec<String>,
}

impl MdocInfo {
    pub fn tilt_min(&self) -> Option<f64> {
        self.tilt_angles.iter().copied().reduce(f64::min)
    }

    pub fn tilt_max(&self) -> Option<f64> {
        self.tilt_angles.iter().copied().reduce(f64::max)
    }

    /// Nominal tilt increment: the angle range divided by the view count.
    pub fn tilt_step(&self) -> Option<f64> {
        let (min, max) = (self.tilt_min()?, self.tilt_max()?);
        let n = self.tilt_angles.len();
        if n == 0 {
            return None;
        }
        Some(round2((max - min).abs() / n as f64))
    }

    pub fn defocus_avg(&self) -> Option<f64> {
        if self.defocus.is_empty() {
            return None;
        }
        Some(round2(
            self.defocus.iter().sum::<f64>() / self.defocus.len() as f64,
        ))
    }

    /// Flatten into the registry's acquisition metadata.
    pub fn to_metadata(&self) -> AcquisitionMetadata {
        AcquisitionMetadata {
            pixel_size: self.pixel_size,
            exposure: self.exposure,
            tilt_axis: self.tilt_axis,
            tilt_min: self.tilt_min(),
            tilt_max: self.tilt_max(),
            tilt_step: self.tilt_step(),
            defocus_avg: self.defocus_avg(),
            frame_count: self.sub_frame_paths.len(),
        }
    }
}

/// Parse mdoc content.
pub fn parse_mdoc(content: &str) -> MdocInfo {
    let mut info = MdocInfo::default();

    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().trim_start_matches('[').trim();
        let value = value.trim().trim_end_matches(']').trim();

        match key {
            "TiltAngle" => {
                if let Ok(angle) = value.parse::<f64>() {
                    info.tilt_angles.push(angle);
                }
            }
            "TiltAxisAngle" => {
                info.tilt_axis = value.parse::<f64>().ok().or(info.tilt_axis);
            }
            // Measured defocus; TargetDefocus is the requested value and is
            // deliberately not collected.
            "Defocus" => {
                if let Ok(d) = value.parse::<f64>() {
                    info.defocus.push(d);
                }
            }
            "Magnification" => {
                info.magnification = value.parse::<f64>().ok().or(info.magnification);
            }
            "PixelSpacing" => {
                if let Ok(angstrom) = value.parse::<f64>() {
                    // Å rounded to 2 decimals, then converted to nm.
                    info.pixel_size = Some(round2(angstrom) / 10.0);
                }
            }
            "ExposureDose" => {
                if info.exposure.is_none() {
                    if let Ok(dose) = value.parse::<f64>() {
                        if dose > 0.0 {
                            info.exposure = Some(dose);
                        }
                    }
                }
            }
            "SubFramePath" => {
                // Windows path from the acquisition PC; keep the basename.
                let basename = value
                    .rsplit(['\\', '/'])
                    .next()
                    .unwrap_or(value)
                    .to_string();
                if !basename.is_empty() {
                    info.sub_frame_paths.push(basename);
                }
            }
            _ => {}
        }
    }

    info
}

/// Read and parse an mdoc file, returning its blake3 content hash alongside
/// the parsed values. The hash backs the duplicate-log policy.
pub fn read_mdoc(path: &Path) -> Result<(MdocInfo, String)> {
    let bytes = std::fs::read(path)?;
    let hash = blake3::hash(&bytes).to_hex().to_string();
    let content = String::from_utf8_lossy(&bytes);
    Ok((parse_mdoc(&content), hash))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
