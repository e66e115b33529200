// src/watch/scan.rs

//! Directory sweeps: turning the raw-data tree into dataset events.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::errors::{PipelineError, Result};
use crate::registry::{AcquisitionMetadata, DatasetId};
use crate::watch::mdoc;

/// A dataset found in the raw-data tree, ready for registration.
#[derive(Debug, Clone)]
pub struct DiscoveredDataset {
    pub id: DatasetId,
    pub metadata: AcquisitionMetadata,
    pub mdoc_path: Option<PathBuf>,
    pub mdoc_hash: Option<String>,
    pub discovered_at: DateTime<Utc>,
}

/// One observation produced by a sweep.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Discovered(DiscoveredDataset),
    Arrived(DatasetId),
}

/// Per-dataset bookkeeping between sweeps.
#[derive(Debug)]
struct SeenDataset {
    mdoc_hash: Option<String>,
    /// Names and sizes of the files observed last sweep.
    fingerprint: BTreeMap<String, u64>,
    last_change: Instant,
    arrived_announced: bool,
    /// Movie basenames the mdoc says belong to this series.
    expected_frames: Vec<String>,
}

/// Scans the raw-data directory for tilt-series datasets.
///
/// Identity comes from the mdoc (or movie) file stem. A dataset is "fully
/// arrived" once every movie its mdoc lists is present, or — when the log
/// lists none — once its file set has been quiet for the settle window.
#[derive(Debug)]
pub struct DatasetScanner {
    raw_dir: PathBuf,
    read_mdoc: bool,
    movie_glob: GlobSet,
    mdoc_duplicate: Option<String>,
    /// Metadata used when no acquisition log is read.
    fallback: AcquisitionMetadata,
    settle: Duration,
    seen: HashMap<DatasetId, SeenDataset>,
}

impl DatasetScanner {
    pub fn new(cfg: &PipelineConfig) -> Result<Self> {
        let pattern = format!("*.{}", cfg.data.extension);
        let movie_glob = GlobSetBuilder::new()
            .add(Glob::new(&pattern).map_err(|e| {
                PipelineError::Config(format!("invalid movie pattern '{pattern}': {e}"))
            })?)
            .build()
            .map_err(|e| PipelineError::Config(format!("building movie glob: {e}")))?;

        let fallback = AcquisitionMetadata {
            pixel_size: cfg.data.pixel_size,
            exposure: cfg.data.exposure,
            tilt_axis: Some(cfg.setup.tilt_axis),
            ..AcquisitionMetadata::default()
        };

        Ok(Self {
            raw_dir: cfg.setup.raw_data_dir.clone(),
            read_mdoc: cfg.setup.read_mdoc,
            movie_glob,
            mdoc_duplicate: cfg.setup.mdoc_duplicate.clone(),
            fallback,
            settle: cfg.orchestrator.settle,
            seen: HashMap::new(),
        })
    }

    /// Walk the raw-data tree once and report discoveries and arrivals.
    ///
    /// `now` is injected so arrival (settle-window) logic is deterministic
    /// under test.
    pub fn sweep(&mut self, now: Instant) -> Vec<ScanEvent> {
        let mut events = Vec::new();

        let entries = match list_files(&self.raw_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.raw_dir.display(), error = %e, "cannot list raw-data directory");
                return events;
            }
        };
        // Dose fractions are commonly grouped into a Frames subdirectory.
        let mut frame_files = list_files(&self.raw_dir.join("Frames")).unwrap_or_default();
        let mut all_files = entries.clone();
        all_files.append(&mut frame_files);

        if self.read_mdoc {
            self.sweep_mdocs(&entries, &all_files, now, &mut events);
        } else {
            self.sweep_movie_groups(&entries, now, &mut events);
        }

        events
    }

    fn sweep_mdocs(
        &mut self,
        entries: &[(String, u64)],
        all_files: &[(String, u64)],
        now: Instant,
        events: &mut Vec<ScanEvent>,
    ) {
        for (name, _) in entries {
            if !name.ends_with(".mdoc") {
                continue;
            }
            if let Some(marker) = &self.mdoc_duplicate {
                if name.contains(marker.as_str()) {
                    debug!(file = %name, "skipping duplicate acquisition log");
                    continue;
                }
            }

            let id = DatasetId::new(dataset_name_from_mdoc(name));
            let path = self.raw_dir.join(name);

            let (info, hash) = match mdoc::read_mdoc(&path) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "unreadable acquisition log; skipping");
                    continue;
                }
            };

            let changed = match self.seen.get(&id) {
                None => true,
                Some(seen) => seen.mdoc_hash.as_deref() != Some(hash.as_str()),
            };

            if changed {
                debug!(dataset = %id, "acquisition log discovered");
                events.push(ScanEvent::Discovered(DiscoveredDataset {
                    id: id.clone(),
                    metadata: info.to_metadata(),
                    mdoc_path: Some(path.clone()),
                    mdoc_hash: Some(hash.clone()),
                    discovered_at: Utc::now(),
                }));
            }

            let entry = self.seen.entry(id.clone()).or_insert_with(|| SeenDataset {
                mdoc_hash: None,
                fingerprint: BTreeMap::new(),
                last_change: now,
                arrived_announced: false,
                expected_frames: Vec::new(),
            });
            entry.mdoc_hash = Some(hash);
            entry.expected_frames = info.sub_frame_paths.clone();

            self.check_arrival(&id, all_files, now, events);
        }
    }

    fn sweep_movie_groups(
        &mut self,
        entries: &[(String, u64)],
        now: Instant,
        events: &mut Vec<ScanEvent>,
    ) {
        for (name, _) in entries {
            if !self.movie_glob.is_match(Path::new(name)) {
                continue;
            }

            let stem = match Path::new(name).file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };
            let id = DatasetId::new(stem);

            if !self.seen.contains_key(&id) {
                debug!(dataset = %id, "movie stack discovered");
                events.push(ScanEvent::Discovered(DiscoveredDataset {
                    id: id.clone(),
                    metadata: self.fallback.clone(),
                    mdoc_path: None,
                    mdoc_hash: None,
                    discovered_at: Utc::now(),
                }));
                self.seen.insert(
                    id.clone(),
                    SeenDataset {
                        mdoc_hash: None,
                        fingerprint: BTreeMap::new(),
                        last_change: now,
                        arrived_announced: false,
                        expected_frames: Vec::new(),
                    },
                );
            }

            self.check_arrival(&id, entries, now, events);
        }
    }

    /// Update the dataset's file fingerprint and decide arrival.
    fn check_arrival(
        &mut self,
        id: &DatasetId,
        files: &[(String, u64)],
        now: Instant,
        events: &mut Vec<ScanEvent>,
    ) {
        let Some(seen) = self.seen.get_mut(id) else {
            return;
        };
        if seen.arrived_announced {
            return;
        }

        let fingerprint: BTreeMap<String, u64> = files
            .iter()
            .filter(|(name, _)| {
                name.starts_with(id.as_str())
                    || seen.expected_frames.iter().any(|f| f == name)
            })
            .cloned()
            .collect();

        if fingerprint != seen.fingerprint {
            seen.fingerprint = fingerprint;
            seen.last_change = now;
            return;
        }

        let complete = if seen.expected_frames.is_empty() {
            // No movie list to check against; fall back to quiescence.
            now.duration_since(seen.last_change) >= self.settle
        } else {
            seen.expected_frames
                .iter()
                .all(|frame| seen.fingerprint.contains_key(frame))
        };

        if complete {
            seen.arrived_announced = true;
            events.push(ScanEvent::Arrived(id.clone()));
        }
    }
}

/// File names and sizes directly under `dir`.
fn list_files(dir: &Path) -> std::io::Result<Vec<(String, u64)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            files.push((name.to_string(), meta.len()));
        }
    }
    files.sort();
    Ok(files)
}

/// `<series>.mrc.mdoc` and `<series>.mdoc` both name dataset `<series>`.
fn dataset_name_from_mdoc(file_name: &str) -> String {
    let stem = file_name.trim_end_matches(".mdoc");
    stem.trim_end_matches(".mrc").to_string()
}
