#![allow(dead_code)]

use chrono::{TimeZone, Utc};

pub use cryopipe_test_utils::{init_tracing, with_timeout};

use cryopipe::config::PipelineConfig;
use cryopipe::registry::{AcquisitionMetadata, DatasetId};
use cryopipe::sched::Scheduler;
use cryopipe::stage::{Stage, StageStatus};
use cryopipe::watch::DiscoveredDataset;
use cryopipe_test_utils::builders::PipelineConfigBuilder;

/// Config for the full-chain scenario: motion correction, CTF, fiducial
/// tracking, trimming, and denoising on; dose weighting off.
pub fn full_chain_config() -> PipelineConfig {
    PipelineConfigBuilder::new()
        .dose_fractions(true)
        .run_framewatcher(true)
        .do_ctf(true)
        .track_method(0)
        .do_dose_weighting(false)
        .do_trimvol(true)
        .do_denoising(true)
        .build()
}

/// A discovery record with deterministic timestamps: dataset `n` was
/// discovered `n` seconds into the epoch minute.
pub fn discovered(name: &str, n: u32) -> DiscoveredDataset {
    DiscoveredDataset {
        id: DatasetId::new(name),
        metadata: AcquisitionMetadata {
            pixel_size: Some(0.27),
            exposure: Some(3.0),
            tilt_axis: Some(85.3),
            ..AcquisitionMetadata::default()
        },
        mdoc_path: None,
        mdoc_hash: Some(format!("hash-{name}")),
        discovered_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, n).unwrap(),
    }
}

/// Register + arrive one dataset on a scheduler, returning what came ready.
pub fn register_and_arrive(
    scheduler: &mut Scheduler,
    name: &str,
    n: u32,
) -> Vec<(DatasetId, Stage)> {
    let d = discovered(name, n);
    scheduler.register_dataset(
        d.id.clone(),
        d.metadata,
        d.discovered_at,
        d.mdoc_path,
        d.mdoc_hash,
    );
    scheduler
        .mark_arrived(&d.id)
        .newly_ready
        .into_iter()
        .map(|r| (r.dataset, r.stage))
        .collect()
}

/// Current status of one stage.
pub fn stage_status(scheduler: &Scheduler, name: &str, stage: Stage) -> StageStatus {
    scheduler
        .registry()
        .get(&DatasetId::new(name))
        .and_then(|r| r.stage(stage))
        .map(|r| r.status)
        .expect("dataset and stage exist")
}
