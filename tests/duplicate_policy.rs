// tests/duplicate_policy.rs

//! Duplicate acquisition-log handling at the core level.

mod common;
use crate::common::{discovered, init_tracing};

use std::sync::Arc;

use cryopipe::config::DuplicatePolicy;
use cryopipe::engine::{CoreRuntime, RuntimeEvent, RuntimeOptions};
use cryopipe::registry::{DatasetId, DatasetRegistry};
use cryopipe::sched::Scheduler;
use cryopipe::watch::DiscoveredDataset;
use cryopipe_test_utils::builders::PipelineConfigBuilder;

fn rediscovery(name: &str, hash: &str, pixel_size: f64) -> DiscoveredDataset {
    let mut d = discovered(name, 0);
    d.mdoc_hash = Some(hash.to_string());
    d.metadata.pixel_size = Some(pixel_size);
    d
}

fn core_with_policy(policy: DuplicatePolicy) -> CoreRuntime {
    let cfg = Arc::new(PipelineConfigBuilder::new().duplicate_mdoc(policy).build());
    let scheduler = Scheduler::new(&cfg, DatasetRegistry::new());
    CoreRuntime::new(
        scheduler,
        cfg,
        RuntimeOptions {
            exit_when_idle: false,
        },
    )
}

#[test]
fn reject_keeps_the_registered_metadata() {
    init_tracing();

    let mut core = core_with_policy(DuplicatePolicy::Reject);
    let id = DatasetId::new("ds1");

    core.step(RuntimeEvent::DatasetDiscovered {
        dataset: rediscovery("ds1", "hash-a", 0.27),
    });
    core.step(RuntimeEvent::DatasetDiscovered {
        dataset: rediscovery("ds1", "hash-b", 0.54),
    });

    let record = core.registry().get(&id).unwrap();
    assert_eq!(record.metadata.pixel_size, Some(0.27));
    assert_eq!(record.mdoc_hash.as_deref(), Some("hash-a"));
}

#[test]
fn overwrite_replaces_the_registered_metadata() {
    init_tracing();

    let mut core = core_with_policy(DuplicatePolicy::Overwrite);
    let id = DatasetId::new("ds1");

    core.step(RuntimeEvent::DatasetDiscovered {
        dataset: rediscovery("ds1", "hash-a", 0.27),
    });
    core.step(RuntimeEvent::DatasetDiscovered {
        dataset: rediscovery("ds1", "hash-b", 0.54),
    });

    let record = core.registry().get(&id).unwrap();
    assert_eq!(record.metadata.pixel_size, Some(0.54));
    assert_eq!(record.mdoc_hash.as_deref(), Some("hash-b"));
}

#[test]
fn unchanged_log_is_not_a_duplicate() {
    init_tracing();

    let mut core = core_with_policy(DuplicatePolicy::Reject);
    let id = DatasetId::new("ds1");

    core.step(RuntimeEvent::DatasetDiscovered {
        dataset: rediscovery("ds1", "hash-a", 0.27),
    });
    let step = core.step(RuntimeEvent::DatasetDiscovered {
        dataset: rediscovery("ds1", "hash-a", 0.27),
    });

    assert!(step.commands.is_empty());
    assert!(core.registry().get(&id).is_some());
    assert_eq!(core.registry().len(), 1);
}

#[test]
fn conflict_never_stalls_other_datasets() {
    init_tracing();

    let mut core = core_with_policy(DuplicatePolicy::Reject);

    core.step(RuntimeEvent::DatasetDiscovered {
        dataset: rediscovery("ds1", "hash-a", 0.27),
    });
    core.step(RuntimeEvent::DatasetDiscovered {
        dataset: rediscovery("ds1", "hash-b", 0.54),
    });
    core.step(RuntimeEvent::DatasetDiscovered {
        dataset: rediscovery("ds2", "hash-c", 0.27),
    });

    // The second dataset registers and proceeds normally.
    let step = core.step(RuntimeEvent::DatasetArrived {
        dataset: DatasetId::new("ds2"),
    });
    assert!(
        !step.commands.is_empty(),
        "ds2 dispatches despite ds1's conflicting log"
    );
}
