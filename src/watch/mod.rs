// src/watch/mod.rs

//! Raw-data watching and dataset discovery.
//!
//! This module is responsible for:
//! - Sweeping the raw-data tree for new tilt-series datasets (`scan.rs`).
//! - Parsing mdoc acquisition logs for per-dataset metadata (`mdoc.rs`).
//! - Wiring up a cross-platform filesystem watcher (`notify`) plus a
//!   recurring poll so discovery works even without notifications
//!   (`watcher.rs`).
//!
//! It does **not** know about stages or scheduling; it only turns
//! filesystem observations into dataset-level events.

pub mod mdoc;
pub mod scan;
pub mod watcher;

pub use mdoc::{parse_mdoc, read_mdoc, MdocInfo};
pub use scan::{DatasetScanner, DiscoveredDataset, ScanEvent};
pub use watcher::{spawn_watcher, WatcherHandle};
