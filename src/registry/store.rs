// src/registry/store.rs

//! Durable persistence of the dataset registry.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::registry::DatasetRegistry;

/// Writes registry snapshots to a JSON file, one full snapshot per state
/// transition. The write goes to a temporary sibling first and is renamed
/// into place, so a crash mid-write never truncates the previous snapshot.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a snapshot of the registry.
    pub fn save(&self, registry: &DatasetRegistry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(registry)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), datasets = registry.len(), "state snapshot written");
        Ok(())
    }

    /// Load the last snapshot, if one exists.
    ///
    /// An unreadable snapshot is surfaced as an error rather than silently
    /// starting fresh; operators may prefer to move the file aside.
    pub fn load(&self) -> Result<Option<DatasetRegistry>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no state snapshot; starting fresh");
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)?;
        let registry: DatasetRegistry = serde_json::from_str(&contents)?;

        info!(
            path = %self.path.display(),
            datasets = registry.len(),
            "resuming from state snapshot"
        );
        Ok(Some(registry))
    }

    /// Load and prepare a registry for resume: interrupted Ready/Running
    /// stages go back to Pending; terminal stages are preserved so no
    /// Succeeded stage ever re-executes.
    pub fn load_for_resume(&self) -> Result<DatasetRegistry> {
        match self.load()? {
            Some(mut registry) => {
                registry.normalize_after_restart();
                Ok(registry)
            }
            None => Ok(DatasetRegistry::new()),
        }
    }

    /// Directory for operator cancel markers, next to the snapshot.
    pub fn cancel_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(|p| p.join("cancel"))
            .unwrap_or_else(|| PathBuf::from("cancel"))
    }

    /// Write a cancel marker for the given dataset name.
    ///
    /// The running orchestrator's poll sweep consumes these markers and
    /// turns them into cancellation events.
    pub fn request_cancel(&self, dataset: &str) -> Result<()> {
        let dir = self.cancel_dir();
        fs::create_dir_all(&dir)?;
        let marker = dir.join(dataset);
        fs::write(&marker, b"")?;
        info!(dataset, marker = %marker.display(), "cancel requested");
        Ok(())
    }

    /// Drain pending cancel markers, returning the dataset names.
    pub fn take_cancel_requests(&self) -> Vec<String> {
        let dir = self.cancel_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut names = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove cancel marker");
            }
        }
        names
    }
}
