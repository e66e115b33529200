// src/registry/registry.rs

//! The dataset registry: sole owner of all per-dataset state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::registry::dataset::{
    AcquisitionMetadata, DatasetId, DatasetRecord, DatasetStatus,
};
use crate::stage::{Stage, StageRecord, StageStatus};

/// Persistent map from dataset identity to its state record.
///
/// All mutations happen inside the scheduler's serialized event loop; worker
/// contexts never touch this directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetRegistry {
    datasets: BTreeMap<DatasetId, DatasetRecord>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &DatasetId) -> bool {
        self.datasets.contains_key(id)
    }

    pub fn get(&self, id: &DatasetId) -> Option<&DatasetRecord> {
        self.datasets.get(id)
    }

    pub fn get_mut(&mut self, id: &DatasetId) -> Option<&mut DatasetRecord> {
        self.datasets.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Register a newly discovered dataset with a prepared stage map.
    ///
    /// Datasets are never deleted by the orchestrator; archival is an
    /// external concern.
    pub fn insert(
        &mut self,
        id: DatasetId,
        metadata: AcquisitionMetadata,
        discovered_at: DateTime<Utc>,
        mdoc_path: Option<std::path::PathBuf>,
        mdoc_hash: Option<String>,
        stages: BTreeMap<Stage, StageRecord>,
    ) {
        debug!(dataset = %id, "registering dataset");
        self.datasets.insert(
            id.clone(),
            DatasetRecord {
                id,
                metadata,
                discovered_at,
                arrived: false,
                mdoc_path,
                mdoc_hash,
                cancelled: false,
                stages,
            },
        );
    }

    /// Iterate datasets in first-discovered-first-scheduled order.
    ///
    /// Ties on the timestamp fall back to the id so the order is total.
    pub fn iter_fifo(&self) -> impl Iterator<Item = &DatasetRecord> {
        let mut records: Vec<&DatasetRecord> = self.datasets.values().collect();
        records.sort_by(|a, b| {
            a.discovered_at
                .cmp(&b.discovered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        records.into_iter()
    }

    /// Ids in FIFO order (for the scheduler's readiness sweep).
    pub fn ids_fifo(&self) -> Vec<DatasetId> {
        self.iter_fifo().map(|r| r.id.clone()).collect()
    }

    /// Normalize state after a restart: anything that was Ready or Running
    /// when the process died goes back to Pending so the scheduler
    /// re-evaluates it. Terminal stages are untouched, so completed work is
    /// never redone.
    pub fn normalize_after_restart(&mut self) {
        for record in self.datasets.values_mut() {
            for stage_record in record.stages.values_mut() {
                if matches!(
                    stage_record.status,
                    StageStatus::Ready | StageStatus::Running
                ) {
                    debug!(
                        dataset = %record.id,
                        "resetting interrupted stage to Pending for resume"
                    );
                    stage_record.status = StageStatus::Pending;
                }
            }
        }
    }

    /// Point-in-time status snapshot for operator queries.
    pub fn snapshot(&self) -> StatusReport {
        let datasets: Vec<DatasetStatusEntry> = self
            .iter_fifo()
            .map(|record| DatasetStatusEntry {
                id: record.id.clone(),
                status: record.status(),
                discovered_at: record.discovered_at,
                last_error: record.last_error().map(String::from),
                stages: record
                    .stages
                    .iter()
                    .map(|(stage, r)| StageStatusEntry {
                        stage: *stage,
                        status: r.status,
                        attempts: r.attempts,
                        last_error: r.last_error.clone(),
                    })
                    .collect(),
            })
            .collect();

        let mut aggregate = AggregateStatus::default();
        for entry in &datasets {
            match entry.status {
                DatasetStatus::Arriving => aggregate.arriving += 1,
                DatasetStatus::InProgress => aggregate.in_progress += 1,
                DatasetStatus::Succeeded => aggregate.succeeded += 1,
                DatasetStatus::Failed => aggregate.failed += 1,
                DatasetStatus::Cancelled => aggregate.cancelled += 1,
            }
        }

        StatusReport {
            datasets,
            aggregate,
        }
    }
}

/// Per-stage line of a status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStatusEntry {
    pub stage: Stage,
    pub status: StageStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Per-dataset line of a status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStatusEntry {
    pub id: DatasetId,
    pub status: DatasetStatus,
    pub discovered_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub stages: Vec<StageStatusEntry>,
}

/// Aggregate counts across all datasets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AggregateStatus {
    pub arriving: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Full status query result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusReport {
    pub datasets: Vec<DatasetStatusEntry>,
    pub aggregate: AggregateStatus,
}
