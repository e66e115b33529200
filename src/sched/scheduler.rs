// src/sched/scheduler.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::engine::StageOutcome;
use crate::registry::{AcquisitionMetadata, DatasetId, DatasetRegistry, StatusReport};
use crate::sched::backoff::RetryPolicy;
use crate::sched::step::{ReadyStage, RetryRequest, SchedulerStep};
use crate::stage::{Stage, StageGraph, StageRecord, StageStatus};

/// The scheduling state machine.
///
/// Owns the [`DatasetRegistry`] plus the immutable [`StageGraph`] and is
/// responsible for:
/// - registering discovered datasets (optional stages Skipped up front)
/// - deciding when a stage is ready (all deps Succeeded/Skipped)
/// - bounding retries for transient failures
/// - failing dependents when a stage fails terminally
/// - cancelling a dataset's remaining work
///
/// All methods are synchronous; the async shell drives them through the
/// runtime event loop, so every mutation is serialized.
#[derive(Debug)]
pub struct Scheduler {
    graph: StageGraph,
    registry: DatasetRegistry,
    retry: RetryPolicy,
    /// Per-stage enablement decided once from configuration.
    enabled: BTreeMap<Stage, bool>,
}

impl Scheduler {
    /// Construct a scheduler from a validated config and a (possibly
    /// resumed) registry.
    pub fn new(cfg: &PipelineConfig, registry: DatasetRegistry) -> Self {
        let graph = StageGraph::new();
        let retry = RetryPolicy::new(
            cfg.orchestrator.retry_base,
            cfg.orchestrator.retry_max,
            cfg.orchestrator.max_attempts,
        );
        let enabled = Stage::ALL
            .iter()
            .map(|s| (*s, s.enabled(cfg)))
            .collect::<BTreeMap<_, _>>();

        Self {
            graph,
            registry,
            retry,
            enabled,
        }
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn snapshot(&self) -> StatusReport {
        self.registry.snapshot()
    }

    /// Whether no stage anywhere is Pending, Ready, or Running.
    pub fn is_idle(&self) -> bool {
        self.registry.iter_fifo().all(|record| {
            record.stages.values().all(|r| r.status.is_terminal())
        })
    }

    pub fn is_registered(&self, id: &DatasetId) -> bool {
        self.registry.contains(id)
    }

    /// blake3 hex of the registered acquisition log, for duplicate checks.
    pub fn mdoc_hash(&self, id: &DatasetId) -> Option<&str> {
        self.registry.get(id).and_then(|r| r.mdoc_hash.as_deref())
    }

    /// Register a newly discovered dataset.
    ///
    /// Optional stages disabled by configuration are recorded as Skipped
    /// immediately; everything else starts Pending. Nothing dispatches until
    /// the dataset is marked fully arrived.
    pub fn register_dataset(
        &mut self,
        id: DatasetId,
        metadata: AcquisitionMetadata,
        discovered_at: DateTime<Utc>,
        mdoc_path: Option<std::path::PathBuf>,
        mdoc_hash: Option<String>,
    ) {
        if self.registry.contains(&id) {
            warn!(dataset = %id, "register called for known dataset; ignoring");
            return;
        }

        let stages: BTreeMap<Stage, StageRecord> = Stage::ALL
            .iter()
            .map(|stage| {
                let record = if self.enabled[stage] {
                    StageRecord::pending()
                } else {
                    StageRecord::skipped()
                };
                (*stage, record)
            })
            .collect();

        info!(dataset = %id, "dataset registered");
        self.registry
            .insert(id, metadata, discovered_at, mdoc_path, mdoc_hash, stages);
    }

    /// Replace a dataset's acquisition metadata (duplicate-log `overwrite`
    /// policy).
    pub fn update_metadata(
        &mut self,
        id: &DatasetId,
        metadata: AcquisitionMetadata,
        mdoc_hash: Option<String>,
    ) {
        if let Some(record) = self.registry.get_mut(id) {
            debug!(dataset = %id, "overwriting acquisition metadata");
            record.metadata = metadata;
            record.mdoc_hash = mdoc_hash;
        }
    }

    /// Mark a dataset fully arrived; its first stages may become ready.
    pub fn mark_arrived(&mut self, id: &DatasetId) -> SchedulerStep {
        match self.registry.get_mut(id) {
            Some(record) => {
                if !record.arrived {
                    info!(dataset = %id, "dataset fully arrived");
                    record.arrived = true;
                }
            }
            None => {
                warn!(dataset = %id, "arrival for unknown dataset; ignoring");
                return SchedulerStep::default();
            }
        }

        SchedulerStep {
            newly_ready: self.collect_ready(),
            ..SchedulerStep::default()
        }
    }

    /// Record that a dispatched stage acquired its slot and is now running.
    ///
    /// Returns `false` if the stage is no longer in Ready (e.g. the dataset
    /// was cancelled while the task sat in the dispatch queue).
    pub fn mark_running(&mut self, id: &DatasetId, stage: Stage) -> bool {
        let Some(record) = self.registry.get_mut(id) else {
            warn!(dataset = %id, "start report for unknown dataset; ignoring");
            return false;
        };
        let Some(stage_record) = record.stage_mut(stage) else {
            return false;
        };

        if stage_record.status != StageStatus::Ready {
            debug!(
                dataset = %id,
                stage = %stage,
                status = ?stage_record.status,
                "start report for stage not in Ready; ignoring"
            );
            return false;
        }

        stage_record.status = StageStatus::Running;
        stage_record.attempts += 1;
        debug!(
            dataset = %id,
            stage = %stage,
            attempt = stage_record.attempts,
            "stage running"
        );
        true
    }

    /// Handle the outcome of a stage execution.
    pub fn handle_completion(
        &mut self,
        id: &DatasetId,
        stage: Stage,
        outcome: StageOutcome,
    ) -> SchedulerStep {
        let Some(record) = self.registry.get_mut(id) else {
            warn!(dataset = %id, "completion for unknown dataset; ignoring");
            return SchedulerStep::default();
        };
        let Some(stage_record) = record.stage_mut(stage) else {
            return SchedulerStep::default();
        };

        if stage_record.status != StageStatus::Running {
            // Completion from a cancelled or superseded execution.
            debug!(
                dataset = %id,
                stage = %stage,
                status = ?stage_record.status,
                "completion for stage not in Running; ignoring"
            );
            return SchedulerStep::default();
        }

        let attempts = stage_record.attempts;
        let mut step = SchedulerStep::default();

        match outcome {
            StageOutcome::Succeeded { artifact } => {
                stage_record.status = StageStatus::Succeeded;
                stage_record.artifact = Some(artifact);
                stage_record.last_error = None;
                info!(dataset = %id, stage = %stage, "stage succeeded");
                step.newly_ready = self.collect_ready();
            }
            StageOutcome::TransientFailure { reason } => {
                stage_record.last_error = Some(reason.clone());
                if self.retry.may_retry(attempts) {
                    stage_record.status = StageStatus::Pending;
                    stage_record.awaiting_retry = true;
                    let delay = self.retry.delay(attempts);
                    warn!(
                        dataset = %id,
                        stage = %stage,
                        attempt = attempts,
                        delay_secs = delay.as_secs(),
                        reason = %reason,
                        "transient stage failure; retry scheduled"
                    );
                    step.retry = Some(RetryRequest {
                        dataset: id.clone(),
                        stage,
                        attempt: attempts,
                        delay,
                    });
                } else {
                    warn!(
                        dataset = %id,
                        stage = %stage,
                        attempts,
                        reason = %reason,
                        "transient stage failure with retries exhausted; failing"
                    );
                    step.newly_failed = self.fail_terminally(id, stage);
                }
            }
            StageOutcome::DeterministicFailure { reason } => {
                stage_record.last_error = Some(reason.clone());
                warn!(
                    dataset = %id,
                    stage = %stage,
                    reason = %reason,
                    "deterministic stage failure; failing without retry"
                );
                step.newly_failed = self.fail_terminally(id, stage);
            }
            StageOutcome::Cancelled => {
                stage_record.status = StageStatus::Cancelled;
                debug!(dataset = %id, stage = %stage, "stage cancelled");
            }
        }

        step.dataset_finished = self
            .registry
            .get(id)
            .map(|r| r.is_terminal())
            .unwrap_or(false);
        step
    }

    /// A retry timer fired: release the stage for the next readiness sweep.
    pub fn retry_due(&mut self, id: &DatasetId, stage: Stage) -> SchedulerStep {
        let Some(record) = self.registry.get_mut(id) else {
            return SchedulerStep::default();
        };
        let Some(stage_record) = record.stage_mut(stage) else {
            return SchedulerStep::default();
        };

        if !stage_record.awaiting_retry {
            // Cancelled or failed by propagation while the timer ran.
            debug!(
                dataset = %id,
                stage = %stage,
                "retry timer fired for stage no longer awaiting retry; ignoring"
            );
            return SchedulerStep::default();
        }
        stage_record.awaiting_retry = false;

        SchedulerStep {
            newly_ready: self.collect_ready(),
            ..SchedulerStep::default()
        }
    }

    /// Cancel all of a dataset's remaining work.
    ///
    /// Idempotent: cancelling an unknown or already-terminal dataset does
    /// nothing and returns `false`.
    pub fn cancel_dataset(&mut self, id: &DatasetId) -> bool {
        let Some(record) = self.registry.get_mut(id) else {
            warn!(dataset = %id, "cancel for unknown dataset; ignoring");
            return false;
        };

        if record.is_terminal() {
            debug!(dataset = %id, "cancel for terminal dataset; no-op");
            return false;
        }

        record.cancelled = true;
        for (stage, stage_record) in record.stages.iter_mut() {
            if !stage_record.status.is_terminal() {
                debug!(dataset = %id, stage = %stage, "stage cancelled");
                stage_record.status = StageStatus::Cancelled;
                stage_record.awaiting_retry = false;
            }
        }
        info!(dataset = %id, "dataset cancelled");
        true
    }

    /// Sweep all datasets (FIFO by discovery) for Pending stages whose
    /// dependencies are satisfied; mark them Ready and return them in
    /// dispatch order.
    pub fn collect_ready(&mut self) -> Vec<ReadyStage> {
        // Decide first, then mutate.
        let mut candidates: Vec<(DatasetId, Stage, u32)> = Vec::new();

        for record in self.registry.iter_fifo() {
            if !record.arrived || record.cancelled {
                continue;
            }
            for stage in self.graph.stages() {
                let Some(stage_record) = record.stage(stage) else {
                    continue;
                };
                if stage_record.status != StageStatus::Pending || stage_record.awaiting_retry {
                    continue;
                }
                if self.deps_satisfied(record.id.clone(), stage) {
                    candidates.push((record.id.clone(), stage, stage_record.attempts + 1));
                }
            }
        }

        let mut ready = Vec::new();
        for (id, stage, attempt) in candidates {
            if let Some(stage_record) =
                self.registry.get_mut(&id).and_then(|r| r.stage_mut(stage))
            {
                stage_record.status = StageStatus::Ready;
                info!(
                    dataset = %id,
                    stage = %stage,
                    attempt,
                    "dependencies satisfied; stage ready"
                );
                ready.push(ReadyStage {
                    dataset: id.clone(),
                    stage,
                    attempt,
                });
            }
        }

        ready
    }

    /// Whether all dependencies of `stage` are Succeeded or Skipped for the
    /// given dataset.
    fn deps_satisfied(&self, id: DatasetId, stage: Stage) -> bool {
        let Some(record) = self.registry.get(&id) else {
            return false;
        };

        self.graph.dependencies_of(stage).iter().all(|dep| {
            record
                .stage(*dep)
                .map(|r| r.status.satisfies_dependents())
                .unwrap_or(false)
        })
    }

    /// Mark `stage` terminally Failed and propagate the failure to every
    /// transitively dependent stage that has not already finished.
    fn fail_terminally(&mut self, id: &DatasetId, stage: Stage) -> Vec<(DatasetId, Stage)> {
        let mut newly_failed = Vec::new();

        if let Some(stage_record) = self.registry.get_mut(id).and_then(|r| r.stage_mut(stage)) {
            stage_record.status = StageStatus::Failed;
            stage_record.awaiting_retry = false;
            newly_failed.push((id.clone(), stage));
        }

        let propagated = format!("upstream stage '{stage}' failed");
        let mut stack: Vec<Stage> = self.graph.dependents_of(stage).to_vec();

        while let Some(next) = stack.pop() {
            let Some(stage_record) = self.registry.get_mut(id).and_then(|r| r.stage_mut(next))
            else {
                continue;
            };

            match stage_record.status {
                StageStatus::Pending | StageStatus::Ready | StageStatus::Running => {
                    stage_record.status = StageStatus::Failed;
                    stage_record.awaiting_retry = false;
                    stage_record.last_error = Some(propagated.clone());
                    debug!(
                        dataset = %id,
                        stage = %next,
                        "stage failed by upstream propagation"
                    );
                    newly_failed.push((id.clone(), next));
                    stack.extend(self.graph.dependents_of(next).iter().copied());
                }
                StageStatus::Succeeded
                | StageStatus::Failed
                | StageStatus::Skipped
                | StageStatus::Cancelled => {}
            }
        }

        newly_failed
    }
}
