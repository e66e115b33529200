// src/exec/runner.rs

//! Stage execution: runs external tools and classifies their outcomes.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::dispatch::StageTask;
use crate::engine::StageOutcome;
use crate::exec::classify::{FailureKind, OutcomeClassifier};

/// Number of diagnostic lines retained for failure classification.
const DIAG_TAIL_LINES: usize = 50;

/// Trait abstracting how a prepared stage task is executed.
///
/// Production code uses [`ProcessStageRunner`]; tests can provide scripted
/// implementations that never spawn processes.
pub trait StageRunner: Send + Sync {
    /// Execute the task to completion, honouring the cancel channel and the
    /// task's wall-clock timeout, and classify the result.
    fn run(
        &self,
        task: StageTask,
        cancel: oneshot::Receiver<()>,
    ) -> Pin<Box<dyn Future<Output = StageOutcome> + Send + '_>>;
}

/// Real stage runner: spawns the stage's external tool as a subprocess.
///
/// - stdout/stderr are drained (so OS buffers never fill) and logged at
///   debug; the tail is kept for failure classification.
/// - Exceeding the task timeout kills the tool and yields a transient
///   failure eligible for retry.
/// - A fired cancel channel kills the tool and yields `Cancelled`.
#[derive(Debug, Default)]
pub struct ProcessStageRunner {
    classifier: OutcomeClassifier,
}

impl ProcessStageRunner {
    pub fn new() -> Self {
        Self {
            classifier: OutcomeClassifier::new(),
        }
    }
}

impl StageRunner for ProcessStageRunner {
    fn run(
        &self,
        task: StageTask,
        cancel: oneshot::Receiver<()>,
    ) -> Pin<Box<dyn Future<Output = StageOutcome> + Send + '_>> {
        Box::pin(async move { run_process(&self.classifier, task, cancel).await })
    }
}

async fn run_process(
    classifier: &OutcomeClassifier,
    task: StageTask,
    mut cancel: oneshot::Receiver<()>,
) -> StageOutcome {
    let invocation = &task.invocation;

    info!(
        dataset = %task.dataset,
        stage = %task.stage,
        attempt = task.attempt,
        cmd = %invocation,
        "starting stage tool"
    );

    if let Err(e) = std::fs::create_dir_all(&invocation.workdir) {
        return StageOutcome::TransientFailure {
            reason: format!(
                "creating processing directory {}: {e}",
                invocation.workdir.display()
            ),
        };
    }

    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .current_dir(&invocation.workdir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // A missing tool will not appear by retrying.
            return StageOutcome::DeterministicFailure {
                reason: format!("tool '{}' not found", invocation.program),
            };
        }
        Err(e) => {
            return StageOutcome::TransientFailure {
                reason: format!("spawning '{}': {e}", invocation.program),
            };
        }
    };

    let diagnostics = Arc::new(Mutex::new(Vec::<String>::new()));

    if let Some(stdout) = child.stdout.take() {
        drain_stream(stdout, "stdout", &task, Arc::clone(&diagnostics));
    }
    if let Some(stderr) = child.stderr.take() {
        drain_stream(stderr, "stderr", &task, Arc::clone(&diagnostics));
    }

    // Either the tool exits (possibly past its deadline), or cancellation
    // arrives first.
    let status = tokio::select! {
        res = tokio::time::timeout(task.timeout, child.wait()) => match res {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return StageOutcome::TransientFailure {
                    reason: format!("waiting for '{}': {e}", invocation.program),
                };
            }
            Err(_elapsed) => {
                warn!(
                    dataset = %task.dataset,
                    stage = %task.stage,
                    timeout_secs = task.timeout.as_secs(),
                    "stage tool exceeded its wall-clock ceiling; killing"
                );
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed-out stage tool");
                }
                return StageOutcome::TransientFailure {
                    reason: format!(
                        "timed out after {}s",
                        task.timeout.as_secs()
                    ),
                };
            }
        },
        _ = &mut cancel => {
            info!(
                dataset = %task.dataset,
                stage = %task.stage,
                "cancellation requested; killing stage tool"
            );
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill cancelled stage tool");
            }
            return StageOutcome::Cancelled;
        }
    };

    let tail = diagnostics
        .lock()
        .map(|lines| lines.join("\n"))
        .unwrap_or_default();

    if status.success() {
        if !invocation.artifact.exists() {
            // The tool claimed success but left nothing behind; rerunning
            // the same parameters will do the same.
            return StageOutcome::DeterministicFailure {
                reason: format!(
                    "tool exited 0 but expected artifact {} is missing",
                    invocation.artifact.display()
                ),
            };
        }

        info!(
            dataset = %task.dataset,
            stage = %task.stage,
            artifact = %invocation.artifact.display(),
            "stage tool finished"
        );
        return StageOutcome::Succeeded {
            artifact: invocation.artifact.clone(),
        };
    }

    let code = status.code();
    let reason = match code {
        Some(code) => format!("'{}' exited with code {code}", invocation.program),
        None => format!("'{}' was killed by a signal", invocation.program),
    };
    let reason = if tail.is_empty() {
        reason
    } else {
        format!("{reason}: {tail}")
    };

    match classifier.classify(code, &tail) {
        FailureKind::Transient => StageOutcome::TransientFailure { reason },
        FailureKind::Deterministic => StageOutcome::DeterministicFailure { reason },
    }
}

/// Consume one output stream, logging lines at debug and keeping a bounded
/// tail for classification.
fn drain_stream(
    stream: impl AsyncRead + Unpin + Send + 'static,
    name: &'static str,
    task: &StageTask,
    diagnostics: Arc<Mutex<Vec<String>>>,
) {
    let dataset = task.dataset.clone();
    let stage = task.stage;

    tokio::spawn(async move {
        let reader = BufReader::new(stream);
        let mut lines = reader.lines();

        while let Ok(Some(line)) = lines.next_line().await {
            debug!(dataset = %dataset, stage = %stage, "{name}: {line}");
            if let Ok(mut tail) = diagnostics.lock() {
                if tail.len() >= DIAG_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
        }
    });
}
