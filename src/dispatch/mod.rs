// src/dispatch/mod.rs

//! Bounded-resource dispatch of stage executions.
//!
//! - [`pool`] owns the CPU/GPU slot semaphores.
//! - [`dispatcher`] owns the background loop that runs stage tasks under
//!   acquired slots and reports outcomes back to the runtime.

pub mod dispatcher;
pub mod pool;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::errors::Result;
use crate::exec::ToolInvocation;
use crate::registry::DatasetId;
use crate::stage::{ResourceClass, Stage};

pub use dispatcher::{spawn_dispatcher, DispatchMsg, RealDispatcherBackend};
pub use pool::{ResourcePool, SlotGuard};

/// Slots a stage task must hold while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceNeed {
    pub class: ResourceClass,
    /// GPU tasks additionally claim one CPU slot for host-side work.
    pub host_cpu: bool,
}

impl ResourceNeed {
    pub fn for_class(class: ResourceClass, gpu_host_cpu: bool) -> Self {
        Self {
            class,
            host_cpu: class == ResourceClass::Gpu && gpu_host_cpu,
        }
    }
}

/// A fully prepared stage execution: what to run, under which slots, and
/// for how long at most.
#[derive(Debug, Clone)]
pub struct StageTask {
    pub dataset: DatasetId,
    pub stage: Stage,
    /// Execution attempt this task represents (1 for the first run).
    pub attempt: u32,
    pub invocation: ToolInvocation,
    pub need: ResourceNeed,
    pub timeout: Duration,
}

/// Trait abstracting how stage tasks are dispatched.
///
/// Production code uses [`RealDispatcherBackend`]; tests can provide their
/// own implementation that completes tasks without processes or slots.
pub trait DispatcherBackend: Send {
    /// Queue the given tasks for execution under resource slots.
    fn dispatch(
        &mut self,
        tasks: Vec<StageTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Cancel every queued or running task belonging to `dataset`,
    /// releasing any held slots.
    fn cancel(
        &mut self,
        dataset: DatasetId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
