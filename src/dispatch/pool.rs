// src/dispatch/pool.rs

//! CPU/GPU slot accounting.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::dispatch::ResourceNeed;
use crate::stage::ResourceClass;

/// Process-wide pool of CPU and GPU slots, bounded by the configured
/// ceilings.
///
/// Slot accounting is the only shared structure touched from worker
/// contexts; it is all semaphore permits, never direct counter mutation.
/// Permits are owned and live inside a [`SlotGuard`], so every exit path —
/// success, failure, cancellation, panic — releases them on drop.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    cpus: Arc<Semaphore>,
    gpus: Arc<Semaphore>,
    cpu_limit: usize,
    gpu_limit: usize,
}

impl ResourcePool {
    pub fn new(cpu_limit: usize, gpu_limit: usize) -> Self {
        Self {
            cpus: Arc::new(Semaphore::new(cpu_limit)),
            gpus: Arc::new(Semaphore::new(gpu_limit)),
            cpu_limit,
            gpu_limit,
        }
    }

    pub fn cpu_limit(&self) -> usize {
        self.cpu_limit
    }

    pub fn gpu_limit(&self) -> usize {
        self.gpu_limit
    }

    /// Currently free CPU slots.
    pub fn available_cpus(&self) -> usize {
        self.cpus.available_permits()
    }

    /// Currently free GPU slots.
    pub fn available_gpus(&self) -> usize {
        self.gpus.available_permits()
    }

    /// Acquire the slots described by `need`, waiting until they are free.
    ///
    /// Acquisition order is fixed (GPU before CPU) so two tasks can never
    /// hold one class each while waiting on the other.
    pub async fn acquire(&self, need: ResourceNeed) -> SlotGuard {
        let mut permits = Vec::with_capacity(2);

        match need.class {
            ResourceClass::Gpu => {
                let gpu = Arc::clone(&self.gpus)
                    .acquire_owned()
                    .await
                    .expect("GPU semaphore closed");
                permits.push(gpu);
                if need.host_cpu {
                    let cpu = Arc::clone(&self.cpus)
                        .acquire_owned()
                        .await
                        .expect("CPU semaphore closed");
                    permits.push(cpu);
                }
            }
            ResourceClass::Cpu => {
                let cpu = Arc::clone(&self.cpus)
                    .acquire_owned()
                    .await
                    .expect("CPU semaphore closed");
                permits.push(cpu);
            }
        }

        debug!(
            class = ?need.class,
            host_cpu = need.host_cpu,
            free_cpus = self.available_cpus(),
            free_gpus = self.available_gpus(),
            "slots acquired"
        );

        SlotGuard { _permits: permits }
    }
}

/// RAII guard over the permits held by one running stage task.
#[derive(Debug)]
pub struct SlotGuard {
    _permits: Vec<OwnedSemaphorePermit>,
}
