//! Tango job-lifecycle engine.
//!
//! This crate holds the parts of Tango that never change with the choice
//! of sandbox technology: the state store abstraction ([`tango_store`],
//! re-exported through [`Store`]), the [`Vmms`] interface backends must
//! implement, the [`JobQueue`], the [`Preallocator`], the dispatch loop
//! ([`JobManager`]), and the per-job [`Worker`] state machine.
//!
//! Concrete sandbox drivers (Docker, SSH, cloud APIs) live in separate
//! crates that depend on this one — never the reverse.

pub mod config;
pub mod error;
pub mod manager;
pub mod model;
pub mod preallocator;
pub mod queue;
pub mod vmms;
pub mod worker;

pub use config::{ConfigFile, TangoConfig};
pub use error::{CoreError, Result};
pub use manager::JobManager;
pub use model::{InputFile, TangoJob, TangoMachine};
pub use preallocator::{PoolStats, Preallocator};
pub use queue::{JobQueue, MAX_JOB_RETRIES};
pub use vmms::{Vmms, VmmsRegistry};
pub use worker::Worker;

pub use tango_store::{Store, StoreConfig};

use std::sync::Arc;
use tokio::task::JoinHandle;

/// The fully-wired engine: a job queue, a preallocator, and a running
/// dispatcher, sharing one store and one backend registry. This is what
/// a front-end (e.g. `tango-web`) holds onto.
pub struct System {
    pub queue: Arc<JobQueue>,
    pub preallocator: Arc<Preallocator>,
    pub vmms: Arc<VmmsRegistry>,
    pub config: Arc<TangoConfig>,
    manager: JobManager,
    dispatcher_handle: JoinHandle<()>,
}

impl System {
    /// Wire up the queue, preallocator, and dispatcher, and start the
    /// dispatch loop in the background. Runs `reset` first, per §5's
    /// restart semantics: sandboxes from a previous run are cleared and
    /// leaked ones destroyed before any job is dispatched.
    pub async fn bootstrap(store: Store, vmms: VmmsRegistry, config: TangoConfig) -> Self {
        let config = Arc::new(config);
        let vmms = Arc::new(vmms);
        let queue = Arc::new(JobQueue::new(&store, 0, config.max_jobid));
        let preallocator = Preallocator::new(store, Arc::clone(&vmms));
        preallocator.reset().await;

        let (manager, dispatcher_handle) = JobManager::spawn(
            Arc::clone(&queue),
            Arc::clone(&preallocator),
            Arc::clone(&vmms),
            Arc::clone(&config),
        );

        Self { queue, preallocator, vmms, config, manager, dispatcher_handle }
    }

    /// Submit a job to the queue; returns its assigned ID (or an existing
    /// ID if this is a duplicate submission).
    pub async fn add_job(&self, job: TangoJob) -> Result<i64> {
        self.queue.add(job).await
    }

    /// Signal the dispatcher to stop and wait for it to exit. Workers
    /// already dispatched are left to finish on their own.
    pub async fn shutdown(self) {
        self.manager.shutdown();
        let _ = self.dispatcher_handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoopVmms;

    #[async_trait]
    impl Vmms for NoopVmms {
        async fn initialize_vm(&self, vm: &mut TangoMachine) -> i32 {
            vm.instance_id = Some("noop".into());
            0
        }
        async fn wait_vm(&self, _vm: &TangoMachine, _max_secs: u64) -> i32 { 0 }
        async fn copy_in(&self, _vm: &TangoMachine, _files: &[InputFile], _job_id: i64) -> i32 { 0 }
        async fn run_job(&self, _vm: &TangoMachine, _timeout: u64, _max_output: u64, _disable_network: bool) -> i32 { 0 }
        async fn copy_out(&self, _vm: &TangoMachine, _dest_file: &str) -> i32 { 0 }
        async fn destroy_vm(&self, _vm: &TangoMachine) {}
        async fn safe_destroy_vm(&self, _vm: &TangoMachine) {}
        async fn get_vms(&self) -> Vec<TangoMachine> { vec![] }
        async fn exists_vm(&self, _vm: &TangoMachine) -> bool { false }
        async fn get_images(&self) -> Vec<String> { vec![] }
        async fn get_partial_output(&self, _vm: &TangoMachine) -> String { String::new() }
    }

    #[tokio::test]
    async fn bootstrap_dispatches_a_submitted_job() {
        let mut registry = VmmsRegistry::new();
        registry.register("mock", Arc::new(NoopVmms));

        let system = System::bootstrap(Store::in_process(), registry, TangoConfig::default()).await;

        let mut vm = TangoMachine::none_placeholder();
        vm.name = "autograder".into();
        vm.image = "autograder".into();
        vm.vmms = "mock".into();
        let job = TangoJob::new("t".into(), vm, vec![], "/tmp/does-not-exist".into());

        let id = system.add_job(job).await.unwrap();

        // Give the dispatcher a moment to pick the job up and run it.
        for _ in 0..50 {
            if system.queue.get_dead(id).await.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(system.queue.get_dead(id).await.is_some());

        system.shutdown().await;
    }
}
