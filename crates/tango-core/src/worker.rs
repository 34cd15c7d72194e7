//! `Worker`: drives a single job through its state machine, per §4.5.
//!
//! ```text
//! CREATED -> WAITING -> COPYING_IN -> RUNNING -> COPYING_OUT -> NOTIFY -> DISPOSE
//!               |            |                       |
//!               `-- retry <--'                       `-- (never retried past here)
//! ```

use crate::config::TangoConfig;
use crate::model::TangoJob;
use crate::preallocator::Preallocator;
use crate::queue::JobQueue;
use crate::vmms::{Vmms, VmmsRegistry};
use std::sync::Arc;
use tracing::{info, warn};

const TRUNCATION_MARKER: &str = "\n[truncated]\n";

pub struct Worker {
    queue: Arc<JobQueue>,
    preallocator: Arc<Preallocator>,
    vmms: Arc<VmmsRegistry>,
    config: Arc<TangoConfig>,
}

enum Outcome {
    /// Completed, successfully or not; job moves to `dead` and its
    /// sandbox is disposed of.
    Done { exit_status: i32 },
    /// A transient failure in WAITING/COPYING_IN; the job is unassigned
    /// and re-queued (or made dead if retries are exhausted).
    Retry { reason: String },
}

impl Worker {
    pub fn new(
        queue: Arc<JobQueue>,
        preallocator: Arc<Preallocator>,
        vmms: Arc<VmmsRegistry>,
        config: Arc<TangoConfig>,
    ) -> Self {
        Self { queue, preallocator, vmms, config }
    }

    pub async fn run(&self, mut job: TangoJob) {
        let job_id = job.id;
        let Some(backend) = self.vmms.get(&job.vm.vmms) else {
            warn!(job_id, backend = %job.vm.vmms, "no registered vmms backend; job is dead");
            let _ = self.queue.make_dead(job_id, "unknown vmms backend").await;
            return;
        };

        match self.drive(&*backend, &mut job).await {
            Outcome::Done { exit_status } => {
                job.append_trace(format!("Completed with exit status {exit_status}"));
                self.queue.update(job.clone()).await;
                let _ = self.queue.make_dead(job_id, "completed").await;
                self.notify(&job, exit_status).await;
                self.dispose(&*backend, &job).await;
            }
            Outcome::Retry { reason } => {
                info!(job_id, %reason, "worker releasing sandbox for retry");
                backend.destroy_vm(&job.vm).await;
                self.queue.update(job.clone()).await;
                if let Err(err) = self.queue.unassign_job(job_id, &reason).await {
                    warn!(job_id, error = %err, "failed to unassign job after retryable failure");
                }
            }
        }
    }

    async fn drive(&self, backend: &dyn Vmms, job: &mut TangoJob) -> Outcome {
        job.append_trace("WAITING");
        if backend.wait_vm(&job.vm, self.config.waitvm_timeout.as_secs()).await != 0 {
            return Outcome::Retry { reason: "waitVM failed".into() };
        }

        job.append_trace("COPYING_IN");
        if backend.copy_in(&job.vm, &job.input_files, job.id).await != 0 {
            return Outcome::Retry { reason: "copyIn failed".into() };
        }

        job.append_trace("RUNNING");
        let exit_status = backend
            .run_job(&job.vm, job.timeout, job.max_output_file_size, job.disable_network)
            .await;
        // A non-zero/−1 result here is a completed, non-retryable outcome
        // (the workload ran and either failed or timed out) — §4.5,
        // "RUNNING failures are never retried."
        if exit_status < 0 {
            job.append_trace("RUNNING timed out");
        }

        job.append_trace("COPYING_OUT");
        if backend.copy_out(&job.vm, &job.output_file).await != 0 {
            job.append_trace("copyOut failed; output may be incomplete");
        }
        self.truncate_output_if_needed(job).await;

        Outcome::Done { exit_status }
    }

    async fn truncate_output_if_needed(&self, job: &TangoJob) {
        if job.max_output_file_size == 0 {
            return;
        }
        let Ok(metadata) = tokio::fs::metadata(&job.output_file).await else {
            return;
        };
        if metadata.len() <= job.max_output_file_size {
            return;
        }
        if let Ok(mut contents) = tokio::fs::read(&job.output_file).await {
            contents.truncate(job.max_output_file_size as usize);
            contents.extend_from_slice(TRUNCATION_MARKER.as_bytes());
            if let Err(err) = tokio::fs::write(&job.output_file, contents).await {
                warn!(job_id = job.id, error = %err, "failed to truncate oversize output");
            }
        }
    }

    async fn notify(&self, job: &TangoJob, exit_status: i32) {
        let Some(url) = &job.notify_url else { return };
        let client = reqwest::Client::new();
        let payload = serde_json::json!({
            "jobId": job.id,
            "name": job.name,
            "exitStatus": exit_status,
        });
        if let Err(err) = client.post(url).json(&payload).send().await {
            warn!(job_id = job.id, error = %err, "NOTIFY callback failed; job result is unaffected");
        }
    }

    async fn dispose(&self, backend: &dyn Vmms, job: &TangoJob) {
        if job.vm.keep_for_debugging {
            info!(job_id = job.id, "keeping sandbox for debugging");
            return;
        }
        if job.is_bring_your_own() {
            backend.safe_destroy_vm(&job.vm).await;
            return;
        }
        self.preallocator.free_vm(job.vm.clone()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InputFile, TangoMachine};
    use async_trait::async_trait;
    use tango_store::Store;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct ScriptedVmms {
        run_job_result: i32,
        destroyed: Mutex<bool>,
    }

    #[async_trait]
    impl Vmms for ScriptedVmms {
        async fn initialize_vm(&self, _vm: &mut TangoMachine) -> i32 { 0 }
        async fn wait_vm(&self, _vm: &TangoMachine, _max_secs: u64) -> i32 { 0 }
        async fn copy_in(&self, _vm: &TangoMachine, _files: &[InputFile], _job_id: i64) -> i32 { 0 }
        async fn run_job(&self, _vm: &TangoMachine, _timeout: u64, _max_output: u64, _disable_network: bool) -> i32 {
            self.run_job_result
        }
        async fn copy_out(&self, _vm: &TangoMachine, _dest_file: &str) -> i32 { 0 }
        async fn destroy_vm(&self, _vm: &TangoMachine) {
            *self.destroyed.lock().await = true;
        }
        async fn safe_destroy_vm(&self, vm: &TangoMachine) { self.destroy_vm(vm).await; }
        async fn get_vms(&self) -> Vec<TangoMachine> { vec![] }
        async fn exists_vm(&self, _vm: &TangoMachine) -> bool { false }
        async fn get_images(&self) -> Vec<String> { vec![] }
        async fn get_partial_output(&self, _vm: &TangoMachine) -> String { String::new() }
    }

    fn harness(run_job_result: i32) -> (Worker, TangoJob) {
        let store = Store::in_process();
        let queue = Arc::new(JobQueue::new(&store, 0, 100));
        let preallocator = Preallocator::new(Store::in_process(), Arc::new(VmmsRegistry::new()));
        let mut registry = VmmsRegistry::new();
        registry.register("mock", Arc::new(ScriptedVmms { run_job_result, ..Default::default() }));
        let config = Arc::new(TangoConfig::default());

        let mut vm = TangoMachine::none_placeholder();
        vm.name = "autograder".into();
        vm.image = "autograder".into();
        vm.vmms = "mock".into();

        let job = TangoJob::new("t".into(), vm, vec![], "/tmp/does-not-exist".into());
        let worker = Worker::new(queue, preallocator, Arc::new(registry), config);
        (worker, job)
    }

    #[tokio::test]
    async fn successful_run_marks_job_dead() {
        let (worker, job) = harness(0);
        let queue = Arc::clone(&worker.queue);
        let id = queue.add(job.clone()).await.unwrap();
        let mut job = job;
        job.id = id;
        worker.run(job).await;
        assert!(queue.get_dead(id).await.is_some());
        assert!(queue.get_live(id).await.is_none());
    }

    #[tokio::test]
    async fn successful_run_persists_full_per_stage_trace() {
        let (worker, job) = harness(0);
        let queue = Arc::clone(&worker.queue);
        let id = queue.add(job.clone()).await.unwrap();
        let mut job = job;
        job.id = id;
        worker.run(job).await;
        let dead = queue.get_dead(id).await.unwrap();
        for expected in ["Added to queue", "WAITING", "COPYING_IN", "RUNNING", "COPYING_OUT", "Completed with exit status 0", "Dead: completed"] {
            assert!(
                dead.trace.iter().any(|line| line.contains(expected)),
                "missing trace line {expected:?}, got {:?}",
                dead.trace
            );
        }
    }

    #[tokio::test]
    async fn timed_out_run_is_not_retried() {
        let (worker, job) = harness(-1);
        let queue = Arc::clone(&worker.queue);
        let id = queue.add(job.clone()).await.unwrap();
        let mut job = job;
        job.id = id;
        worker.run(job).await;
        let dead = queue.get_dead(id).await.unwrap();
        assert!(dead.trace.iter().any(|line| line.contains("RUNNING timed out")));
    }
}
