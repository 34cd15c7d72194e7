//! `JobManager`: the dispatcher loop described in §4.4.
//!
//! Structurally this keeps the shape of a background task spawned
//! alongside a thin handle, communicating shutdown over a oneshot and
//! running a `tokio::select!` loop — the same skeleton a disk-flushing
//! background task would use, just driving job dispatch instead of
//! buffered writes.

use crate::config::TangoConfig;
use crate::model::TangoMachine;
use crate::preallocator::Preallocator;
use crate::queue::JobQueue;
use crate::vmms::VmmsRegistry;
use crate::worker::Worker;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Handle to the running dispatcher. Dropping this does not stop the
/// loop; call [`JobManager::shutdown`] for a graceful stop.
pub struct JobManager {
    shutdown_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

impl JobManager {
    /// Spawn the dispatcher loop, returning a handle and its `JoinHandle`.
    pub fn spawn(
        queue: Arc<JobQueue>,
        preallocator: Arc<Preallocator>,
        vmms: Arc<VmmsRegistry>,
        config: Arc<TangoConfig>,
    ) -> (Self, JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let next_byo_id = Arc::new(AtomicU32::new(10000));

        let handle = tokio::spawn(run_dispatcher(
            queue,
            preallocator,
            vmms,
            config,
            semaphore,
            next_byo_id,
            shutdown_rx,
        ));

        (Self { shutdown_tx: std::sync::Mutex::new(Some(shutdown_tx)) }, handle)
    }

    /// Signal the dispatcher to stop accepting new jobs. In-flight workers
    /// are not interrupted; await the `JoinHandle` to know the loop exited.
    pub fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().expect("shutdown mutex poisoned").take() {
            let _ = tx.send(());
        }
    }
}

async fn run_dispatcher(
    queue: Arc<JobQueue>,
    preallocator: Arc<Preallocator>,
    vmms: Arc<VmmsRegistry>,
    config: Arc<TangoConfig>,
    semaphore: Arc<Semaphore>,
    next_byo_id: Arc<AtomicU32>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    info!("dispatcher started");
    'dispatch: loop {
        let job = tokio::select! {
            _ = &mut shutdown_rx => {
                info!("dispatcher shutdown signal received");
                break;
            }
            job = queue.get_next_pending_job(true, Some(config.dispatch_period)) => job,
        };

        let Some(mut job) = job else {
            // Timed out waiting for a new job; nothing unassigned to act
            // on right now.
            continue;
        };

        let vm = if !job.is_bring_your_own() && config.reuse_vms {
            // §4.4 step 2: poll `reuseVM` with a `DISPATCH_PERIOD` back-off
            // until a sandbox is obtained. This is deliberate back-pressure
            // — the pending job idles here, in the dispatcher, rather than
            // being failed or handed to a worker with nothing to run on.
            loop {
                if let Some(vm) = queue.reuse_vm(&job, &preallocator).await {
                    break vm;
                }
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!(job_id = job.id, "dispatcher shutdown signal received while awaiting reusable sandbox");
                        break 'dispatch;
                    }
                    _ = tokio::time::sleep(config.dispatch_period) => {}
                }
            }
        } else {
            match acquire_sandbox(&queue, &preallocator, &vmms, &config, &next_byo_id, &job).await {
                Ok(vm) => vm,
                Err(reason) => {
                    warn!(job_id = job.id, %reason, "could not acquire a sandbox for job");
                    if let Err(err) = queue.make_dead(job.id, &reason).await {
                        error!(job_id = job.id, error = %err, "failed to mark job dead");
                    }
                    continue;
                }
            }
        };

        job.vm = vm.clone();
        if let Err(err) = queue.assign_job(job.id, vm.clone()).await {
            error!(job_id = job.id, error = %err, "failed to record sandbox assignment");
            continue;
        }

        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let worker = Worker::new(
            Arc::clone(&queue),
            Arc::clone(&preallocator),
            Arc::clone(&vmms),
            Arc::clone(&config),
        );
        tokio::spawn(async move {
            let _permit = permit;
            worker.run(job).await;
        });
    }
    info!("dispatcher stopped");
}

/// Resolve a sandbox for `job`: bring-your-own credentials bypass the
/// preallocator entirely and mint a job-scoped 5-digit ID; otherwise pull
/// from the image's free pool, falling back to on-demand creation.
async fn acquire_sandbox(
    queue: &JobQueue,
    preallocator: &Preallocator,
    vmms: &VmmsRegistry,
    config: &TangoConfig,
    next_byo_id: &AtomicU32,
    job: &crate::model::TangoJob,
) -> Result<TangoMachine, String> {
    if job.is_bring_your_own() {
        let mut vm = job.vm.clone();
        vm.id = next_job_scoped_id(queue, next_byo_id).await;
        let backend = vmms.get(&vm.vmms).ok_or_else(|| format!("unknown vmms backend {}", vm.vmms))?;
        if backend.initialize_vm(&mut vm).await != 0 {
            return Err("bring-your-own sandbox failed to initialize".into());
        }
        return Ok(vm);
    }

    let pooled = preallocator.alloc_vm(&job.vm.image).await;
    if !pooled.is_none() {
        return Ok(pooled);
    }

    if config.reuse_vms {
        // Pool exhausted and reuse is in effect; poll again on the next
        // dispatch tick rather than growing the pool unbounded.
        return Err("sandbox pool exhausted".into());
    }

    preallocator
        .create_vm(&job.vm)
        .await
        .map_err(|err| err.to_string())
}

/// Mint a 5-digit ID in `[10000, 99999]` for a job-scoped sandbox,
/// wrapping around and skipping any value currently in use.
async fn next_job_scoped_id(queue: &JobQueue, counter: &AtomicU32) -> u32 {
    let in_use: std::collections::HashSet<u32> =
        queue.live_jobs().await.into_iter().map(|j| j.vm.id).collect();

    for _ in 0..90_000 {
        let id = counter.fetch_add(1, Ordering::SeqCst);
        let id = 10000 + (id % 90_000);
        if !in_use.contains(&id) {
            return id;
        }
    }

    // Every value in range is in use; fall back to a random probe.
    rand::rng().random_range(10000..=99999)
}
