//! `JobQueue`: the live/dead job maps, the unassigned FIFO, and the
//! job-ID counter, built on the [`tango_store`] primitives.

use crate::error::{CoreError, Result};
use crate::model::{TangoJob, TangoMachine};
use crate::preallocator::Preallocator;
use std::collections::HashMap;
use std::sync::Arc;
use tango_store::{Counter, Map, Queue, Store};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

pub const MAX_JOB_RETRIES: u32 = 3;

/// Tracks every job from submission to its terminal state. A job is always
/// in exactly one of `live` or `dead`, never both (§3 invariant).
pub struct JobQueue {
    live: Arc<dyn Map<i64, TangoJob>>,
    dead: Arc<dyn Map<i64, TangoJob>>,
    unassigned: Arc<dyn Queue<i64>>,
    next_id: Arc<dyn Counter>,
    max_id: i64,
    /// Per-id locks guarding a mutator's read-modify-write span against a
    /// concurrent mutator on the same job (e.g. a worker's `make_dead`
    /// racing an admin cancellation). Bounded by `max_id` entries, never
    /// reclaimed, since the ID space itself is bounded.
    locks: AsyncMutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl JobQueue {
    /// `start_id` is the counter's initial value (so IDs begin at
    /// `start_id + 1`); `max_id` bounds the ID space per `MAX_JOBID`.
    pub fn new(store: &Store, start_id: i64, max_id: i64) -> Self {
        Self {
            live: store.map("jobs:live"),
            dead: store.map("jobs:dead"),
            unassigned: store.queue("jobs:unassigned"),
            next_id: store.counter("jobs:next_id", start_id),
            max_id,
            locks: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Acquire the per-id lock for `id`'s duration, spanning a mutator's
    /// entire read-modify-write against `live`/`dead`.
    async fn lock_job(&self, id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(id).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
        };
        lock.lock_owned().await
    }

    /// Add a new job, returning its assigned ID. If an equivalent job
    /// (same name, input files, output file, and machine spec) is already
    /// live, its existing ID is returned instead and no new job is created
    /// — this is the duplicate-suppression behavior from §7.
    pub async fn add(&self, mut job: TangoJob) -> Result<i64> {
        let dedup_key = job.dedup_key();
        for existing in self.live.values().await {
            if existing.dedup_key() == dedup_key {
                debug!(job_id = existing.id, "suppressing duplicate addJob");
                return Ok(existing.id);
            }
        }

        let id = self.next_free_id().await?;

        job.id = id;
        job.assigned = false;
        job.append_trace("Added to queue");
        self.live.set(id, job).await;
        self.unassigned.push(id).await;
        info!(job_id = id, "job added");
        Ok(id)
    }

    /// Probe for a free ID starting just after `nextID`, wrapping modulo
    /// `max_id`, per §4.2: "starting at nextID, probing successive IDs
    /// modulo MAX_JOBID until one is free in both live and dead." An ID
    /// freed by `make_dead` followed by `del_job` becomes eligible again;
    /// this only fails once a full lap finds nothing free.
    async fn next_free_id(&self) -> Result<i64> {
        let start = self.next_id.get().await;
        let mut id = start;
        for _ in 0..self.max_id {
            id = if id >= self.max_id { 1 } else { id + 1 };
            if !self.live.has(&id).await && !self.dead.has(&id).await {
                self.next_id.set(id).await;
                return Ok(id);
            }
        }
        Err(CoreError::IdExhausted)
    }

    /// Pool-aware reuse fast path, §4.2: if the free pool for `job.vm.image`
    /// is non-empty and the pool's total size is at least the number of
    /// currently-live jobs requesting that image, pop a free sandbox and
    /// return it; otherwise return `None` so the dispatcher keeps polling.
    /// The total-vs-live check keeps reuse from oversubscribing a pool that
    /// has shrunk out from under a burst of incoming jobs.
    pub async fn reuse_vm(&self, job: &TangoJob, preallocator: &Preallocator) -> Option<TangoMachine> {
        let stats = preallocator.get_pool(&job.vm.image).await;
        if stats.free == 0 {
            return None;
        }

        let requesting = self
            .live
            .values()
            .await
            .into_iter()
            .filter(|j| j.vm.image == job.vm.image)
            .count();
        if stats.total < requesting {
            return None;
        }

        let vm = preallocator.alloc_vm(&job.vm.image).await;
        if vm.is_none() {
            None
        } else {
            Some(vm)
        }
    }

    /// Re-queue an already-known ID onto the unassigned FIFO without
    /// touching the live map (used when a worker gives up a sandbox but
    /// the job itself should be retried).
    pub async fn add_to_unassigned(&self, id: i64) {
        self.unassigned.push(id).await;
    }

    /// Persist a caller-mutated live job record as-is. `Worker` uses this to
    /// write back the per-stage trace lines it accumulates on its own copy
    /// of the job before a terminal `make_dead`/`unassign_job` call, which
    /// would otherwise re-fetch a stale copy from `live` and discard them.
    pub async fn update(&self, job: TangoJob) {
        self.live.set(job.id, job).await;
    }

    /// Insert a job straight into the dead map — used for bring-your-own
    /// jobs that fail before ever being assigned a sandbox.
    pub async fn add_dead_job(&self, mut job: TangoJob) {
        job.append_trace("Dead on arrival");
        self.dead.set(job.id, job).await;
    }

    /// Remove a job from the live map entirely (used by `/poll` once the
    /// caller has retrieved a completed result from `dead`, mirroring the
    /// original's explicit two-step retrieve-then-forget).
    pub async fn remove(&self, id: i64) -> bool {
        self.live.delete(&id).await
    }

    /// Remove a job from the dead map.
    pub async fn del_job(&self, id: i64) -> bool {
        self.dead.delete(&id).await
    }

    /// Block (optionally with a timeout) for the next unassigned job and
    /// return its current live record, skipping over any ID that no
    /// longer has a live job (it may have been cancelled in the interim).
    pub async fn get_next_pending_job(&self, blocking: bool, timeout: Option<std::time::Duration>) -> Option<TangoJob> {
        loop {
            let id = self.unassigned.pop(blocking, timeout).await?;
            if let Some(job) = self.live.get(&id).await {
                return Some(job);
            }
            warn!(job_id = id, "popped unassigned id with no live job; skipping");
            if !blocking {
                return None;
            }
        }
    }

    /// Mark a job as assigned to a sandbox and persist the updated `vm`.
    pub async fn assign_job(&self, id: i64, vm: crate::model::TangoMachine) -> Result<()> {
        let _guard = self.lock_job(id).await;
        let mut job = self.live.get_or_fail(&id).await?;
        job.vm = vm;
        job.assigned = true;
        job.append_trace("Assigned sandbox");
        self.live.set(id, job).await;
        Ok(())
    }

    /// Release a job back to the unassigned state after a retryable
    /// failure. Retries past `MAX_JOB_RETRIES` make the job dead instead.
    pub async fn unassign_job(&self, id: i64, reason: &str) -> Result<()> {
        let _guard = self.lock_job(id).await;
        let mut job = self.live.get_or_fail(&id).await?;
        job.retries += 1;
        job.assigned = false;
        job.append_trace(format!("Unassigned: {reason}"));

        if job.retries >= MAX_JOB_RETRIES {
            self.live.set(id, job.clone()).await;
            // Already holding `id`'s lock; call the inner form directly so
            // `make_dead` doesn't deadlock trying to re-acquire it.
            self.make_dead_locked(id, "exceeded max retries").await?;
            return Ok(());
        }

        self.live.set(id, job).await;
        self.unassigned.push(id).await;
        Ok(())
    }

    /// Move a job from `live` to `dead`, appending a final trace line.
    /// The empty `vm.none_placeholder()` case (no sandbox ever assigned
    /// and no bring-your-own credentials) routes here too, per the
    /// resolved open question in the design notes.
    pub async fn make_dead(&self, id: i64, reason: &str) -> Result<()> {
        let _guard = self.lock_job(id).await;
        self.make_dead_locked(id, reason).await
    }

    /// `make_dead`'s body, assuming the caller already holds `id`'s lock.
    async fn make_dead_locked(&self, id: i64, reason: &str) -> Result<()> {
        let mut job = self.live.get_or_fail(&id).await?;
        job.append_trace(format!("Dead: {reason}"));
        self.dead.set(id, job).await;
        self.live.delete(&id).await;
        info!(job_id = id, reason, "job made dead");
        Ok(())
    }

    pub async fn get_live(&self, id: i64) -> Option<TangoJob> {
        self.live.get(&id).await
    }

    pub async fn get_dead(&self, id: i64) -> Option<TangoJob> {
        self.dead.get(&id).await
    }

    pub async fn live_jobs(&self) -> Vec<TangoJob> {
        self.live.values().await
    }

    pub async fn dead_jobs(&self) -> Vec<TangoJob> {
        self.dead.values().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmms::{Vmms, VmmsRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn store() -> Store {
        Store::in_process()
    }

    fn job(name: &str) -> TangoJob {
        TangoJob::new(name.into(), TangoMachine::none_placeholder(), vec![], "out".into())
    }

    struct CountingVmms {
        counter: AtomicU32,
    }

    #[async_trait]
    impl Vmms for CountingVmms {
        async fn initialize_vm(&self, vm: &mut TangoMachine) -> i32 {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            vm.instance_id = Some(format!("inst-{n}"));
            0
        }
        async fn wait_vm(&self, _vm: &TangoMachine, _max_secs: u64) -> i32 { 0 }
        async fn copy_in(&self, _vm: &TangoMachine, _files: &[crate::model::InputFile], _job_id: i64) -> i32 { 0 }
        async fn run_job(&self, _vm: &TangoMachine, _timeout: u64, _max_output: u64, _disable_network: bool) -> i32 { 0 }
        async fn copy_out(&self, _vm: &TangoMachine, _dest_file: &str) -> i32 { 0 }
        async fn destroy_vm(&self, _vm: &TangoMachine) {}
        async fn safe_destroy_vm(&self, _vm: &TangoMachine) {}
        async fn get_vms(&self) -> Vec<TangoMachine> { vec![] }
        async fn exists_vm(&self, _vm: &TangoMachine) -> bool { true }
        async fn get_images(&self) -> Vec<String> { vec![] }
        async fn get_partial_output(&self, _vm: &TangoMachine) -> String { String::new() }
    }

    fn pooled_job(name: &str, image: &str) -> TangoJob {
        let mut vm = TangoMachine::none_placeholder();
        vm.name = image.into();
        vm.image = image.into();
        vm.vmms = "mock".into();
        TangoJob::new(name.into(), vm, vec![], "out".into())
    }

    #[tokio::test]
    async fn add_assigns_sequential_ids() {
        let queue = JobQueue::new(&store(), 0, 100);
        let a = queue.add(job("a")).await.unwrap();
        let b = queue.add(job("b")).await.unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[tokio::test]
    async fn duplicate_add_returns_existing_id() {
        let queue = JobQueue::new(&store(), 0, 100);
        let first = queue.add(job("dup")).await.unwrap();
        let second = queue.add(job("dup")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(queue.live_jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn get_next_pending_job_returns_in_fifo_order() {
        let queue = JobQueue::new(&store(), 0, 100);
        queue.add(job("a")).await.unwrap();
        queue.add(job("b")).await.unwrap();
        let first = queue.get_next_pending_job(true, None).await.unwrap();
        assert_eq!(first.name, "a");
    }

    #[tokio::test]
    async fn unassign_retries_then_dies() {
        let queue = JobQueue::new(&store(), 0, 100);
        let id = queue.add(job("flaky")).await.unwrap();
        queue.get_next_pending_job(true, None).await.unwrap();

        for _ in 0..MAX_JOB_RETRIES - 1 {
            queue.unassign_job(id, "transient").await.unwrap();
            assert!(queue.get_live(id).await.is_some());
            queue.get_next_pending_job(true, None).await.unwrap();
        }

        queue.unassign_job(id, "transient").await.unwrap();
        assert!(queue.get_live(id).await.is_none());
        assert!(queue.get_dead(id).await.is_some());
    }

    #[tokio::test]
    async fn make_dead_moves_job_between_maps() {
        let queue = JobQueue::new(&store(), 0, 100);
        let id = queue.add(job("a")).await.unwrap();
        queue.make_dead(id, "fatal sandbox error").await.unwrap();
        assert!(queue.get_live(id).await.is_none());
        assert!(queue.get_dead(id).await.is_some());
    }

    #[tokio::test]
    async fn id_exhaustion_is_reported() {
        // Literal boundary scenario from §8: with MAX_JOBID=3 and three
        // live jobs, a fourth add fails.
        let queue = JobQueue::new(&store(), 0, 3);
        queue.add(job("a")).await.unwrap();
        queue.add(job("b")).await.unwrap();
        queue.add(job("c")).await.unwrap();
        let err = queue.add(job("d")).await.unwrap_err();
        assert!(matches!(err, CoreError::IdExhausted));
    }

    #[tokio::test]
    async fn ids_freed_by_del_job_are_reused_after_wraparound() {
        let queue = JobQueue::new(&store(), 0, 2);
        let a = queue.add(job("a")).await.unwrap();
        let _b = queue.add(job("b")).await.unwrap();
        assert!(queue.add(job("c")).await.is_err());

        queue.make_dead(a, "done").await.unwrap();
        queue.del_job(a).await;

        let c = queue.add(job("c")).await.unwrap();
        assert_eq!(c, a);
    }

    #[tokio::test]
    async fn reuse_vm_pops_a_free_sandbox_when_pool_covers_demand() {
        let mut registry = VmmsRegistry::new();
        registry.register("mock", Arc::new(CountingVmms { counter: AtomicU32::new(0) }));
        let pre = Preallocator::new(Store::in_process(), Arc::new(registry));

        let queue = JobQueue::new(&store(), 0, 100);
        let job = pooled_job("a", "autograder");
        let id = queue.add(job.clone()).await.unwrap();
        let mut live = queue.get_live(id).await.unwrap();
        live.vm = job.vm.clone();

        let mut vm = job.vm.clone();
        vm.instance_id = Some("inst-0".into());
        pre.update(job.vm.clone(), 1).await;
        pre.add_vm(vm.clone()).await;

        let got = queue.reuse_vm(&live, &pre).await;
        assert_eq!(got.unwrap().instance_id, vm.instance_id);
    }

    #[tokio::test]
    async fn lock_job_serializes_concurrent_holders_of_the_same_id() {
        let queue = Arc::new(JobQueue::new(&store(), 0, 100));
        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let queue = Arc::clone(&queue);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = queue.lock_job(1).await;
                let before = counter.load(Ordering::SeqCst);
                tokio::task::yield_now().await;
                counter.store(before + 1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn reuse_vm_returns_none_when_pool_is_empty() {
        let registry = VmmsRegistry::new();
        let pre = Preallocator::new(Store::in_process(), Arc::new(registry));
        let queue = JobQueue::new(&store(), 0, 100);
        let job = pooled_job("a", "autograder");
        queue.add(job.clone()).await.unwrap();
        pre.update(job.vm.clone(), 0).await;

        assert!(queue.reuse_vm(&job, &pre).await.is_none());
    }
}
