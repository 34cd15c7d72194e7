//! `Preallocator`: maintains a free-sandbox pool per image, topped up by a
//! background creator task, per §4.3.

use crate::error::{CoreError, Result};
use crate::model::TangoMachine;
use crate::vmms::VmmsRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tango_store::{Map, Queue, Store};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub free: usize,
}

struct ImagePool {
    template: TangoMachine,
    desired: usize,
    total: Arc<dyn Map<String, TangoMachine>>,
    free: Arc<dyn Queue<TangoMachine>>,
    creator: Option<JoinHandle<()>>,
}

/// Per-image free-sandbox pools, topped up lazily by a background task
/// spawned the first time `update` raises an image's desired size above
/// zero.
pub struct Preallocator {
    store: Store,
    vmms: Arc<VmmsRegistry>,
    pools: AsyncMutex<HashMap<String, ImagePool>>,
}

impl Preallocator {
    pub fn new(store: Store, vmms: Arc<VmmsRegistry>) -> Arc<Self> {
        Arc::new(Self {
            store,
            vmms,
            pools: AsyncMutex::new(HashMap::new()),
        })
    }

    /// Set (or change) the desired pool size for an image, spawning the
    /// background creator task on first use.
    pub async fn update(self: &Arc<Self>, template: TangoMachine, desired: usize) {
        let mut pools = self.pools.lock().await;
        let image = template.image.clone();

        if let Some(pool) = pools.get_mut(&image) {
            pool.desired = desired;
            return;
        }

        let total: Arc<dyn Map<String, TangoMachine>> = self.store.map(&format!("pool:{image}:total"));
        let free: Arc<dyn Queue<TangoMachine>> = self.store.queue(&format!("pool:{image}:free"));

        let this = Arc::clone(self);
        let image_for_task = image.clone();
        let handle = tokio::spawn(async move {
            this.run_creator(image_for_task).await;
        });

        pools.insert(
            image,
            ImagePool { template, desired, total, free, creator: Some(handle) },
        );
    }

    /// Background loop: keeps an image's total pool at its desired size,
    /// growing it by creating sandboxes and shrinking it by destroying idle
    /// ones (§4.3, testable scenario 5). Exits (and is respawned by the next
    /// `update`) only on process shutdown since the pools map is never
    /// cleared while the process runs.
    async fn run_creator(self: Arc<Self>, image: String) {
        loop {
            let (template, desired, total, free) = {
                let pools = self.pools.lock().await;
                match pools.get(&image) {
                    Some(pool) => (pool.template.clone(), pool.desired, Arc::clone(&pool.total), Arc::clone(&pool.free)),
                    None => return,
                }
            };

            let total_count = total.keys().await.len();

            if total_count > desired {
                let excess = total_count - desired;
                let mut destroyed = 0;
                for _ in 0..excess {
                    match free.pop(false, None).await {
                        Some(vm) => {
                            let id = vm.instance_id.clone().unwrap_or_default();
                            total.delete(&id).await;
                            self.destroy_vm(vm).await;
                            destroyed += 1;
                        }
                        None => break,
                    }
                }
                if destroyed > 0 {
                    info!(image = %image, destroyed, "shrank pool");
                }
                if destroyed < excess {
                    // Fewer idle sandboxes than the shrink requires; the
                    // rest are destroyed as workers return them via free_vm.
                    debug!(image = %image, "shrink deferred pending in-use sandboxes");
                }
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }

            if total_count >= desired {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                continue;
            }

            match self.create_vm(&template).await {
                Ok(vm) => {
                    total.set(vm.instance_id.clone().unwrap_or_default(), vm.clone()).await;
                    free.push(vm).await;
                    info!(image = %image, "preallocated sandbox");
                }
                Err(err) => {
                    error!(image = %image, error = %err, "failed to preallocate sandbox; backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                }
            }
        }
    }

    /// Provision a single fresh sandbox from `template` via its registered
    /// backend, blocking until it reports ready.
    pub async fn create_vm(&self, template: &TangoMachine) -> Result<TangoMachine> {
        let backend = self
            .vmms
            .get(&template.vmms)
            .ok_or_else(|| CoreError::UnknownBackend(template.vmms.clone()))?;

        let mut vm = template.clone();
        if backend.initialize_vm(&mut vm).await != 0 {
            return Err(CoreError::FatalSandbox(format!("initializeVM failed for image {}", template.image)));
        }
        if backend.wait_vm(&vm, 300).await != 0 {
            backend.destroy_vm(&vm).await;
            return Err(CoreError::TransientSandbox(format!("waitVM timed out for image {}", template.image)));
        }
        Ok(vm)
    }

    /// Take one free sandbox for `image`, or `TangoMachine::none_placeholder()`
    /// if the pool is empty — the caller falls back to on-demand creation
    /// or a bring-your-own sandbox.
    pub async fn alloc_vm(&self, image: &str) -> TangoMachine {
        let free = {
            let pools = self.pools.lock().await;
            match pools.get(image) {
                Some(pool) => Arc::clone(&pool.free),
                None => return TangoMachine::none_placeholder(),
            }
        };
        free.pop(false, None).await.unwrap_or_else(TangoMachine::none_placeholder)
    }

    /// Return a sandbox to the free pool for reuse (the `REUSE_VMS` path).
    /// Per §4.3: if the sandbox still appears in the image's total pool,
    /// return it to free; otherwise the pool has since shrunk out from
    /// under it, so it is destroyed instead of resurrected.
    pub async fn free_vm(&self, vm: TangoMachine) {
        let still_pooled = {
            let pools = self.pools.lock().await;
            match pools.get(&vm.image) {
                Some(pool) => {
                    let id = vm.instance_id.clone().unwrap_or_default();
                    if pool.total.has(&id).await {
                        pool.free.push(vm.clone()).await;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };
        if !still_pooled {
            warn!(image = %vm.image, "pool shrunk or unknown; destroying reclaimed sandbox");
            self.destroy_vm(vm).await;
        }
    }

    /// Add an externally-created sandbox to an image's pool (the
    /// `/prealloc` admin bump, applied synchronously rather than waiting
    /// on the creator loop).
    pub async fn add_vm(&self, vm: TangoMachine) {
        let pools = self.pools.lock().await;
        if let Some(pool) = pools.get(&vm.image) {
            pool.total.set(vm.instance_id.clone().unwrap_or_default(), vm.clone()).await;
            pool.free.push(vm).await;
        }
    }

    /// Remove and destroy one sandbox from an image's pool (shrinking it).
    pub async fn remove_vm(&self, image: &str) -> Option<TangoMachine> {
        let pools = self.pools.lock().await;
        let pool = pools.get(image)?;
        let vm = pool.free.pop(false, None).await?;
        let id = vm.instance_id.clone().unwrap_or_default();
        pool.total.delete(&id).await;
        drop(pools);
        self.destroy_vm(vm.clone()).await;
        Some(vm)
    }

    /// Tear down a sandbox via its registered backend.
    pub async fn destroy_vm(&self, vm: TangoMachine) {
        if let Some(backend) = self.vmms.get(&vm.vmms) {
            backend.destroy_vm(&vm).await;
        }
    }

    pub async fn get_pool(&self, image: &str) -> PoolStats {
        let pools = self.pools.lock().await;
        match pools.get(image) {
            Some(pool) => PoolStats { total: pool.total.keys().await.len(), free: pool.free.size().await },
            None => PoolStats::default(),
        }
    }

    pub async fn images(&self) -> Vec<String> {
        self.pools.lock().await.keys().cloned().collect()
    }

    /// Restart semantics, §5: sandboxes from a previous run cannot be
    /// trusted, so every image's free queue is cleared and every leaked
    /// sandbox a backend still knows about is destroyed. Pools rebuild
    /// from scratch as `update` calls arrive; this process has no record
    /// of the previous run's pool-tag assignments to re-adopt against, so
    /// it always destroys rather than reclaiming.
    pub async fn reset(&self) {
        {
            let pools = self.pools.lock().await;
            for (image, pool) in pools.iter() {
                let mut cleared = 0;
                while let Some(vm) = pool.free.pop(false, None).await {
                    let id = vm.instance_id.clone().unwrap_or_default();
                    pool.total.delete(&id).await;
                    self.destroy_vm(vm).await;
                    cleared += 1;
                }
                if cleared > 0 {
                    info!(image = %image, cleared, "cleared free pool on reset");
                }
            }
        }

        for tag in self.vmms.tags() {
            let Some(backend) = self.vmms.get(&tag) else { continue };
            let leaked = backend.get_vms().await;
            if leaked.is_empty() {
                continue;
            }
            warn!(vmms = %tag, count = leaked.len(), "destroying sandboxes left over from a previous run");
            for vm in leaked {
                backend.safe_destroy_vm(&vm).await;
            }
        }
    }
}

impl Drop for Preallocator {
    fn drop(&mut self) {
        if let Ok(mut pools) = self.pools.try_lock() {
            for pool in pools.values_mut() {
                if let Some(handle) = pool.creator.take() {
                    handle.abort();
                }
            }
        }
        debug!("preallocator dropped, creator tasks aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmms::Vmms;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

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

    fn template() -> TangoMachine {
        TangoMachine {
            name: "autograder".into(),
            image: "autograder".into(),
            vmms: "mock".into(),
            cores: None,
            memory: None,
            disk: None,
            network: None,
            instance_type: None,
            instance_id: None,
            domain_name: None,
            id: 0,
            keep_for_debugging: false,
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn alloc_on_empty_pool_returns_none_placeholder() {
        let mut registry = VmmsRegistry::new();
        registry.register("mock", Arc::new(CountingVmms { counter: AtomicU32::new(0) }));
        let pre = Preallocator::new(Store::in_process(), Arc::new(registry));
        pre.update(template(), 0).await;
        let vm = pre.alloc_vm("autograder").await;
        assert!(vm.is_none());
    }

    #[tokio::test]
    async fn create_vm_uses_registered_backend() {
        let mut registry = VmmsRegistry::new();
        registry.register("mock", Arc::new(CountingVmms { counter: AtomicU32::new(0) }));
        let pre = Preallocator::new(Store::in_process(), Arc::new(registry));
        let vm = pre.create_vm(&template()).await.unwrap();
        assert_eq!(vm.instance_id.as_deref(), Some("inst-0"));
    }

    #[tokio::test]
    async fn unknown_backend_is_reported() {
        let pre = Preallocator::new(Store::in_process(), Arc::new(VmmsRegistry::new()));
        let err = pre.create_vm(&template()).await.unwrap_err();
        assert!(matches!(err, CoreError::UnknownBackend(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn update_shrinks_pool_and_destroys_excess() {
        let mut registry = VmmsRegistry::new();
        registry.register("mock", Arc::new(CountingVmms { counter: AtomicU32::new(0) }));
        let pre = Preallocator::new(Store::in_process(), Arc::new(registry));

        pre.update(template(), 2).await;
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if pre.get_pool("autograder").await.total == 2 {
                break;
            }
        }
        assert_eq!(pre.get_pool("autograder").await.total, 2);

        pre.update(template(), 1).await;
        for _ in 0..50 {
            tokio::time::advance(std::time::Duration::from_secs(2)).await;
            tokio::task::yield_now().await;
            if pre.get_pool("autograder").await.total == 1 {
                break;
            }
        }
        let stats = pre.get_pool("autograder").await;
        assert_eq!(stats.total, 1);
        assert_eq!(stats.free, 1);
    }

    struct LeakyVmms {
        leaked: Vec<TangoMachine>,
        destroyed: AsyncMutex<Vec<TangoMachine>>,
    }

    #[async_trait]
    impl Vmms for LeakyVmms {
        async fn initialize_vm(&self, _vm: &mut TangoMachine) -> i32 { 0 }
        async fn wait_vm(&self, _vm: &TangoMachine, _max_secs: u64) -> i32 { 0 }
        async fn copy_in(&self, _vm: &TangoMachine, _files: &[crate::model::InputFile], _job_id: i64) -> i32 { 0 }
        async fn run_job(&self, _vm: &TangoMachine, _timeout: u64, _max_output: u64, _disable_network: bool) -> i32 { 0 }
        async fn copy_out(&self, _vm: &TangoMachine, _dest_file: &str) -> i32 { 0 }
        async fn destroy_vm(&self, _vm: &TangoMachine) {}
        async fn safe_destroy_vm(&self, vm: &TangoMachine) {
            self.destroyed.lock().await.push(vm.clone());
        }
        async fn get_vms(&self) -> Vec<TangoMachine> { self.leaked.clone() }
        async fn exists_vm(&self, _vm: &TangoMachine) -> bool { true }
        async fn get_images(&self) -> Vec<String> { vec![] }
        async fn get_partial_output(&self, _vm: &TangoMachine) -> String { String::new() }
    }

    #[tokio::test]
    async fn reset_destroys_sandboxes_left_over_from_a_previous_run() {
        let mut leaked_vm = template();
        leaked_vm.instance_id = Some("orphan-1".into());
        let backend = Arc::new(LeakyVmms { leaked: vec![leaked_vm.clone()], destroyed: AsyncMutex::new(Vec::new()) });

        let mut registry = VmmsRegistry::new();
        registry.register("mock", Arc::clone(&backend) as Arc<dyn Vmms>);
        let pre = Preallocator::new(Store::in_process(), Arc::new(registry));

        pre.reset().await;

        let destroyed = backend.destroyed.lock().await;
        assert_eq!(destroyed.len(), 1);
        assert_eq!(destroyed[0].instance_id, leaked_vm.instance_id);
    }

    #[tokio::test]
    async fn reset_clears_a_pools_free_queue() {
        let mut registry = VmmsRegistry::new();
        registry.register("mock", Arc::new(CountingVmms { counter: AtomicU32::new(0) }));
        let pre = Preallocator::new(Store::in_process(), Arc::new(registry));

        pre.update(template(), 0).await;
        let mut vm = template();
        vm.instance_id = Some("manual-1".into());
        pre.add_vm(vm).await;
        assert_eq!(pre.get_pool("autograder").await, PoolStats { total: 1, free: 1 });

        pre.reset().await;
        assert_eq!(pre.get_pool("autograder").await, PoolStats { total: 0, free: 0 });
    }

    #[tokio::test]
    async fn add_and_alloc_roundtrip() {
        let mut registry = VmmsRegistry::new();
        registry.register("mock", Arc::new(CountingVmms { counter: AtomicU32::new(0) }));
        let pre = Preallocator::new(Store::in_process(), Arc::new(registry));
        pre.update(template(), 0).await;
        let mut vm = template();
        vm.instance_id = Some("manual-1".into());
        pre.add_vm(vm.clone()).await;
        let got = pre.alloc_vm("autograder").await;
        assert_eq!(got.instance_id, vm.instance_id);
    }
}
