//! The VMMS interface: owned by the core, implemented by sandbox backends.
//!
//! This resolves the circular dependency between the core and the sandbox
//! driver noted in DESIGN.md — backends (in `tango-vmms`) depend on this
//! trait, never the other way around. Dynamic dispatch on `vm.vmms` is
//! modelled as a lookup in [`VmmsRegistry`], a tagged set of backend
//! implementations keyed by name.

use crate::model::TangoMachine;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Polymorphic sandbox driver. The core treats every backend uniformly and
/// switches only on the `0` / `-1` / exit-code convention described per
/// method — never on the backend's concrete type.
#[async_trait]
pub trait Vmms: Send + Sync {
    /// Provision the sandbox described by `vm`, filling in `instance_id` /
    /// `domain_name` on success. Returns `0` on success, `-1` on failure.
    async fn initialize_vm(&self, vm: &mut TangoMachine) -> i32;

    /// Block until the sandbox is reachable (ping + SSH, or backend-specific
    /// readiness), up to `max_secs`. Returns `0` on success, `-1` on timeout.
    async fn wait_vm(&self, vm: &TangoMachine, max_secs: u64) -> i32;

    /// Copy every `(localFile, destFile)` pair into the sandbox, creating
    /// the destination directory first. Returns `0` on success, `-1` on
    /// transport failure.
    async fn copy_in(&self, vm: &TangoMachine, files: &[crate::model::InputFile], job_id: i64) -> i32;

    /// Run the user workload under resource limits, host-bounded by
    /// `2 * timeout`. Returns the driver's exit status, or `-1` on timeout.
    async fn run_job(&self, vm: &TangoMachine, timeout: u64, max_output: u64, disable_network: bool) -> i32;

    /// Deliver the sandbox's output to `dest_file` on the host, atomically
    /// (write-then-rename). Returns `0` on success, `-1` on failure.
    async fn copy_out(&self, vm: &TangoMachine, dest_file: &str) -> i32;

    /// Tear down the sandbox. Best-effort; does not report failure.
    async fn destroy_vm(&self, vm: &TangoMachine);

    /// Tear down the sandbox, retrying until `existsVM` confirms it is gone
    /// or a backend-defined deadline passes.
    async fn safe_destroy_vm(&self, vm: &TangoMachine);

    /// Enumerate sandboxes this backend currently knows about (for `reset`
    /// on restart and admin introspection).
    async fn get_vms(&self) -> Vec<TangoMachine>;

    /// Whether the sandbox still exists.
    async fn exists_vm(&self, vm: &TangoMachine) -> bool;

    /// Images available to boot a sandbox with.
    async fn get_images(&self) -> Vec<String>;

    /// Best-effort snapshot of the sandbox's output while the job is still running.
    async fn get_partial_output(&self, vm: &TangoMachine) -> String;
}

/// A tagged set of backend implementations, looked up by `vm.vmms` at
/// dispatch time.
#[derive(Clone, Default)]
pub struct VmmsRegistry {
    backends: HashMap<String, Arc<dyn Vmms>>,
}

impl VmmsRegistry {
    pub fn new() -> Self {
        Self { backends: HashMap::new() }
    }

    pub fn register(&mut self, tag: impl Into<String>, backend: Arc<dyn Vmms>) {
        self.backends.insert(tag.into(), backend);
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn Vmms>> {
        self.backends.get(tag).cloned()
    }

    pub fn tags(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopVmms;

    #[async_trait]
    impl Vmms for NoopVmms {
        async fn initialize_vm(&self, _vm: &mut TangoMachine) -> i32 { 0 }
        async fn wait_vm(&self, _vm: &TangoMachine, _max_secs: u64) -> i32 { 0 }
        async fn copy_in(&self, _vm: &TangoMachine, _files: &[crate::model::InputFile], _job_id: i64) -> i32 { 0 }
        async fn run_job(&self, _vm: &TangoMachine, _timeout: u64, _max_output: u64, _disable_network: bool) -> i32 { 0 }
        async fn copy_out(&self, _vm: &TangoMachine, _dest_file: &str) -> i32 { 0 }
        async fn destroy_vm(&self, _vm: &TangoMachine) {}
        async fn safe_destroy_vm(&self, _vm: &TangoMachine) {}
        async fn get_vms(&self) -> Vec<TangoMachine> { vec![] }
        async fn exists_vm(&self, _vm: &TangoMachine) -> bool { false }
        async fn get_images(&self) -> Vec<String> { vec![] }
        async fn get_partial_output(&self, _vm: &TangoMachine) -> String { String::new() }
    }

    #[test]
    fn registry_resolves_by_tag() {
        let mut registry = VmmsRegistry::new();
        registry.register("mock", Arc::new(NoopVmms));
        assert!(registry.get("mock").is_some());
        assert!(registry.get("missing").is_none());
    }
}
