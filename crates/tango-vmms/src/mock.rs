//! An in-memory backend for tests and local development: no containers, no
//! subprocesses, just a map of "sandboxes" and scriptable results.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use tango_core::{InputFile, TangoMachine, Vmms};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Value `run_job` returns; 0 = success, -1 = unrecoverable/timeout,
    /// anything else is treated as the workload's own exit status.
    pub run_job_result: i32,
    pub fail_initialize: bool,
    pub fail_wait: bool,
    pub fail_copy_in: bool,
    pub fail_copy_out: bool,
}

/// Tracks which instance IDs are currently "alive" so `existsVM` and
/// `getVMs` behave consistently across a test.
pub struct MockVmms {
    script: MockScript,
    next_instance: AtomicI32,
    alive: Mutex<HashMap<String, TangoMachine>>,
}

impl MockVmms {
    pub fn new(script: MockScript) -> Self {
        Self { script, next_instance: AtomicI32::new(0), alive: Mutex::new(HashMap::new()) }
    }
}

impl Default for MockVmms {
    fn default() -> Self {
        Self::new(MockScript::default())
    }
}

#[async_trait]
impl Vmms for MockVmms {
    async fn initialize_vm(&self, vm: &mut TangoMachine) -> i32 {
        if self.script.fail_initialize {
            return -1;
        }
        let n = self.next_instance.fetch_add(1, Ordering::SeqCst);
        vm.instance_id = Some(format!("mock-{n}"));
        vm.domain_name = Some("localhost".into());
        self.alive.lock().await.insert(vm.instance_id.clone().unwrap(), vm.clone());
        0
    }

    async fn wait_vm(&self, _vm: &TangoMachine, _max_secs: u64) -> i32 {
        if self.script.fail_wait { -1 } else { 0 }
    }

    async fn copy_in(&self, _vm: &TangoMachine, _files: &[InputFile], _job_id: i64) -> i32 {
        if self.script.fail_copy_in { -1 } else { 0 }
    }

    async fn run_job(&self, _vm: &TangoMachine, _timeout: u64, _max_output: u64, _disable_network: bool) -> i32 {
        self.script.run_job_result
    }

    async fn copy_out(&self, _vm: &TangoMachine, dest_file: &str) -> i32 {
        if self.script.fail_copy_out {
            return -1;
        }
        match tokio::fs::write(dest_file, b"mock output\n").await {
            Ok(()) => 0,
            Err(_) => -1,
        }
    }

    async fn destroy_vm(&self, vm: &TangoMachine) {
        if let Some(id) = &vm.instance_id {
            self.alive.lock().await.remove(id);
        }
    }

    async fn safe_destroy_vm(&self, vm: &TangoMachine) {
        self.destroy_vm(vm).await;
    }

    async fn get_vms(&self) -> Vec<TangoMachine> {
        self.alive.lock().await.values().cloned().collect()
    }

    async fn exists_vm(&self, vm: &TangoMachine) -> bool {
        match &vm.instance_id {
            Some(id) => self.alive.lock().await.contains_key(id),
            None => false,
        }
    }

    async fn get_images(&self) -> Vec<String> {
        vec!["autograder".to_string()]
    }

    async fn get_partial_output(&self, _vm: &TangoMachine) -> String {
        "mock partial output\n".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initialize_then_destroy_round_trips_alive_set() {
        let mock = MockVmms::default();
        let mut vm = TangoMachine::none_placeholder();
        vm.image = "autograder".into();
        assert_eq!(mock.initialize_vm(&mut vm).await, 0);
        assert!(mock.exists_vm(&vm).await);
        mock.destroy_vm(&vm).await;
        assert!(!mock.exists_vm(&vm).await);
    }

    #[tokio::test]
    async fn scripted_failure_propagates() {
        let mock = MockVmms::new(MockScript { fail_wait: true, ..Default::default() });
        let vm = TangoMachine::none_placeholder();
        assert_eq!(mock.wait_vm(&vm, 10).await, -1);
    }
}
