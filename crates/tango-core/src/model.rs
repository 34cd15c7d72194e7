//! The data model: [`TangoMachine`] (a sandbox, actual or desired) and
//! [`TangoJob`] (a submitted unit of work).

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A sandbox, described either as a request (before creation) or as a live
/// handle (after `VMMS::initialize_vm` has filled in `instance_id` and
/// `domain_name`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TangoMachine {
    /// The pool tag — typically the image name.
    pub name: String,
    /// Concrete artifact identifier (e.g. a Docker image reference).
    pub image: String,
    /// Backend tag, used to look up the owning `Vmms` in the registry.
    pub vmms: String,
    pub cores: Option<u32>,
    pub memory: Option<u32>,
    pub disk: Option<u32>,
    pub network: Option<String>,
    pub instance_type: Option<String>,
    /// Backend-assigned identifier, set by `initialize_vm`.
    pub instance_id: Option<String>,
    /// Reachable IP/host, set by `initialize_vm`.
    pub domain_name: Option<String>,
    /// 5-digit ID in `[10000, 99999]` for job-scoped (bring-your-own) sandboxes; 0 otherwise.
    pub id: u32,
    pub keep_for_debugging: bool,
    pub notes: String,
}

impl TangoMachine {
    /// A placeholder with an empty `name`, used by the preallocator to
    /// signal "no preallocated sandbox; create on demand."
    pub fn none_placeholder() -> Self {
        Self {
            name: String::new(),
            image: String::new(),
            vmms: String::new(),
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

    /// Whether this is the `none_placeholder` sentinel.
    pub fn is_none(&self) -> bool {
        self.name.is_empty()
    }
}

/// One `(localFile, destFile)` pair to copy into the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFile {
    /// Path on the host.
    pub local_file: String,
    /// Path inside the sandbox.
    pub dest_file: String,
}

/// A submitted unit of work, mutated only through `JobQueue` methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TangoJob {
    pub id: i64,
    pub name: String,
    pub vm: TangoMachine,
    pub input_files: Vec<InputFile>,
    pub output_file: String,
    /// Wall-clock seconds; 0 = unlimited.
    pub timeout: u64,
    pub max_output_file_size: u64,
    pub notify_url: Option<String>,
    pub access_key_id: Option<String>,
    pub access_key: Option<String>,
    pub disable_network: bool,
    pub stop_before: Option<String>,
    pub assigned: bool,
    pub retries: u32,
    /// Append-only, timestamped status lines: `"<utc>|<message>"`.
    pub trace: Vec<String>,
}

impl TangoJob {
    /// Construct a fresh job as the front-end's add-job endpoint would,
    /// before `JobQueue::add` assigns an ID.
    pub fn new(name: String, vm: TangoMachine, input_files: Vec<InputFile>, output_file: String) -> Self {
        Self {
            id: 0,
            name,
            vm,
            input_files,
            output_file,
            timeout: 0,
            max_output_file_size: 0,
            notify_url: None,
            access_key_id: None,
            access_key: None,
            disable_network: false,
            stop_before: None,
            assigned: false,
            retries: 0,
            trace: Vec::new(),
        }
    }

    /// Append a timestamped trace line.
    pub fn append_trace(&mut self, message: impl Into<String>) {
        self.trace.push(format!("{}|{}", Utc::now().to_rfc3339(), message.into()));
    }

    /// Whether this job carries its own cloud credentials (bring-your-own),
    /// bypassing the preallocator pool.
    pub fn is_bring_your_own(&self) -> bool {
        self.access_key_id.is_some() && self.access_key.is_some()
    }

    /// The `(name, input set, output file, machine spec)` identity used for
    /// duplicate-detection in `JobQueue::add`.
    pub fn dedup_key(&self) -> (String, Vec<InputFile>, String, TangoMachine) {
        (self.name.clone(), self.input_files.clone(), self.output_file.clone(), self.vm.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_placeholder_is_detected() {
        assert!(TangoMachine::none_placeholder().is_none());
        let mut vm = TangoMachine::none_placeholder();
        vm.name = "ag".into();
        assert!(!vm.is_none());
    }

    #[test]
    fn trace_lines_are_timestamped_and_ordered() {
        let mut job = TangoJob::new("j".into(), TangoMachine::none_placeholder(), vec![], "out".into());
        job.append_trace("Dispatched");
        job.append_trace("Running");
        assert_eq!(job.trace.len(), 2);
        assert!(job.trace[0].ends_with("|Dispatched"));
        assert!(job.trace[1].ends_with("|Running"));
    }

    #[test]
    fn dedup_key_matches_identical_jobs() {
        let vm = TangoMachine::none_placeholder();
        let a = TangoJob::new("j".into(), vm.clone(), vec![], "out".into());
        let b = TangoJob::new("j".into(), vm, vec![], "out".into());
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
