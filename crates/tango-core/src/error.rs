//! Error kinds the core distinguishes, per the error-handling design.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// VMMS returned -1 in WAITING or COPYING_IN; retried up to `MAX_JOB_RETRIES` then dead.
    #[error("transient sandbox failure: {0}")]
    TransientSandbox(String),

    /// VMMS unable to provision a sandbox at all; job goes dead, sandbox destroyed.
    #[error("fatal sandbox failure: {0}")]
    FatalSandbox(String),

    /// `runJob` exceeded its bound; reported as a completion with `exit=timeout`, not retried.
    #[error("workload timed out after {0}s")]
    WorkloadTimeout(u64),

    /// JobQueue could not mint a fresh ID; the id space is saturated.
    #[error("job id space exhausted")]
    IdExhausted,

    /// Missing required configuration at start-up.
    #[error("configuration error: {0}")]
    Config(String),

    /// The job referenced a pool/VMMS backend tag with no registered implementation.
    #[error("unknown vmms backend: {0}")]
    UnknownBackend(String),

    /// The worker could not obtain any sandbox: no BYO credentials and the
    /// preallocator returned the empty placeholder.
    #[error("no sandbox available for job {0} and no bring-your-own credentials supplied")]
    NoSandboxAvailable(i64),

    #[error(transparent)]
    Store(#[from] tango_store::StoreError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
