//! REST handlers, one module per group of endpoints.

pub mod files;
pub mod jobs;
pub mod pool;

pub use files::{open_lab, upload_file};
pub use jobs::{add_job, get_partial_output, list_jobs, poll_job, AddJobRequest, AddJobResponse};
pub use pool::{build_image, get_pool, info, set_pool, InfoResponse, PreallocRequest};
