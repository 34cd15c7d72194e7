//! Sandbox backends implementing `tango_core::Vmms`.
//!
//! - [`LocalDocker`]: one container and one bind-mounted volume per job.
//! - [`MockVmms`]: an in-memory stand-in for tests.

pub mod local_docker;
pub mod mock;

pub use local_docker::LocalDocker;
pub use mock::{MockScript, MockVmms};
