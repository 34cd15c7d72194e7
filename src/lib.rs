/*!
 * Tango CLI - command-line client for the Tango autograding job server
 *
 * Mirrors the REST surface exposed by `tango-web`: opening a lab working
 * directory, uploading input files, submitting jobs, polling for output,
 * and inspecting or administering the sandbox pool.
 */

pub mod client;
pub mod commands;
pub mod error;
pub mod logging;

pub use client::TangoClient;
pub use error::{CliError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
