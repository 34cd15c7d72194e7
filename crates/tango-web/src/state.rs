//! Shared application state for the Tango HTTP front-end.

use crate::error::{WebError, WebResult};
use std::path::PathBuf;
use std::sync::Arc;
use tango_core::System;

/// Held by every handler: the running job engine plus the front-end's own
/// bookkeeping (per-lab upload directories, the shared access key).
#[derive(Clone)]
pub struct AppState {
    pub system: Arc<System>,
    /// Root directory under which each `{lab}` gets its own work directory.
    pub lab_root: PathBuf,
    /// Shared secret every request's `{key}` path segment must match.
    access_key: Arc<String>,
}

impl AppState {
    pub fn new(system: Arc<System>, lab_root: PathBuf, access_key: String) -> Self {
        Self { system, lab_root, access_key: Arc::new(access_key) }
    }

    /// Every route takes `{key}` as its first path segment; this is the
    /// front-end's entire authentication story, matching the original's
    /// per-course shared secret.
    pub fn check_key(&self, key: &str) -> WebResult<()> {
        if key == self.access_key.as_str() {
            Ok(())
        } else {
            Err(WebError::Unauthorized)
        }
    }

    pub fn lab_dir(&self, lab: &str) -> PathBuf {
        self.lab_root.join(lab)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tango_core::{TangoConfig, VmmsRegistry};
    use tango_store::Store;

    #[tokio::test]
    async fn key_mismatch_is_rejected() {
        let system = Arc::new(System::bootstrap(Store::in_process(), VmmsRegistry::new(), TangoConfig::default()).await);
        let state = AppState::new(system, PathBuf::from("/tmp/tango-web-test"), "secret".into());
        assert!(state.check_key("secret").is_ok());
        assert!(state.check_key("wrong").is_err());
    }
}
