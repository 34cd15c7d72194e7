//! Tango web server entry point: loads configuration, wires the VMMS
//! registry, bootstraps the job engine, and serves the REST surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tango_core::{System, TangoConfig, VmmsRegistry};
use tango_store::{Store, StoreConfig};
use tango_vmms::{LocalDocker, MockVmms};
use tango_web::{server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = TangoConfig::load()?;

    let access_key = std::env::var("TANGO_ACCESS_KEY").unwrap_or_else(|_| "default".to_string());
    let lab_root = std::env::var("TANGO_LAB_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp/tango-labs"));
    tokio::fs::create_dir_all(&lab_root).await?;

    let store = Store::open(StoreConfig::from_env()).await?;

    let mut registry = VmmsRegistry::new();
    registry.register("localDocker", Arc::new(LocalDocker::new(Arc::new(config.clone()))));
    registry.register("mock", Arc::new(MockVmms::default()));

    let system = Arc::new(System::bootstrap(store, registry, config).await);
    let state = AppState::new(Arc::clone(&system), lab_root, access_key);

    let addr: SocketAddr = std::env::var("TANGO_WEB_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8600".to_string())
        .parse()?;

    server::run_server(state, addr).await
}
