//! `/info`, `/pool`, `/prealloc`, `/build` handlers: pool and service
//! introspection and administration.

use crate::error::{WebError, WebResult};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tango_core::{PoolStats, TangoMachine};

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub live_jobs: usize,
    pub dead_jobs: usize,
    pub images: Vec<String>,
    pub max_concurrent_jobs: usize,
    pub reuse_vms: bool,
}

pub async fn info(State(state): State<AppState>, Path(key): Path<String>) -> WebResult<Json<InfoResponse>> {
    state.check_key(&key)?;
    Ok(Json(InfoResponse {
        live_jobs: state.system.queue.live_jobs().await.len(),
        dead_jobs: state.system.queue.dead_jobs().await.len(),
        images: state.system.preallocator.images().await,
        max_concurrent_jobs: state.system.config.max_concurrent_jobs,
        reuse_vms: state.system.config.reuse_vms,
    }))
}

pub async fn get_pool(
    State(state): State<AppState>,
    Path((key, image)): Path<(String, String)>,
) -> WebResult<Json<PoolStats>> {
    state.check_key(&key)?;
    Ok(Json(state.system.preallocator.get_pool(&image).await))
}

#[derive(Debug, Deserialize)]
pub struct PreallocRequest {
    #[serde(default = "default_vmms")]
    pub vmms: String,
    #[serde(default)]
    pub cores: Option<u32>,
    #[serde(default)]
    pub memory: Option<u32>,
}

fn default_vmms() -> String {
    "localDocker".to_string()
}

pub async fn set_pool(
    State(state): State<AppState>,
    Path((key, image, num)): Path<(String, String, usize)>,
    Json(req): Json<PreallocRequest>,
) -> WebResult<StatusCode> {
    state.check_key(&key)?;

    let mut template = TangoMachine::none_placeholder();
    template.name = image.clone();
    template.image = image;
    template.vmms = req.vmms;
    template.cores = req.cores;
    template.memory = req.memory;

    state.system.preallocator.update(template, num).await;
    Ok(StatusCode::ACCEPTED)
}

/// Image-build tooling is an external collaborator the core never runs
/// itself; this endpoint exists so clients get a clear response instead of
/// a 404 when they probe for it.
pub async fn build_image(
    State(state): State<AppState>,
    Path(key): Path<String>,
    _headers: HeaderMap,
    _body: Bytes,
) -> WebResult<StatusCode> {
    state.check_key(&key)?;
    Err(WebError::NotImplemented("image building is not handled by this server".into()))
}
