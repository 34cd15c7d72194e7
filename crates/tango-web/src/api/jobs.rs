//! `/addJob`, `/poll`, `/getPartialOutput`, `/jobs` handlers.

use crate::error::{WebError, WebResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tango_core::{InputFile, TangoJob, TangoMachine};

/// One `(localFile, destFile)` pair as the front-end's clients name it.
#[derive(Debug, Deserialize)]
pub struct FileSpec {
    #[serde(rename = "localFile")]
    pub local_file: String,
    #[serde(rename = "destFile")]
    pub dest_file: String,
}

/// Recognised `addJob` fields; anything else in the body is ignored.
#[derive(Debug, Deserialize)]
pub struct AddJobRequest {
    pub image: String,
    #[serde(default)]
    pub files: Vec<FileSpec>,
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub max_kb: u64,
    pub output_file: String,
    #[serde(rename = "jobName")]
    pub job_name: String,
    #[serde(default, rename = "accessKeyId")]
    pub access_key_id: Option<String>,
    #[serde(default, rename = "accessKey")]
    pub access_key: Option<String>,
    #[serde(default)]
    pub disable_network: bool,
    #[serde(default, rename = "instanceType")]
    pub instance_type: Option<String>,
    #[serde(default, rename = "ec2Vmms")]
    pub ec2_vmms: bool,
    #[serde(default, rename = "stopBefore")]
    pub stop_before: Option<String>,
    #[serde(default, rename = "notifyURL")]
    pub notify_url: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AddJobResponse {
    pub job_id: i64,
}

pub async fn add_job(
    State(state): State<AppState>,
    Path((key, lab)): Path<(String, String)>,
    Json(req): Json<AddJobRequest>,
) -> WebResult<Json<AddJobResponse>> {
    state.check_key(&key)?;
    if req.image.is_empty() || req.job_name.is_empty() {
        return Err(WebError::BadRequest("image and jobName are required".into()));
    }

    let lab_dir = state.lab_dir(&lab);

    let mut vm = TangoMachine::none_placeholder();
    vm.name = req.image.clone();
    vm.image = req.image;
    vm.vmms = if req.ec2_vmms { "ec2".to_string() } else { "localDocker".to_string() };
    vm.instance_type = req.instance_type;

    let input_files = req
        .files
        .into_iter()
        .map(|f| InputFile {
            local_file: lab_dir.join(&f.local_file).to_string_lossy().into_owned(),
            dest_file: f.dest_file,
        })
        .collect();

    let output_file = lab_dir.join(&req.output_file).to_string_lossy().into_owned();

    let mut job = TangoJob::new(req.job_name, vm, input_files, output_file);
    job.timeout = req.timeout;
    job.max_output_file_size = req.max_kb.saturating_mul(1024);
    job.notify_url = req.notify_url.or(req.callback_url);
    job.access_key_id = req.access_key_id;
    job.access_key = req.access_key;
    job.disable_network = req.disable_network;
    job.stop_before = req.stop_before;

    let job_id = state.system.add_job(job).await?;
    Ok(Json(AddJobResponse { job_id }))
}

/// Returns the completed output's bytes once present, else 404 — the front
/// end never blocks waiting for a job, it is re-polled by the client.
pub async fn poll_job(
    State(state): State<AppState>,
    Path((key, lab, output)): Path<(String, String, String)>,
) -> WebResult<Response> {
    state.check_key(&key)?;
    let path = state.lab_dir(&lab).join(&output);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok((StatusCode::OK, bytes).into_response()),
        Err(_) => Err(WebError::NotFound(format!("{output} not ready"))),
    }
}

pub async fn get_partial_output(
    State(state): State<AppState>,
    Path((key, job_id)): Path<(String, i64)>,
) -> WebResult<String> {
    state.check_key(&key)?;
    let job = state
        .system
        .queue
        .get_live(job_id)
        .await
        .ok_or_else(|| WebError::NotFound(format!("job {job_id} is not live")))?;

    let backend = state
        .system
        .vmms
        .get(&job.vm.vmms)
        .ok_or_else(|| WebError::BadRequest(format!("unknown vmms backend {}", job.vm.vmms)))?;

    Ok(backend.get_partial_output(&job.vm).await)
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Path((key, dead_jobs)): Path<(String, u8)>,
) -> WebResult<Json<Vec<TangoJob>>> {
    state.check_key(&key)?;
    let jobs = if dead_jobs != 0 {
        state.system.queue.dead_jobs().await
    } else {
        state.system.queue.live_jobs().await
    };
    Ok(Json(jobs))
}
