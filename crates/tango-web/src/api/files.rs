//! `/open` and `/upload` handlers: per-lab work directories on the host.

use crate::error::{WebError, WebResult};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};

/// Ensure a per-lab work directory exists.
pub async fn open_lab(
    State(state): State<AppState>,
    Path((key, lab)): Path<(String, String)>,
) -> WebResult<StatusCode> {
    state.check_key(&key)?;
    tokio::fs::create_dir_all(state.lab_dir(&lab)).await?;
    Ok(StatusCode::OK)
}

/// Store a raw-bytes upload under the lab directory, named by the
/// `Filename` header.
pub async fn upload_file(
    State(state): State<AppState>,
    Path((key, lab)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> WebResult<StatusCode> {
    state.check_key(&key)?;
    let filename = headers
        .get("Filename")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WebError::BadRequest("missing Filename header".into()))?;

    let lab_dir = state.lab_dir(&lab);
    tokio::fs::create_dir_all(&lab_dir).await?;
    tokio::fs::write(lab_dir.join(filename), body).await?;
    Ok(StatusCode::CREATED)
}
