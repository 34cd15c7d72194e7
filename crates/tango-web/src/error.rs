//! HTTP error mapping for the Tango front-end.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tango_core::CoreError;
use thiserror::Error;

pub type WebResult<T> = Result<T, WebError>;

#[derive(Debug, Error)]
pub enum WebError {
    #[error("unauthorized: bad access key")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebError::Unauthorized => StatusCode::UNAUTHORIZED,
            WebError::NotFound(_) => StatusCode::NOT_FOUND,
            WebError::BadRequest(_) => StatusCode::BAD_REQUEST,
            WebError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            WebError::Core(CoreError::IdExhausted) => StatusCode::SERVICE_UNAVAILABLE,
            WebError::Core(CoreError::UnknownBackend(_)) => StatusCode::BAD_REQUEST,
            WebError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WebError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
