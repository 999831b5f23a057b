//! API error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use streamlet_core::{
    ArtifactKind, GenerationError, GenerationProgress, LibraryError, StatsError, StreamingError,
};
use thiserror::Error;
use tracing::{error, warn};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{kind} generation already running")]
    Conflict {
        kind: ArtifactKind,
        progress: GenerationProgress,
    },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<LibraryError> for ApiError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::AccessDenied(_) => {
                warn!(error = %err, "rejected path outside configured roots");
                ApiError::Forbidden("access denied".into())
            }
            LibraryError::NotFound(_) => ApiError::NotFound("video not found".into()),
            err if err.is_client_error() => ApiError::BadRequest(err.to_string()),
            err => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<StatsError> for ApiError {
    fn from(err: StatsError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<StreamingError> for ApiError {
    fn from(err: StreamingError) -> Self {
        match err {
            StreamingError::MalformedRange(_) => ApiError::BadRequest("invalid range".into()),
            StreamingError::Io { ref source, .. }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                ApiError::NotFound("video not found".into())
            }
            StreamingError::Io { .. } => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Library(inner) => inner.into(),
            GenerationError::Conflict { kind, progress } => ApiError::Conflict { kind, progress },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<GenerationProgress>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let progress = match &self {
            ApiError::Conflict { progress, .. } => Some(*progress),
            _ => None,
        };
        let body = ErrorResponse {
            error: self.to_string(),
            progress,
        };
        (status, Json(body)).into_response()
    }
}
