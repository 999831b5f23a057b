//! Batch generation start and status endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use streamlet_core::{ArtifactKind, GenerationProgress};
use tracing::info;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub status: &'static str,
    pub progress: GenerationProgress,
}

fn start(state: &AppState, kind: ArtifactKind) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    let progress = state.generation.start(kind)?;
    info!(%kind, "batch generation requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(StartResponse {
            status: "started",
            progress,
        }),
    ))
}

/// POST /api/thumbnails/generate
pub async fn start_thumbnails(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    start(&state, ArtifactKind::Thumbnail)
}

/// POST /api/previews/generate
pub async fn start_previews(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<StartResponse>)> {
    start(&state, ArtifactKind::Preview)
}

/// GET /api/thumbnails/status
pub async fn thumbnail_status(State(state): State<AppState>) -> Json<GenerationProgress> {
    Json(state.generation.status(ArtifactKind::Thumbnail))
}

/// GET /api/previews/status
pub async fn preview_status(State(state): State<AppState>) -> Json<GenerationProgress> {
    Json(state.generation.status(ArtifactKind::Preview))
}
