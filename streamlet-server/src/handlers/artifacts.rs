//! Thumbnail and preview delivery, generating on first request.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::Response;
use serde::Deserialize;
use streamlet_core::{ArtifactKind, VideoId};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::handlers::videos::ranged_response;
use crate::state::AppState;

const ARTIFACT_CACHE_CONTROL: &str = "public, max-age=86400";

#[derive(Debug, Deserialize)]
pub struct VideoQuery {
    pub video: Option<String>,
}

impl VideoQuery {
    pub(crate) fn identifier(&self) -> ApiResult<VideoId> {
        match self.video.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Ok(VideoId::new(raw)),
            _ => Err(ApiError::bad_request("no video specified")),
        }
    }
}

/// GET /api/thumbnail?video=<id>
pub async fn get_thumbnail(
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_artifact(state, query, headers, ArtifactKind::Thumbnail).await
}

/// GET /api/preview?video=<id>
pub async fn get_preview(
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    serve_artifact(state, query, headers, ArtifactKind::Preview).await
}

async fn serve_artifact(
    state: AppState,
    query: VideoQuery,
    headers: HeaderMap,
    kind: ArtifactKind,
) -> ApiResult<Response> {
    let id = query.identifier()?;
    let outcome = state.generation.ensure(&id, kind).await?;
    debug!(video = %id, %kind, origin = ?outcome.origin, "serving artifact");
    let mut response = ranged_response(&outcome.path, &headers, kind.content_type()).await?;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(ARTIFACT_CACHE_CONTROL),
    );
    Ok(response)
}
