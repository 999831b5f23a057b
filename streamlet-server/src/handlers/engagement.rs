//! View and like events, per-video stats and the hotness ranking.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use streamlet_core::{VideoId, VideoStats};

use crate::error::{ApiError, ApiResult};
use crate::handlers::artifacts::VideoQuery;
use crate::handlers::blocking;
use crate::state::AppState;

const DEFAULT_RANKING_LIMIT: usize = 20;
const MAX_RANKING_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct EngagementRequest {
    #[serde(alias = "identifier")]
    pub path: String,
    #[serde(default, alias = "displayName")]
    pub name: String,
}

impl EngagementRequest {
    fn identifier(&self, state: &AppState) -> ApiResult<VideoId> {
        if self.path.trim().is_empty() {
            return Err(ApiError::bad_request("no video specified"));
        }
        Ok(state.library.canonical_id(&VideoId::new(self.path.trim()))?)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    pub liked: bool,
    pub likes: i64,
    pub hotness: f64,
}

#[derive(Debug, Deserialize)]
pub struct RankingQuery {
    pub limit: Option<usize>,
}

/// POST /api/view
pub async fn record_view(
    State(state): State<AppState>,
    Json(request): Json<EngagementRequest>,
) -> ApiResult<Json<VideoStats>> {
    let id = request.identifier(&state)?;
    let store = state.stats.clone();
    let stats = blocking(move || Ok(store.record_view(&id, &request.name)?)).await?;
    Ok(Json(stats))
}

/// POST /api/like
pub async fn toggle_like(
    State(state): State<AppState>,
    Json(request): Json<EngagementRequest>,
) -> ApiResult<Json<LikeResponse>> {
    let id = request.identifier(&state)?;
    let store = state.stats.clone();
    let (liked, stats) = blocking(move || {
        let liked = store.toggle_like(&id, &request.name)?;
        Ok((liked, store.stats(&id)?))
    })
    .await?;
    Ok(Json(LikeResponse {
        liked,
        likes: stats.likes,
        hotness: stats.hotness,
    }))
}

/// GET /api/stats?video=<id>
pub async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
) -> ApiResult<Json<VideoStats>> {
    let id = state.library.canonical_id(&query.identifier()?)?;
    let store = state.stats.clone();
    Ok(Json(blocking(move || Ok(store.stats(&id)?)).await?))
}

/// GET /api/ranking?limit=<n>
pub async fn get_ranking(
    State(state): State<AppState>,
    Query(query): Query<RankingQuery>,
) -> ApiResult<Json<Vec<VideoStats>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RANKING_LIMIT)
        .clamp(1, MAX_RANKING_LIMIT);
    let store = state.stats.clone();
    Ok(Json(blocking(move || Ok(store.top_by_hotness(limit)?)).await?))
}
