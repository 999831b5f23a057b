//! Library listing and source video streaming.

use std::cmp::Ordering;
use std::path::Path as FsPath;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use streamlet_core::{open_planned, LibraryEntry, StreamPlan, VideoId, VideoStats};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::handlers::blocking;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Modified,
    Views,
    Likes,
    Hotness,
    Name,
    Size,
}

impl SortKey {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "modified" => Some(SortKey::Modified),
            "views" => Some(SortKey::Views),
            "likes" => Some(SortKey::Likes),
            "hotness" => Some(SortKey::Hotness),
            "name" => Some(SortKey::Name),
            "size" => Some(SortKey::Size),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

/// Listing parameters as sent by the browser. Values that do not parse fall
/// back to their defaults instead of failing the request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

impl ListQuery {
    fn page(&self) -> usize {
        parse_count(self.page.as_deref()).unwrap_or(1).max(1)
    }

    fn page_size(&self) -> usize {
        parse_count(self.page_size.as_deref())
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }

    fn sort(&self) -> SortKey {
        self.sort
            .as_deref()
            .and_then(SortKey::parse)
            .unwrap_or_default()
    }

    fn order(&self) -> SortOrder {
        self.order
            .as_deref()
            .and_then(SortOrder::parse)
            .unwrap_or_default()
    }
}

fn parse_count(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|raw| raw.trim().parse().ok())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    pub name: String,
    pub size: u64,
    pub path: VideoId,
    pub dir: String,
    pub modified: Option<DateTime<Utc>>,
    pub views: i64,
    pub likes: i64,
    pub liked: bool,
    pub hotness: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoPage {
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub sort: SortKey,
    pub order: SortOrder,
    pub videos: Vec<VideoSummary>,
}

fn summarize(state: &AppState, entry: LibraryEntry, stats: Option<&VideoStats>) -> VideoSummary {
    let label = state.library.root_label(entry.root_index).unwrap_or_default();
    let parent = entry
        .path
        .parent()
        .and_then(|parent| state.library.roots().get(entry.root_index).and_then(|root| parent.strip_prefix(root).ok()))
        .map(|relative| relative.display().to_string())
        .unwrap_or_default();
    let dir = if parent.is_empty() {
        label
    } else {
        format!("{label}/{parent}")
    };
    VideoSummary {
        name: entry.name,
        size: entry.size,
        path: entry.id,
        dir,
        modified: entry.modified,
        views: stats.map(|stats| stats.views).unwrap_or(0),
        likes: stats.map(|stats| stats.likes).unwrap_or(0),
        liked: stats.map(|stats| stats.liked).unwrap_or(false),
        hotness: stats.map(|stats| stats.hotness).unwrap_or(0.0),
    }
}

fn compare(key: SortKey, a: &VideoSummary, b: &VideoSummary) -> Ordering {
    match key {
        SortKey::Modified => a.modified.cmp(&b.modified),
        SortKey::Views => a.views.cmp(&b.views),
        SortKey::Likes => a.likes.cmp(&b.likes),
        SortKey::Hotness => a.hotness.total_cmp(&b.hotness),
        SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortKey::Size => a.size.cmp(&b.size),
    }
}

/// GET /api/videos
pub async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<VideoPage>> {
    let library = state.library.clone();
    let store = state.stats.clone();
    let (entries, stats) = blocking(move || {
        let stats = store.all_stats()?;
        Ok((library.scan(), stats))
    })
    .await?;
    let sort = query.sort();
    let order = query.order();

    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|needle| !needle.is_empty())
        .map(str::to_lowercase);
    let mut videos: Vec<VideoSummary> = entries
        .into_iter()
        .filter(|entry| {
            needle
                .as_deref()
                .map(|needle| entry.name.to_lowercase().contains(needle))
                .unwrap_or(true)
        })
        .map(|entry| {
            let row = stats.get(&entry.id);
            summarize(&state, entry, row)
        })
        .collect();

    videos.sort_by(|a, b| {
        let ordering = compare(sort, a, b).then_with(|| a.path.cmp(&b.path));
        match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });

    let page_size = query.page_size();
    let page = query.page();
    let total = videos.len();
    let total_pages = total.div_ceil(page_size);
    let videos = videos
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .collect();

    Ok(Json(VideoPage {
        total,
        page,
        page_size,
        total_pages,
        sort,
        order,
        videos,
    }))
}

/// GET /api/video/*identifier
pub async fn stream_video(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let library = state.library.clone();
    let id = VideoId::new(identifier);
    let path = blocking(move || Ok(library.resolve(&id)?)).await?;
    let content_type = video_content_type(&path);
    ranged_response(&path, &headers, content_type).await
}

pub(crate) fn video_content_type(path: &FsPath) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        _ => "application/octet-stream",
    }
}

/// Serves `path` honoring a single `Range` header: 200 for the whole file,
/// 206 for a satisfiable range, 416 with `Content-Range: bytes */size`
/// otherwise.
pub(crate) async fn ranged_response(
    path: &FsPath,
    headers: &HeaderMap,
    content_type: &'static str,
) -> ApiResult<Response> {
    let metadata = tokio::fs::metadata(path).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound("video not found".into())
        } else {
            ApiError::internal(format!("failed to stat {}: {err}", path.display()))
        }
    })?;
    let range = match headers.get(header::RANGE) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| ApiError::bad_request("invalid range"))?,
        ),
        None => None,
    };
    let plan = StreamPlan::for_request(range, metadata.len())?;

    let mut response = match plan {
        StreamPlan::Unsatisfiable { .. } => {
            debug!(path = %path.display(), range = ?range, "range not satisfiable");
            StatusCode::RANGE_NOT_SATISFIABLE.into_response()
        }
        StreamPlan::Full { .. } | StreamPlan::Partial { .. } => {
            let body = open_planned(path, &plan).await?;
            let status = if matches!(plan, StreamPlan::Partial { .. }) {
                StatusCode::PARTIAL_CONTENT
            } else {
                StatusCode::OK
            };
            let mut response = (status, Body::from_stream(body)).into_response();
            let headers = response.headers_mut();
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(plan.content_length()));
            response
        }
    };

    let headers = response.headers_mut();
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(content_range) = plan.content_range() {
        if let Ok(value) = HeaderValue::from_str(&content_range) {
            headers.insert(header::CONTENT_RANGE, value);
        }
    }
    Ok(response)
}
