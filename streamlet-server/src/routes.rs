//! API routes.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::artifacts::{get_preview, get_thumbnail};
use crate::handlers::engagement::{get_ranking, get_stats, record_view, toggle_like};
use crate::handlers::generation::{
    preview_status, start_previews, start_thumbnails, thumbnail_status,
};
use crate::handlers::health;
use crate::handlers::videos::{list_videos, stream_video};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/videos", get(list_videos))
        .route("/video/*identifier", get(stream_video))
        .route("/thumbnail", get(get_thumbnail))
        .route("/preview", get(get_preview))
        .route("/stats", get(get_stats))
        .route("/ranking", get(get_ranking))
        .route("/view", post(record_view))
        .route("/like", post(toggle_like))
        .route("/thumbnails/generate", post(start_thumbnails))
        .route("/thumbnails/status", get(thumbnail_status))
        .route("/previews/generate", post(start_previews))
        .route("/previews/status", get(preview_status));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
