use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use streamlet_core::{
    ArtifactRequest, GenerationSection, LibrarySection, MediaError, MediaResult, MediaTool,
    PathsSection, ServerSection, StreamletConfig,
};
use streamlet_server::{create_router, AppState};
use tokio::sync::Semaphore;
use tower::ServiceExt;

#[derive(Default)]
struct FakeTool {
    renders: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    fail: bool,
}

#[async_trait::async_trait]
impl MediaTool for FakeTool {
    async fn probe_duration(&self, _source: &Path) -> MediaResult<f64> {
        Ok(120.0)
    }

    async fn generate_artifact(&self, request: &ArtifactRequest) -> MediaResult<()> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        self.renders.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(&request.output, b"artifact").await.unwrap();
        if self.fail {
            return Err(MediaError::CommandFailure {
                command: "ffmpeg".into(),
                status: Some(1),
                stderr: "moov atom not found".into(),
            });
        }
        Ok(())
    }
}

struct TestApp {
    _dir: tempfile::TempDir,
    root: PathBuf,
    cache: PathBuf,
    state: AppState,
    router: Router,
    tool: Arc<FakeTool>,
}

fn test_app(tool: FakeTool) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("videos");
    fs::create_dir_all(&root).unwrap();
    let config = StreamletConfig {
        library: LibrarySection {
            roots: vec![root.clone()],
            extension: "mp4".into(),
            hidden_prefix: "._".into(),
            min_size_bytes: 1,
        },
        paths: PathsSection {
            cache_dir: dir.path().join("cache"),
            data_dir: dir.path().join("data"),
        },
        generation: GenerationSection::default(),
        server: ServerSection::default(),
    };
    let tool = Arc::new(tool);
    let state = AppState::with_tool(config, tool.clone()).unwrap();
    let router = create_router(state.clone());
    TestApp {
        cache: dir.path().join("cache"),
        _dir: dir,
        root,
        state,
        router,
        tool,
    }
}

fn video_bytes(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

async fn get(router: &Router, uri: &str) -> Response {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

async fn get_range(router: &Router, uri: &str, range: &str) -> Response {
    let request = Request::get(uri)
        .header(header::RANGE, range)
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

async fn post_json(router: &Router, uri: &str, body: Value) -> Response {
    let request = Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(router, request).await
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = test_app(FakeTool::default());
    let response = get(&app.router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["roots"], 1);
}

#[tokio::test]
async fn full_stream_returns_every_byte() {
    let app = test_app(FakeTool::default());
    let content = video_bytes(5000);
    fs::write(app.root.join("movie.mp4"), &content).unwrap();

    let response = get(&app.router, "/api/video/0:movie.mp4").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, header::ACCEPT_RANGES), "bytes");
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "5000");
    assert_eq!(header_str(&response, header::CONTENT_TYPE), "video/mp4");
    assert_eq!(body_bytes(response).await, content);
}

#[tokio::test]
async fn range_request_returns_exact_slice() {
    let app = test_app(FakeTool::default());
    let content = video_bytes(5000);
    fs::create_dir_all(app.root.join("shows")).unwrap();
    fs::write(app.root.join("shows/ep1.mp4"), &content).unwrap();

    let response = get_range(&app.router, "/api/video/0:shows/ep1.mp4", "bytes=0-99").await;
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes 0-99/5000");
    assert_eq!(header_str(&response, header::CONTENT_LENGTH), "100");
    let body = body_bytes(response).await;
    assert_eq!(body.len(), 100);
    assert_eq!(body.as_slice(), &content[..100]);

    let tail = get_range(&app.router, "/api/video/shows/ep1.mp4", "bytes=4990-").await;
    assert_eq!(tail.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&tail, header::CONTENT_RANGE), "bytes 4990-4999/5000");
    assert_eq!(body_bytes(tail).await.as_slice(), &content[4990..]);
}

#[tokio::test]
async fn range_at_end_of_file_is_unsatisfiable() {
    let app = test_app(FakeTool::default());
    fs::write(app.root.join("movie.mp4"), video_bytes(5000)).unwrap();

    let response = get_range(&app.router, "/api/video/0:movie.mp4", "bytes=5000-5000").await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header_str(&response, header::CONTENT_RANGE), "bytes */5000");
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn malformed_range_is_a_bad_request() {
    let app = test_app(FakeTool::default());
    fs::write(app.root.join("movie.mp4"), video_bytes(10)).unwrap();

    let response = get_range(&app.router, "/api/video/0:movie.mp4", "bytes=1-2-3").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn traversal_and_missing_files_are_refused() {
    let app = test_app(FakeTool::default());
    let denied = get(&app.router, "/api/video/0:../../etc/passwd").await;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let missing = get(&app.router, "/api/video/0:nowhere.mp4").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let bad_root = get(&app.router, "/api/video/9:movie.mp4").await;
    assert_eq!(bad_root.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn views_and_likes_round_trip() {
    let app = test_app(FakeTool::default());
    for _ in 0..3 {
        let response = post_json(
            &app.router,
            "/api/view",
            json!({ "path": "0:movie.mp4", "name": "movie.mp4" }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let liked = post_json(
        &app.router,
        "/api/like",
        json!({ "identifier": "0:movie.mp4", "displayName": "movie.mp4" }),
    )
    .await;
    assert_eq!(liked.status(), StatusCode::OK);
    let liked = body_json(liked).await;
    assert_eq!(liked["liked"], true);
    assert_eq!(liked["likes"], 1);

    let stats = body_json(get(&app.router, "/api/stats?video=0:movie.mp4").await).await;
    assert_eq!(stats["views"], 3);
    assert_eq!(stats["likes"], 1);
    assert_eq!(stats["name"], "movie.mp4");

    let unliked = body_json(
        post_json(&app.router, "/api/like", json!({ "path": "0:movie.mp4" })).await,
    )
    .await;
    assert_eq!(unliked["liked"], false);
    assert_eq!(unliked["likes"], 0);

    let ranking = body_json(get(&app.router, "/api/ranking?limit=5").await).await;
    assert_eq!(ranking.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn engagement_rejects_malformed_identifiers() {
    let app = test_app(FakeTool::default());
    let response = post_json(&app.router, "/api/view", json!({ "path": "3:movie.mp4" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = get(&app.router, "/api/stats").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn thumbnail_is_generated_once_then_served_from_cache() {
    let app = test_app(FakeTool::default());
    fs::write(app.root.join("movie.mp4"), video_bytes(2048)).unwrap();

    for _ in 0..2 {
        let response = get(&app.router, "/api/thumbnail?video=0:movie.mp4").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_str(&response, header::CONTENT_TYPE), "image/jpeg");
        assert_eq!(body_bytes(response).await, b"artifact");
    }
    assert_eq!(app.tool.renders.load(Ordering::SeqCst), 1);

    let preview = get(&app.router, "/api/preview?video=0:movie.mp4").await;
    assert_eq!(preview.status(), StatusCode::OK);
    assert_eq!(header_str(&preview, header::CONTENT_TYPE), "video/mp4");

    let missing = get(&app.router, "/api/thumbnail?video=0:gone.mp4").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_on_demand_generation_is_a_server_error() {
    let app = test_app(FakeTool {
        fail: true,
        ..FakeTool::default()
    });
    fs::write(app.root.join("m.mp4"), video_bytes(4096)).unwrap();

    for uri in ["/api/thumbnail?video=0:m.mp4", "/api/preview?video=0:m.mp4"] {
        let response = get(&app.router, uri).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
        assert!(body_json(response).await["error"].is_string());
    }
    // one still, then the preview montage and its clip fallback
    assert_eq!(app.tool.renders.load(Ordering::SeqCst), 3);

    let leftovers: Vec<_> = fs::read_dir(&app.cache)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.file_name())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "cache not empty: {leftovers:?}");

    let stats = body_json(get(&app.router, "/api/stats?video=0:m.mp4").await).await;
    assert!(stats["thumbnailHash"].is_null());
    assert!(stats["previewHash"].is_null());

    let source = get(&app.router, "/api/video/0:m.mp4").await;
    assert_eq!(source.status(), StatusCode::OK);
    assert_eq!(body_bytes(source).await.len(), 4096);
}

#[tokio::test]
async fn bare_identifiers_share_stats_with_indexed_ones() {
    let app = test_app(FakeTool::default());
    post_json(&app.router, "/api/view", json!({ "path": "movie.mp4" })).await;
    post_json(&app.router, "/api/view", json!({ "path": "0:movie.mp4" })).await;
    let liked = body_json(post_json(&app.router, "/api/like", json!({ "path": "movie.mp4" })).await).await;
    assert_eq!(liked["likes"], 1);

    let stats = body_json(get(&app.router, "/api/stats?video=movie.mp4").await).await;
    assert_eq!(stats["path"], "0:movie.mp4");
    assert_eq!(stats["views"], 2);
    assert_eq!(stats["likes"], 1);

    let ranking = body_json(get(&app.router, "/api/ranking").await).await;
    assert_eq!(ranking.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_batch_start_conflicts_with_progress() {
    let gate = Arc::new(Semaphore::new(0));
    let app = test_app(FakeTool {
        gate: Some(gate.clone()),
        ..FakeTool::default()
    });
    fs::write(app.root.join("a.mp4"), video_bytes(64)).unwrap();
    fs::write(app.root.join("b.mp4"), video_bytes(65)).unwrap();

    let started = post_json(&app.router, "/api/thumbnails/generate", json!({})).await;
    assert_eq!(started.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(started).await["progress"]["running"], true);

    let conflict = post_json(&app.router, "/api/thumbnails/generate", json!({})).await;
    assert_eq!(conflict.status(), StatusCode::CONFLICT);
    let body = body_json(conflict).await;
    assert_eq!(body["progress"]["running"], true);

    let status = body_json(get(&app.router, "/api/thumbnails/status").await).await;
    assert_eq!(status["running"], true);

    gate.add_permits(8);
    app.state.generation.join().await;

    let status = body_json(get(&app.router, "/api/thumbnails/status").await).await;
    assert_eq!(status["running"], false);
    assert_eq!(status["total"], 2);
    assert_eq!(status["done"], 2);
    assert_eq!(status["failed"], 0);

    let previews = body_json(get(&app.router, "/api/previews/status").await).await;
    assert_eq!(previews["running"], false);
    assert_eq!(previews["total"], 0);
}

#[tokio::test]
async fn listing_joins_stats_and_paginates() {
    let app = test_app(FakeTool::default());
    fs::write(app.root.join("alpha.mp4"), video_bytes(10)).unwrap();
    fs::write(app.root.join("beta.mp4"), video_bytes(20)).unwrap();
    fs::write(app.root.join("._beta.mp4"), video_bytes(20)).unwrap();
    fs::write(app.root.join("notes.txt"), video_bytes(20)).unwrap();
    post_json(&app.router, "/api/view", json!({ "path": "0:beta.mp4", "name": "beta.mp4" })).await;

    let page = body_json(get(&app.router, "/api/videos?sort=views&order=desc").await).await;
    assert_eq!(page["total"], 2);
    assert_eq!(page["videos"][0]["path"], "0:beta.mp4");
    assert_eq!(page["videos"][0]["views"], 1);
    assert_eq!(page["videos"][0]["dir"], "videos");

    let by_name =
        body_json(get(&app.router, "/api/videos?sort=name&order=asc&pageSize=1&page=2").await)
            .await;
    assert_eq!(by_name["totalPages"], 2);
    assert_eq!(by_name["videos"].as_array().unwrap().len(), 1);
    assert_eq!(by_name["videos"][0]["name"], "beta.mp4");

    let searched = body_json(get(&app.router, "/api/videos?search=ALP").await).await;
    assert_eq!(searched["total"], 1);
    assert_eq!(searched["videos"][0]["name"], "alpha.mp4");
}

#[tokio::test]
async fn listing_ignores_unparseable_parameters() {
    let app = test_app(FakeTool::default());
    fs::write(app.root.join("alpha.mp4"), video_bytes(10)).unwrap();

    let response = get(
        &app.router,
        "/api/videos?sort=popularity&order=sideways&page=two&pageSize=lots",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;
    assert_eq!(page["sort"], "modified");
    assert_eq!(page["order"], "desc");
    assert_eq!(page["page"], 1);
    assert_eq!(page["pageSize"], 50);
    assert_eq!(page["total"], 1);
}
