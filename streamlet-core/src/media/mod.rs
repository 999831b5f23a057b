//! Boundary to the external media tool.
//!
//! The pipeline only ever asks two things of it: how long a file is, and to
//! render an artifact into an output path. Everything else (caching, dedup,
//! pooling) stays on our side of [`MediaTool`].

mod ffmpeg;

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub use ffmpeg::{CommandExecutor, FfmpegTool, SystemCommandExecutor};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("unparseable duration from {path}: {raw:?}")]
    InvalidDuration { path: PathBuf, raw: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type MediaResult<T> = std::result::Result<T, MediaError>;

/// Timing parameters for one artifact render.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderPlan {
    /// One still frame at `at` seconds.
    Still { at: f64 },
    /// Short segments starting at each of `starts`, joined end to end.
    Montage { starts: Vec<f64>, segment_seconds: f64 },
    /// One contiguous clip.
    Clip { start: f64, seconds: f64 },
}

impl RenderPlan {
    pub fn label(&self) -> &'static str {
        match self {
            RenderPlan::Still { .. } => "still",
            RenderPlan::Montage { .. } => "montage",
            RenderPlan::Clip { .. } => "clip",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    pub plan: RenderPlan,
}

impl ArtifactRequest {
    pub fn new(source: impl AsRef<Path>, output: impl AsRef<Path>, plan: RenderPlan) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            plan,
        }
    }
}

/// Probing and rendering, with no partial success: a render either leaves a
/// complete file at `output` or returns an error.
#[async_trait::async_trait]
pub trait MediaTool: Send + Sync {
    async fn probe_duration(&self, source: &Path) -> MediaResult<f64>;

    async fn generate_artifact(&self, request: &ArtifactRequest) -> MediaResult<()>;
}
