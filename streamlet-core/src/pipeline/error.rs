use std::path::PathBuf;

use thiserror::Error;

use crate::artifact::ArtifactKind;
use crate::library::LibraryError;
use crate::media::MediaError;
use crate::stats::StatsError;

use super::GenerationProgress;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Library(#[from] LibraryError),
    #[error("stats store error: {0}")]
    Stats(#[from] StatsError),
    #[error("media tool error: {0}")]
    Media(#[from] MediaError),
    #[error("failed to fingerprint {path}: {source}")]
    Fingerprint {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{kind} generation already running ({} of {} done)", .progress.done, .progress.total)]
    Conflict {
        kind: ArtifactKind,
        progress: GenerationProgress,
    },
    #[error("generation task failed: {0}")]
    Task(String),
}

pub type GenerationResult<T> = std::result::Result<T, GenerationError>;
