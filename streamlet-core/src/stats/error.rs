use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("failed to prepare database directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("stats store path not configured")]
    MissingStore,
    #[error("stats writer connection poisoned by a panicking holder")]
    Poisoned,
}

pub type StatsResult<T> = std::result::Result<T, StatsError>;
