use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("invalid video identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("root index {index} out of range ({roots} roots configured)")]
    RootIndexOutOfRange { index: usize, roots: usize },
    #[error("access denied: {0:?} escapes the configured roots")]
    AccessDenied(String),
    #[error("video not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl LibraryError {
    /// Client-side mistakes that should never be retried.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LibraryError::InvalidIdentifier(_)
                | LibraryError::RootIndexOutOfRange { .. }
                | LibraryError::AccessDenied(_)
        )
    }
}

pub type LibraryResult<T> = Result<T, LibraryError>;
