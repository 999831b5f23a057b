//! Addressing of videos spread across several configured root directories.
//!
//! A [`VideoId`] is `"<rootIndex>:<relativePath>"`. Identifiers without a
//! numeric index prefix are treated as paths relative to the first root, which
//! keeps links minted before multi-root support working.

mod error;
mod scan;

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::LibrarySection;

pub use error::{LibraryError, LibraryResult};
pub use scan::{LibraryEntry, ScanFilter};

pub const ID_DELIMITER: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn from_parts(root_index: usize, relative: &str) -> Self {
        Self(format!("{root_index}{ID_DELIMITER}{relative}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VideoId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for VideoId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for VideoId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Address<'a> {
    Indexed { index: usize, relative: &'a str },
    Bare(&'a str),
}

fn parse_address(raw: &str) -> LibraryResult<Address<'_>> {
    if raw.is_empty() {
        return Err(LibraryError::InvalidIdentifier(raw.to_string()));
    }
    match raw.split_once(ID_DELIMITER) {
        Some((prefix, relative)) if prefix.bytes().all(|b| b.is_ascii_digit()) => {
            let index = prefix
                .parse::<usize>()
                .map_err(|_| LibraryError::InvalidIdentifier(raw.to_string()))?;
            if relative.is_empty() {
                return Err(LibraryError::InvalidIdentifier(raw.to_string()));
            }
            Ok(Address::Indexed { index, relative })
        }
        _ => Ok(Address::Bare(raw)),
    }
}

/// Lexically normalizes a root-relative path. Any component that would climb
/// above the root, or an absolute path, is refused.
fn normalize_relative(raw: &str, relative: &str) -> LibraryResult<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(LibraryError::AccessDenied(raw.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(LibraryError::AccessDenied(raw.to_string()));
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(LibraryError::InvalidIdentifier(raw.to_string()));
    }
    Ok(normalized)
}

#[derive(Debug, Clone)]
pub struct MediaLibrary {
    roots: Vec<PathBuf>,
    filter: ScanFilter,
}

impl MediaLibrary {
    pub fn new(roots: Vec<PathBuf>, filter: ScanFilter) -> Self {
        Self { roots, filter }
    }

    pub fn from_section(section: &LibrarySection) -> Self {
        Self::new(section.roots.clone(), ScanFilter::from_section(section))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    /// Display label of a root: its final path component.
    pub fn root_label(&self, index: usize) -> Option<String> {
        self.roots.get(index).map(|root| {
            root.file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| root.display().to_string())
        })
    }

    pub fn address(&self, root_index: usize, relative: &Path) -> LibraryResult<VideoId> {
        if root_index >= self.roots.len() {
            return Err(LibraryError::RootIndexOutOfRange {
                index: root_index,
                roots: self.roots.len(),
            });
        }
        let relative = relative
            .to_str()
            .ok_or_else(|| LibraryError::InvalidIdentifier(relative.display().to_string()))?;
        Ok(VideoId::from_parts(root_index, relative))
    }

    /// Splits an identifier into its root index and relative path without
    /// touching the filesystem.
    pub fn locate<'a>(&self, id: &'a VideoId) -> LibraryResult<(usize, &'a str)> {
        let (index, relative) = match parse_address(id.as_str())? {
            Address::Indexed { index, relative } => (index, relative),
            Address::Bare(relative) => (0, relative),
        };
        if index >= self.roots.len() {
            return Err(LibraryError::RootIndexOutOfRange {
                index,
                roots: self.roots.len(),
            });
        }
        Ok((index, relative))
    }

    /// Rewrites a bare identifier into its `0:<relative>` form so every spelling
    /// of the same video keys the same stats row.
    pub fn canonical_id(&self, id: &VideoId) -> LibraryResult<VideoId> {
        let (index, relative) = self.locate(id)?;
        Ok(VideoId::from_parts(index, relative))
    }

    /// Maps an identifier to the canonical absolute path of an existing file
    /// inside its root.
    ///
    /// The containment check runs on canonicalized paths, so symlinks that
    /// point outside the root are refused with [`LibraryError::AccessDenied`]
    /// just like `..` traversal.
    pub fn resolve(&self, id: &VideoId) -> LibraryResult<PathBuf> {
        let (index, relative) = self.locate(id)?;
        let relative = normalize_relative(id.as_str(), relative)?;
        let root = &self.roots[index];
        let candidate = root.join(&relative);

        let canonical_root = root.canonicalize().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LibraryError::NotFound(candidate.clone())
            } else {
                LibraryError::Io {
                    path: root.clone(),
                    source,
                }
            }
        })?;
        let canonical = candidate.canonicalize().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LibraryError::NotFound(candidate.clone())
            } else {
                LibraryError::Io {
                    path: candidate.clone(),
                    source,
                }
            }
        })?;
        if !canonical.starts_with(&canonical_root) {
            return Err(LibraryError::AccessDenied(id.to_string()));
        }
        if !canonical.is_file() {
            return Err(LibraryError::NotFound(canonical));
        }
        Ok(canonical)
    }

    /// Walks every root and returns the eligible videos, root by root in file
    /// name order.
    pub fn scan(&self) -> Vec<LibraryEntry> {
        self.roots
            .iter()
            .enumerate()
            .flat_map(|(index, root)| scan::walk_root(index, root, &self.filter))
            .collect()
    }
}
