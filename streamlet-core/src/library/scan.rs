use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{LibrarySection, DEFAULT_MIN_SIZE_BYTES};

use super::VideoId;

/// Eligibility rules shared by the listing and the batch generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    extension: String,
    hidden_prefix: String,
    min_size_bytes: u64,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self::new("mp4", "._", DEFAULT_MIN_SIZE_BYTES)
    }
}

impl ScanFilter {
    pub fn new(extension: &str, hidden_prefix: &str, min_size_bytes: u64) -> Self {
        Self {
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
            hidden_prefix: hidden_prefix.to_string(),
            min_size_bytes,
        }
    }

    pub fn from_section(section: &LibrarySection) -> Self {
        Self::new(
            &section.extension,
            &section.hidden_prefix,
            section.min_size_bytes,
        )
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn min_size_bytes(&self) -> u64 {
        self.min_size_bytes
    }

    pub fn accepts(&self, file_name: &str, size: u64) -> bool {
        if !self.hidden_prefix.is_empty() && file_name.starts_with(&self.hidden_prefix) {
            return false;
        }
        let matches_extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false);
        matches_extension && size >= self.min_size_bytes
    }
}

/// One eligible video found by the filtered walk.
#[derive(Debug, Clone)]
pub struct LibraryEntry {
    pub id: VideoId,
    pub root_index: usize,
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

pub(super) fn walk_root(root_index: usize, root: &Path, filter: &ScanFilter) -> Vec<LibraryEntry> {
    let mut entries = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();
    for item in walker {
        let entry = match item {
            Ok(entry) => entry,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "skipping unreadable library entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            debug!(path = %entry.path().display(), "skipping non utf-8 file name");
            continue;
        };
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!(path = %entry.path().display(), error = %err, "skipping file without metadata");
                continue;
            }
        };
        if !filter.accepts(name, metadata.len()) {
            continue;
        }
        let Some(relative) = entry
            .path()
            .strip_prefix(root)
            .ok()
            .and_then(|relative| relative.to_str())
        else {
            debug!(path = %entry.path().display(), "skipping path outside root or non utf-8");
            continue;
        };
        entries.push(LibraryEntry {
            id: VideoId::from_parts(root_index, relative),
            root_index,
            path: entry.path().to_path_buf(),
            name: name.to_string(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_extension_case_insensitively() {
        let filter = ScanFilter::new("mp4", "._", 10);
        assert!(filter.accepts("movie.mp4", 10));
        assert!(filter.accepts("MOVIE.MP4", 11));
        assert!(!filter.accepts("movie.mkv", 100));
        assert!(!filter.accepts("mp4", 100));
    }

    #[test]
    fn filter_rejects_companion_files_and_small_files() {
        let filter = ScanFilter::new(".mp4", "._", 10);
        assert!(!filter.accepts("._movie.mp4", 100));
        assert!(!filter.accepts("movie.mp4", 9));
    }

    #[test]
    fn default_filter_uses_ten_mebibyte_floor() {
        let filter = ScanFilter::default();
        assert_eq!(filter.min_size_bytes(), 10 * 1024 * 1024);
        assert_eq!(filter.extension(), "mp4");
    }
}
