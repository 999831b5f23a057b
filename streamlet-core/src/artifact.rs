use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::fingerprint::ContentFingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Thumbnail,
    Preview,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 2] = [ArtifactKind::Thumbnail, ArtifactKind::Preview];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Thumbnail => "thumbnail",
            ArtifactKind::Preview => "preview",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Thumbnail => "jpg",
            ArtifactKind::Preview => "mp4",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::Thumbnail => "image/jpeg",
            ArtifactKind::Preview => "video/mp4",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "thumbnail" | "thumbnails" => Ok(ArtifactKind::Thumbnail),
            "preview" | "previews" => Ok(ArtifactKind::Preview),
            other => Err(format!("unknown artifact kind: {other}")),
        }
    }
}

/// Flat directory of derivative files named `<fingerprint>.<ext>`.
///
/// Artifacts are written under a temporary name and renamed into place, so a
/// file at [`ArtifactCache::path_for`] is always complete.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    pub fn path_for(&self, fingerprint: &ContentFingerprint, kind: ArtifactKind) -> PathBuf {
        self.dir
            .join(format!("{}.{}", fingerprint.as_str(), kind.extension()))
    }

    /// Scratch output path; keeps the real extension so the generator can
    /// infer the container from it.
    pub fn partial_path_for(&self, fingerprint: &ContentFingerprint, kind: ArtifactKind) -> PathBuf {
        self.dir.join(format!(
            ".{}.partial.{}",
            fingerprint.as_str(),
            kind.extension()
        ))
    }

    pub async fn contains(&self, fingerprint: &ContentFingerprint, kind: ArtifactKind) -> bool {
        tokio::fs::metadata(self.path_for(fingerprint, kind))
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_paths_are_content_addressed() {
        let cache = ArtifactCache::new("/var/cache/streamlet");
        let fingerprint = ContentFingerprint::from_hex("abc123");
        assert_eq!(
            cache.path_for(&fingerprint, ArtifactKind::Thumbnail),
            PathBuf::from("/var/cache/streamlet/abc123.jpg")
        );
        assert_eq!(
            cache.path_for(&fingerprint, ArtifactKind::Preview),
            PathBuf::from("/var/cache/streamlet/abc123.mp4")
        );
        assert_eq!(
            cache.partial_path_for(&fingerprint, ArtifactKind::Preview),
            PathBuf::from("/var/cache/streamlet/.abc123.partial.mp4")
        );
    }

    #[test]
    fn kinds_parse_singular_and_plural() {
        assert_eq!("thumbnails".parse::<ArtifactKind>(), Ok(ArtifactKind::Thumbnail));
        assert_eq!("preview".parse::<ArtifactKind>(), Ok(ArtifactKind::Preview));
        assert!("poster".parse::<ArtifactKind>().is_err());
    }
}
