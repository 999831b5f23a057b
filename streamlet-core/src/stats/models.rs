use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactKind;
use crate::fingerprint::ContentFingerprint;
use crate::library::VideoId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoStats {
    pub path: VideoId,
    pub name: String,
    pub views: i64,
    pub likes: i64,
    pub liked: bool,
    pub last_viewed: Option<DateTime<Utc>>,
    pub hotness: f64,
    pub thumbnail_hash: Option<String>,
    pub preview_hash: Option<String>,
}

impl VideoStats {
    /// Stats of a video nobody has touched yet.
    pub fn empty(path: VideoId) -> Self {
        Self {
            path,
            name: String::new(),
            views: 0,
            likes: 0,
            liked: false,
            last_viewed: None,
            hotness: 0.0,
            thumbnail_hash: None,
            preview_hash: None,
        }
    }

    pub fn cached_hash(&self, kind: ArtifactKind) -> Option<ContentFingerprint> {
        let hash = match kind {
            ArtifactKind::Thumbnail => self.thumbnail_hash.as_deref(),
            ArtifactKind::Preview => self.preview_hash.as_deref(),
        };
        hash.filter(|hash| !hash.is_empty())
            .map(ContentFingerprint::from_hex)
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let last_viewed: Option<NaiveDateTime> = row.get("last_viewed")?;
        let name: Option<String> = row.get("name")?;
        let liked: i64 = row.get("liked")?;
        Ok(Self {
            path: VideoId::new(row.get::<_, String>("path")?),
            name: name.unwrap_or_default(),
            views: row.get("views")?,
            likes: row.get("likes")?,
            liked: liked != 0,
            last_viewed: last_viewed.map(|dt| Utc.from_utc_datetime(&dt)),
            hotness: row.get("hotness")?,
            thumbnail_hash: row.get("thumbnail_hash")?,
            preview_hash: row.get("preview_hash")?,
        })
    }
}

pub(crate) fn hash_column(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Thumbnail => "thumbnail_hash",
        ArtifactKind::Preview => "preview_hash",
    }
}
