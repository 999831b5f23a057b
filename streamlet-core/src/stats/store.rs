use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::artifact::ArtifactKind;
use crate::fingerprint::ContentFingerprint;
use crate::library::VideoId;
use crate::sqlite::{configure_connection, configure_read_connection};

use super::hotness::hotness;
use super::models::{hash_column, VideoStats};
use super::{StatsError, StatsResult};

const STATS_SCHEMA: &str = include_str!("../../../sql/stats.sql");

/// Columns added after the first schema revision, applied to older files.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("thumbnail_hash", "TEXT"),
    ("preview_hash", "TEXT"),
    ("created_at", "DATETIME"),
    ("updated_at", "DATETIME"),
];

#[derive(Debug, Clone)]
pub struct SqliteStatsStoreBuilder {
    path: Option<PathBuf>,
    create_if_missing: bool,
}

impl Default for SqliteStatsStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
        }
    }
}

impl SqliteStatsStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Opens the single writer connection. Readers open their own short-lived
    /// read-only connections on demand.
    pub fn build(self) -> StatsResult<SqliteStatsStore> {
        let path = self.path.ok_or(StatsError::MissingStore)?;
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE;
        if self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|source| StatsError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
            }
        }
        let conn = Connection::open_with_flags(&path, flags).map_err(|source| {
            StatsError::OpenDatabase {
                path: path.clone(),
                source,
            }
        })?;
        configure_connection(&conn).map_err(|source| StatsError::OpenDatabase {
            path: path.clone(),
            source,
        })?;
        Ok(SqliteStatsStore {
            path,
            writer: Arc::new(Mutex::new(conn)),
        })
    }
}

/// Per-video engagement counters and cached artifact hashes.
///
/// Every mutation runs as one immediate transaction on the shared writer
/// connection, so concurrent views and likes on the same video never lose
/// updates and `hotness` is never observed out of step with its inputs.
#[derive(Debug, Clone)]
pub struct SqliteStatsStore {
    path: PathBuf,
    writer: Arc<Mutex<Connection>>,
}

impl SqliteStatsStore {
    pub fn builder() -> SqliteStatsStoreBuilder {
        SqliteStatsStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StatsResult<Self> {
        SqliteStatsStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> StatsResult<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|_| StatsError::Poisoned)
    }

    fn reader(&self) -> StatsResult<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| StatsError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        configure_read_connection(&conn).map_err(|source| StatsError::OpenDatabase {
            path: self.path.clone(),
            source,
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StatsResult<()> {
        let conn = self.writer()?;
        conn.execute_batch(STATS_SCHEMA)?;
        for (column, declaration) in ADDITIVE_COLUMNS {
            ensure_column(&conn, "video_stats", column, declaration)?;
        }
        Ok(())
    }

    /// Current stats; a video without a row reports zeroed counters.
    pub fn stats(&self, id: &VideoId) -> StatsResult<VideoStats> {
        let conn = self.reader()?;
        let stats = conn
            .query_row(
                "SELECT * FROM video_stats WHERE path = ?1",
                [id.as_str()],
                VideoStats::from_row,
            )
            .optional()?;
        Ok(stats.unwrap_or_else(|| VideoStats::empty(id.clone())))
    }

    pub fn all_stats(&self) -> StatsResult<HashMap<VideoId, VideoStats>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare("SELECT * FROM video_stats")?;
        let rows = stmt
            .query_map([], VideoStats::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|stats| (stats.path.clone(), stats))
            .collect())
    }

    pub fn top_by_hotness(&self, limit: usize) -> StatsResult<Vec<VideoStats>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM video_stats
             ORDER BY hotness DESC, views DESC, path ASC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], VideoStats::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn record_view(&self, id: &VideoId, name: &str) -> StatsResult<VideoStats> {
        self.record_view_at(id, name, Utc::now())
    }

    pub fn record_view_at(
        &self,
        id: &VideoId,
        name: &str,
        now: DateTime<Utc>,
    ) -> StatsResult<VideoStats> {
        let mut conn = self.writer()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stamp = now.naive_utc();
        tx.execute(
            "INSERT INTO video_stats (path, name, views, last_viewed, created_at, updated_at)
             VALUES (?1, ?2, 1, ?3, ?3, ?3)
             ON CONFLICT(path) DO UPDATE SET
                views = views + 1,
                name = COALESCE(NULLIF(excluded.name, ''), name),
                last_viewed = excluded.last_viewed,
                updated_at = excluded.updated_at",
            params![id.as_str(), name, stamp],
        )?;
        refresh_hotness(&tx, id, now)?;
        let stats = tx.query_row(
            "SELECT * FROM video_stats WHERE path = ?1",
            [id.as_str()],
            VideoStats::from_row,
        )?;
        tx.commit()?;
        debug!(video = %id, views = stats.views, hotness = stats.hotness, "view recorded");
        Ok(stats)
    }

    /// Flips the like flag and returns the new state.
    pub fn toggle_like(&self, id: &VideoId, name: &str) -> StatsResult<bool> {
        self.toggle_like_at(id, name, Utc::now())
    }

    pub fn toggle_like_at(&self, id: &VideoId, name: &str, now: DateTime<Utc>) -> StatsResult<bool> {
        let mut conn = self.writer()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let liked: bool = tx
            .query_row(
                "SELECT liked FROM video_stats WHERE path = ?1",
                [id.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(|value| value != 0)
            .unwrap_or(false);
        let now_liked = !liked;
        let delta: i64 = if now_liked { 1 } else { -1 };
        let stamp = now.naive_utc();
        // Counts never drop below zero even if the flag and counter drifted.
        tx.execute(
            "INSERT INTO video_stats (path, name, likes, liked, created_at, updated_at)
             VALUES (?1, ?2, MAX(?3, 0), ?4, ?5, ?5)
             ON CONFLICT(path) DO UPDATE SET
                likes = MAX(likes + ?3, 0),
                liked = excluded.liked,
                name = COALESCE(NULLIF(excluded.name, ''), name),
                updated_at = excluded.updated_at",
            params![id.as_str(), name, delta, now_liked as i64, stamp],
        )?;
        refresh_hotness(&tx, id, now)?;
        tx.commit()?;
        debug!(video = %id, liked = now_liked, "like toggled");
        Ok(now_liked)
    }

    pub fn cached_hash(
        &self,
        id: &VideoId,
        kind: ArtifactKind,
    ) -> StatsResult<Option<ContentFingerprint>> {
        let conn = self.reader()?;
        let sql = format!(
            "SELECT {} FROM video_stats WHERE path = ?1",
            hash_column(kind)
        );
        let hash: Option<Option<String>> = conn
            .query_row(&sql, [id.as_str()], |row| row.get(0))
            .optional()?;
        Ok(hash
            .flatten()
            .filter(|hash| !hash.is_empty())
            .map(ContentFingerprint::from_hex))
    }

    /// Records the fingerprint of the artifact of `kind` for `id`. Counters and
    /// the other kind's hash are left untouched.
    pub fn set_cached_hash(
        &self,
        id: &VideoId,
        name: &str,
        kind: ArtifactKind,
        hash: &ContentFingerprint,
    ) -> StatsResult<()> {
        let conn = self.writer()?;
        let column = hash_column(kind);
        let sql = format!(
            "INSERT INTO video_stats (path, name, {column}, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(path) DO UPDATE SET
                {column} = excluded.{column},
                name = COALESCE(NULLIF(excluded.name, ''), name),
                updated_at = excluded.updated_at"
        );
        conn.execute(
            &sql,
            params![id.as_str(), name, hash.as_str(), Utc::now().naive_utc()],
        )?;
        Ok(())
    }
}

fn refresh_hotness(tx: &Transaction<'_>, id: &VideoId, now: DateTime<Utc>) -> StatsResult<()> {
    let (views, likes, last_viewed): (i64, i64, Option<NaiveDateTime>) = tx.query_row(
        "SELECT views, likes, last_viewed FROM video_stats WHERE path = ?1",
        [id.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    let last_viewed = last_viewed.map(|dt| Utc.from_utc_datetime(&dt));
    let score = hotness(views, likes, last_viewed, now);
    tx.execute(
        "UPDATE video_stats SET hotness = ?2 WHERE path = ?1",
        params![id.as_str(), score],
    )?;
    Ok(())
}

fn ensure_column(
    conn: &Connection,
    table: &str,
    column: &str,
    declaration: &str,
) -> StatsResult<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>("name"))?
        .collect::<Result<Vec<_>, _>>()?
        .iter()
        .any(|name| name == column);
    if !exists {
        conn.execute_batch(&format!(
            "ALTER TABLE {table} ADD COLUMN {column} {declaration};"
        ))?;
        info!(table, column, "added missing column");
    }
    Ok(())
}
