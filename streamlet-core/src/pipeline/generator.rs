use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactCache, ArtifactKind};
use crate::config::GenerationSection;
use crate::fingerprint::{fingerprint_file, ContentFingerprint};
use crate::library::{MediaLibrary, VideoId};
use crate::media::{ArtifactRequest, MediaTool, RenderPlan};
use crate::stats::SqliteStatsStore;

use super::{GenerationError, GenerationProgress, GenerationResult, RunTicket};

/// Shortest duration worth seeking into for a still frame.
const MIN_THUMBNAIL_DURATION: f64 = 1.0;
const SEGMENT_SPAN_START: f64 = 0.02;
const SEGMENT_SPAN: f64 = 0.96;

/// Timing knobs for rendering, taken from the `[generation]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub workers: usize,
    pub preview_segments: usize,
    pub segment_seconds: f64,
    pub fallback_clip_seconds: f64,
    pub default_duration_seconds: f64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from_section(&GenerationSection::default())
    }
}

impl GenerationSettings {
    pub fn from_section(section: &GenerationSection) -> Self {
        Self {
            workers: section.worker_count(),
            preview_segments: section.preview_segments.max(1),
            segment_seconds: section.segment_seconds,
            fallback_clip_seconds: section.fallback_clip_seconds,
            default_duration_seconds: section.default_duration_seconds,
        }
    }

    /// Start times of preview segments, evenly spread over 2%..98% of the video.
    pub fn segment_starts(&self, duration: f64) -> Vec<f64> {
        let count = self.preview_segments.max(1);
        (0..count)
            .map(|index| {
                duration * (SEGMENT_SPAN_START + SEGMENT_SPAN * index as f64 / count as f64)
            })
            .collect()
    }

    /// Start of the contiguous fallback clip: the midpoint, or zero when the
    /// midpoint sits within half a clip of the beginning.
    pub fn fallback_start(&self, duration: f64) -> f64 {
        let midpoint = duration / 2.0;
        if midpoint < self.fallback_clip_seconds / 2.0 {
            0.0
        } else {
            midpoint
        }
    }
}

/// How an artifact request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactOrigin {
    /// The recorded hash still points at a file on disk.
    CacheHit,
    /// Another video with the same fingerprint already produced it.
    ContentHit,
    Generated,
}

#[derive(Debug, Clone)]
pub struct ArtifactOutcome {
    pub path: PathBuf,
    pub fingerprint: ContentFingerprint,
    pub origin: ArtifactOrigin,
}

/// Produces thumbnails and previews through the three-tier cache check:
/// recorded hash, then content fingerprint, then the media tool.
pub struct ArtifactGenerator {
    library: MediaLibrary,
    cache: ArtifactCache,
    stats: SqliteStatsStore,
    tool: Arc<dyn MediaTool>,
    settings: GenerationSettings,
    in_flight: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl fmt::Debug for ArtifactGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactGenerator")
            .field("cache", &self.cache)
            .field("settings", &self.settings)
            .finish()
    }
}

impl ArtifactGenerator {
    pub fn new(
        library: MediaLibrary,
        cache: ArtifactCache,
        stats: SqliteStatsStore,
        tool: Arc<dyn MediaTool>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            library,
            cache,
            stats,
            tool,
            settings,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn library(&self) -> &MediaLibrary {
        &self.library
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// Returns the artifact of `kind` for `id`, generating it only when
    /// neither the recorded hash nor the content fingerprint finds one.
    pub async fn ensure_artifact(
        &self,
        id: &VideoId,
        kind: ArtifactKind,
    ) -> GenerationResult<ArtifactOutcome> {
        let (id, source) = self.resolve_source(id).await?;
        let id = &id;

        if let Some(recorded) = self.recorded_hash(id, kind).await? {
            if self.cache.contains(&recorded, kind).await {
                return Ok(ArtifactOutcome {
                    path: self.cache.path_for(&recorded, kind),
                    fingerprint: recorded,
                    origin: ArtifactOrigin::CacheHit,
                });
            }
            debug!(video = %id, %kind, "recorded artifact missing on disk");
        }

        let fingerprint = fingerprint_file(&source)
            .await
            .map_err(|source_err| GenerationError::Fingerprint {
                path: source.clone(),
                source: source_err,
            })?;
        let name = display_name(&source);
        let output = self.cache.path_for(&fingerprint, kind);

        // Identical files arriving together wait here so only one renders.
        let gate = self.gate_for(&fingerprint, kind);
        let _held = gate.lock().await;

        if self.cache.contains(&fingerprint, kind).await {
            self.record_hash(id, name, kind, &fingerprint).await?;
            debug!(video = %id, %kind, %fingerprint, "reusing artifact of identical content");
            return Ok(ArtifactOutcome {
                path: output,
                fingerprint,
                origin: ArtifactOrigin::ContentHit,
            });
        }

        self.cache
            .ensure_dir()
            .await
            .map_err(|source| GenerationError::Io {
                path: self.cache.dir().to_path_buf(),
                source,
            })?;
        let partial = self.cache.partial_path_for(&fingerprint, kind);
        let rendered = match kind {
            ArtifactKind::Thumbnail => self.render_thumbnail(&source, &partial).await,
            ArtifactKind::Preview => self.render_preview(&source, &partial).await,
        };
        if let Err(err) = rendered {
            discard(&partial).await;
            return Err(err);
        }
        if let Err(source) = tokio::fs::rename(&partial, &output).await {
            discard(&partial).await;
            return Err(GenerationError::Io {
                path: output,
                source,
            });
        }
        self.record_hash(id, name, kind, &fingerprint).await?;
        info!(video = %id, %kind, %fingerprint, "artifact generated");
        Ok(ArtifactOutcome {
            path: output,
            fingerprint,
            origin: ArtifactOrigin::Generated,
        })
    }

    /// Runs `ensure_artifact` over `ids` with at most `workers` in flight.
    /// Failures are logged and counted; they never stop the run.
    pub async fn run_batch<F>(
        &self,
        ids: Vec<VideoId>,
        kind: ArtifactKind,
        ticket: &RunTicket,
        mut on_progress: F,
    ) -> GenerationProgress
    where
        F: FnMut(GenerationProgress),
    {
        let total = ids.len();
        on_progress(ticket.set_total(total));
        info!(%kind, total, workers = self.settings.workers, "batch generation started");

        let mut results = stream::iter(ids)
            .map(|id| async move {
                let result = self.ensure_artifact(&id, kind).await;
                (id, result)
            })
            .buffer_unordered(self.settings.workers.max(1));

        while let Some((id, result)) = results.next().await {
            let progress = match result {
                Ok(outcome) => {
                    debug!(video = %id, %kind, origin = ?outcome.origin, "artifact ready");
                    ticket.record(true)
                }
                Err(err) => {
                    warn!(video = %id, %kind, error = %err, "artifact generation failed");
                    ticket.record(false)
                }
            };
            on_progress(progress);
        }

        let progress = ticket.progress();
        info!(
            %kind,
            total = progress.total,
            done = progress.done,
            failed = progress.failed,
            "batch generation finished"
        );
        progress
    }

    /// Normalizes the identifier and resolves its file on the blocking pool;
    /// both touch the filesystem.
    async fn resolve_source(&self, id: &VideoId) -> GenerationResult<(VideoId, PathBuf)> {
        let library = self.library.clone();
        let id = id.clone();
        blocking(move || {
            let canonical = library.canonical_id(&id)?;
            let source = library.resolve(&canonical)?;
            Ok((canonical, source))
        })
        .await
    }

    async fn recorded_hash(
        &self,
        id: &VideoId,
        kind: ArtifactKind,
    ) -> GenerationResult<Option<ContentFingerprint>> {
        let stats = self.stats.clone();
        let id = id.clone();
        blocking(move || Ok(stats.cached_hash(&id, kind)?)).await
    }

    async fn record_hash(
        &self,
        id: &VideoId,
        name: String,
        kind: ArtifactKind,
        fingerprint: &ContentFingerprint,
    ) -> GenerationResult<()> {
        let stats = self.stats.clone();
        let id = id.clone();
        let fingerprint = fingerprint.clone();
        blocking(move || Ok(stats.set_cached_hash(&id, &name, kind, &fingerprint)?)).await
    }

    async fn render(&self, request: &ArtifactRequest) -> GenerationResult<()> {
        debug!(
            path = %request.source.display(),
            plan = request.plan.label(),
            "invoking media tool"
        );
        self.tool.generate_artifact(request).await?;
        Ok(())
    }

    async fn probe_or_default(&self, source: &Path, minimum: f64) -> f64 {
        match self.tool.probe_duration(source).await {
            Ok(duration) if duration >= minimum => duration,
            Ok(duration) => {
                debug!(path = %source.display(), duration, "duration below minimum, using default");
                self.settings.default_duration_seconds
            }
            Err(err) => {
                warn!(path = %source.display(), error = %err, "duration probe failed, using default");
                self.settings.default_duration_seconds
            }
        }
    }

    async fn render_thumbnail(&self, source: &Path, output: &Path) -> GenerationResult<()> {
        let duration = self.probe_or_default(source, MIN_THUMBNAIL_DURATION).await;
        let request = ArtifactRequest::new(source, output, RenderPlan::Still { at: duration / 2.0 });
        self.render(&request).await
    }

    async fn render_preview(&self, source: &Path, output: &Path) -> GenerationResult<()> {
        let duration = self
            .probe_or_default(source, self.settings.fallback_clip_seconds)
            .await;
        let montage = ArtifactRequest::new(
            source,
            output,
            RenderPlan::Montage {
                starts: self.settings.segment_starts(duration),
                segment_seconds: self.settings.segment_seconds,
            },
        );
        match self.render(&montage).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(path = %source.display(), error = %err, "preview montage failed, falling back to single clip");
                discard(output).await;
                let clip = ArtifactRequest::new(
                    source,
                    output,
                    RenderPlan::Clip {
                        start: self.settings.fallback_start(duration),
                        seconds: self.settings.fallback_clip_seconds,
                    },
                );
                self.render(&clip).await
            }
        }
    }

    fn gate_for(&self, fingerprint: &ContentFingerprint, kind: ArtifactKind) -> Arc<AsyncMutex<()>> {
        let key = format!("{kind}:{fingerprint}");
        let mut gates = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        gates.retain(|_, gate| gate.strong_count() > 0);
        if let Some(gate) = gates.get(&key).and_then(Weak::upgrade) {
            return gate;
        }
        let gate = Arc::new(AsyncMutex::new(()));
        gates.insert(key, Arc::downgrade(&gate));
        gate
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Store calls and path canonicalization block, so they leave the async
/// workers of a batch free while they wait on the writer lock or the disk.
async fn blocking<T, F>(task: F) -> GenerationResult<T>
where
    F: FnOnce() -> GenerationResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| GenerationError::Task(err.to_string()))?
}

async fn discard(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %err, "failed to remove partial artifact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_starts_cover_two_to_ninety_eight_percent() {
        let settings = GenerationSettings {
            preview_segments: 4,
            ..GenerationSettings::default()
        };
        let starts = settings.segment_starts(100.0);
        assert_eq!(starts.len(), 4);
        assert!((starts[0] - 2.0).abs() < 1e-9);
        assert!((starts[1] - 26.0).abs() < 1e-9);
        assert!((starts[3] - 74.0).abs() < 1e-9);
        assert!(starts.iter().all(|start| *start < 98.0));
    }

    #[test]
    fn fallback_clip_starts_at_zero_for_short_videos() {
        let settings = GenerationSettings::default();
        assert_eq!(settings.fallback_start(20.0), 0.0);
        assert_eq!(settings.fallback_start(600.0), 300.0);
    }

    #[test]
    fn zero_segments_still_yield_one_start() {
        let settings = GenerationSettings {
            preview_segments: 0,
            ..GenerationSettings::default()
        };
        assert_eq!(settings.segment_starts(10.0).len(), 1);
    }
}
