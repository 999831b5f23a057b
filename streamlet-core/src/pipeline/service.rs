use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::artifact::ArtifactKind;
use crate::library::{LibraryEntry, VideoId};

use super::{
    ArtifactGenerator, ArtifactOutcome, GenerationError, GenerationProgress, GenerationResult,
    RunRegistry, RunTicket,
};

/// Owns batch runs and their task handles.
///
/// Every background run is a [`JoinHandle`] kept here until [`join`] collects
/// it, so shutdown and tests can wait for runs instead of racing them.
///
/// [`join`]: GenerationService::join
#[derive(Debug)]
pub struct GenerationService {
    generator: Arc<ArtifactGenerator>,
    runs: Arc<RunRegistry>,
    tasks: Mutex<Vec<(ArtifactKind, JoinHandle<GenerationProgress>)>>,
}

impl GenerationService {
    pub fn new(generator: Arc<ArtifactGenerator>) -> Self {
        Self {
            generator,
            runs: RunRegistry::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn generator(&self) -> &Arc<ArtifactGenerator> {
        &self.generator
    }

    pub fn status(&self, kind: ArtifactKind) -> GenerationProgress {
        self.runs.progress(kind)
    }

    /// On-demand generation for a single video, awaited by the caller.
    pub async fn ensure(&self, id: &VideoId, kind: ArtifactKind) -> GenerationResult<ArtifactOutcome> {
        self.generator.ensure_artifact(id, kind).await
    }

    /// Starts a background batch run over the whole library.
    ///
    /// Fails with [`GenerationError::Conflict`] carrying the live progress when
    /// a run of the same kind is active; the active run is left untouched.
    pub fn start(&self, kind: ArtifactKind) -> GenerationResult<GenerationProgress> {
        let ticket = self.claim(kind)?;
        let started = ticket.progress();
        let generator = Arc::clone(&self.generator);
        let handle = tokio::spawn(async move { execute_run(generator, ticket).await });

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|(_, handle)| !handle.is_finished());
        tasks.push((kind, handle));
        Ok(started)
    }

    /// Runs a batch on the current task and returns its final progress.
    pub async fn run(&self, kind: ArtifactKind) -> GenerationResult<GenerationProgress> {
        let ticket = self.claim(kind)?;
        Ok(execute_run(Arc::clone(&self.generator), ticket).await)
    }

    /// Waits for every background run started so far.
    pub async fn join(&self) -> Vec<(ArtifactKind, GenerationProgress)> {
        let handles = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *tasks)
        };
        let mut finished = Vec::with_capacity(handles.len());
        for (kind, handle) in handles {
            match handle.await {
                Ok(progress) => finished.push((kind, progress)),
                Err(err) => error!(%kind, error = %err, "generation task ended abnormally"),
            }
        }
        finished
    }

    fn claim(&self, kind: ArtifactKind) -> GenerationResult<RunTicket> {
        self.runs
            .try_start(kind)
            .map_err(|progress| GenerationError::Conflict { kind, progress })
    }
}

async fn execute_run(generator: Arc<ArtifactGenerator>, ticket: RunTicket) -> GenerationProgress {
    let kind = ticket.kind();
    let library = generator.library().clone();
    let entries = match tokio::task::spawn_blocking(move || library.scan()).await {
        Ok(entries) => entries,
        Err(err) => {
            error!(%kind, error = %err, "library scan failed");
            return ticket.progress();
        }
    };
    let ids = entries
        .into_iter()
        .map(|entry: LibraryEntry| entry.id)
        .collect::<Vec<_>>();
    info!(%kind, videos = ids.len(), "library scanned for generation");

    generator
        .run_batch(ids, kind, &ticket, |progress| {
            debug!(
                %kind,
                total = progress.total,
                done = progress.done,
                failed = progress.failed,
                "generation progress"
            );
        })
        .await
}
