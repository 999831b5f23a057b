use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactKind;

/// Snapshot of one kind's batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationProgress {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub running: bool,
}

impl GenerationProgress {
    pub fn completed(&self) -> usize {
        self.done + self.failed
    }
}

/// Run state for every artifact kind behind one lock.
///
/// Start, update and finish are each a single critical section, so a reader
/// never sees `running == false` with counters from a half-finished run, and
/// two callers racing to start the same kind cannot both win.
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<ArtifactKind, GenerationProgress>>,
}

impl RunRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ArtifactKind, GenerationProgress>> {
        // Progress is plain counters; a panic mid-update leaves nothing to repair.
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn progress(&self, kind: ArtifactKind) -> GenerationProgress {
        self.lock().get(&kind).copied().unwrap_or_default()
    }

    /// Claims the run slot for `kind`, or returns the active run's progress.
    pub fn try_start(self: &Arc<Self>, kind: ArtifactKind) -> Result<RunTicket, GenerationProgress> {
        let mut runs = self.lock();
        let slot = runs.entry(kind).or_default();
        if slot.running {
            return Err(*slot);
        }
        *slot = GenerationProgress {
            running: true,
            ..GenerationProgress::default()
        };
        Ok(RunTicket {
            registry: Arc::clone(self),
            kind,
        })
    }

    fn update<F>(&self, kind: ArtifactKind, apply: F) -> GenerationProgress
    where
        F: FnOnce(&mut GenerationProgress),
    {
        let mut runs = self.lock();
        let slot = runs.entry(kind).or_default();
        apply(slot);
        *slot
    }
}

/// Exclusive claim on a kind's run slot. Dropping it marks the run finished,
/// including when the owning task panics or is aborted.
#[derive(Debug)]
pub struct RunTicket {
    registry: Arc<RunRegistry>,
    kind: ArtifactKind,
}

impl RunTicket {
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn set_total(&self, total: usize) -> GenerationProgress {
        self.registry.update(self.kind, |progress| progress.total = total)
    }

    pub fn record(&self, succeeded: bool) -> GenerationProgress {
        self.registry.update(self.kind, |progress| {
            if succeeded {
                progress.done += 1;
            } else {
                progress.failed += 1;
            }
        })
    }

    pub fn progress(&self) -> GenerationProgress {
        self.registry.progress(self.kind)
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        self.registry
            .update(self.kind, |progress| progress.running = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_start_of_same_kind_conflicts() {
        let registry = RunRegistry::new();
        let ticket = registry.try_start(ArtifactKind::Thumbnail).unwrap();
        ticket.set_total(3);
        ticket.record(true);

        let conflict = registry.try_start(ArtifactKind::Thumbnail).unwrap_err();
        assert_eq!(
            conflict,
            GenerationProgress {
                total: 3,
                done: 1,
                failed: 0,
                running: true
            }
        );
        // the rejected start must not reset the live counters
        assert_eq!(registry.progress(ArtifactKind::Thumbnail).done, 1);
    }

    #[test]
    fn kinds_run_independently() {
        let registry = RunRegistry::new();
        let _thumbs = registry.try_start(ArtifactKind::Thumbnail).unwrap();
        assert!(registry.try_start(ArtifactKind::Preview).is_ok());
    }

    #[test]
    fn dropping_ticket_finishes_run_and_keeps_totals() {
        let registry = RunRegistry::new();
        {
            let ticket = registry.try_start(ArtifactKind::Preview).unwrap();
            ticket.set_total(2);
            ticket.record(true);
            ticket.record(false);
        }
        let progress = registry.progress(ArtifactKind::Preview);
        assert!(!progress.running);
        assert_eq!(progress.completed(), 2);
        assert_eq!(progress.failed, 1);

        let restarted = registry.try_start(ArtifactKind::Preview).unwrap();
        assert_eq!(restarted.progress().done, 0);
    }
}
