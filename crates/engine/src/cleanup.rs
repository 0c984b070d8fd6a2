// SPDX-License-Identifier: MIT

//! Periodic eviction of aged artifacts and dangling records (spec.md §4.6).
//! Runs outside the scheduler's critical path: filesystem errors are
//! swallowed per-file so one bad stat doesn't abort the sweep.

use crate::photo_store::PhotoStore;
use crate::scheduler::Scheduler;
use rst_adapters::ArtifactStore;
use rst_core::Clock;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct CleanupSweeper<C: Clock> {
    scheduler: Scheduler<C>,
    photos: Arc<parking_lot::Mutex<PhotoStore>>,
    interval: Duration,
    max_age: Duration,
}

impl<C: Clock> CleanupSweeper<C> {
    pub fn new(
        scheduler: Scheduler<C>,
        photos: Arc<parking_lot::Mutex<PhotoStore>>,
        interval: Duration,
        max_age: Duration,
    ) -> Self {
        Self {
            scheduler,
            photos,
            interval,
            max_age,
        }
    }

    /// Run the sweep loop forever. Intended to be spawned as its own
    /// `tokio` task by the daemon.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.sweep();
        }
    }

    /// One sweep pass, exposed separately so tests can drive it without
    /// waiting on the real interval.
    pub fn sweep(&self) {
        // Derived from the scheduler's `Clock` rather than `SystemTime::now()`
        // directly, so age cutoffs move with `FakeClock::advance` in tests.
        let now = UNIX_EPOCH + Duration::from_millis(self.scheduler.clock().epoch_ms());
        let artifacts = self.scheduler.artifacts();
        let deleted_uploads = sweep_dir(artifacts.uploads_dir(), self.max_age, now);
        let deleted_results = sweep_dir(artifacts.results_dir(), self.max_age, now);

        let pruned_photos = self.photos.lock().prune_missing(artifacts);
        let pruned_jobs = self.scheduler.prune_jobs_with_missing_result();

        tracing::info!(
            deleted_uploads,
            deleted_results,
            pruned_photos,
            pruned_jobs,
            "cleanup sweep complete"
        );
    }
}

/// Delete every file under `dir` older than `max_age` by mtime, ignoring
/// marker files like `.gitkeep`. Returns the number deleted. `now` is the
/// cutoff reference point, supplied by the caller rather than read here, so
/// it can be Clock-governed.
fn sweep_dir(dir: &Path, max_age: Duration, now: SystemTime) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(?err, dir = %dir.display(), "cleanup: failed to read directory");
            return 0;
        }
    };

    let mut deleted = 0;
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false)
        {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!(?err, path = %path.display(), "cleanup: failed to stat file");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        let age = match metadata.modified().and_then(|m| now.duration_since(m).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))) {
            Ok(age) => age,
            Err(err) => {
                tracing::warn!(?err, path = %path.display(), "cleanup: failed to read mtime");
                continue;
            }
        };
        if age <= max_age {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => deleted += 1,
            Err(err) => tracing::warn!(?err, path = %path.display(), "cleanup: failed to delete file"),
        }
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StageRegistry;
    use rst_adapters::FakeInvoker;
    use rst_core::FakeClock;
    use std::time::Duration as StdDuration;

    fn scheduler() -> (Scheduler<FakeClock>, FakeClock, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let artifacts =
            ArtifactStore::new(dir.path().join("uploads"), dir.path().join("results")).unwrap();
        let clock = FakeClock::new();
        // Seed to the real wall-clock epoch: file mtimes below come from the
        // real filesystem, so the cutoff needs to start on the same scale
        // before tests move it forward with `advance`.
        let real_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        clock.advance(StdDuration::from_millis(real_epoch_ms));
        let scheduler = Scheduler::new(
            StageRegistry::new(),
            artifacts,
            Arc::new(FakeInvoker::new()),
            clock.clone(),
            2,
            4,
            StdDuration::from_secs(10),
        );
        (scheduler, clock, dir)
    }

    #[test]
    fn sweep_keeps_files_younger_than_max_age() {
        let (scheduler, _clock, _dir) = scheduler();
        let fresh = scheduler.artifacts().uploads_dir().join("fresh.png");
        std::fs::write(&fresh, b"fresh").unwrap();

        let photos = Arc::new(parking_lot::Mutex::new(PhotoStore::new()));
        let sweeper = CleanupSweeper::new(
            scheduler,
            photos,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );
        sweeper.sweep();

        assert!(fresh.exists());
    }

    #[test]
    fn sweep_deletes_files_older_than_max_age() {
        let (scheduler, clock, _dir) = scheduler();
        let stale = scheduler.artifacts().uploads_dir().join("stale.png");
        std::fs::write(&stale, b"stale").unwrap();
        clock.advance(Duration::from_millis(20));

        let photos = Arc::new(parking_lot::Mutex::new(PhotoStore::new()));
        let sweeper = CleanupSweeper::new(
            scheduler,
            photos,
            Duration::from_secs(3600),
            Duration::from_millis(1),
        );
        sweeper.sweep();

        assert!(!stale.exists());
    }

    #[test]
    fn sweep_ignores_dotfiles() {
        let (scheduler, _clock, _dir) = scheduler();
        let marker = scheduler.artifacts().uploads_dir().join(".gitkeep");
        std::fs::write(&marker, b"").unwrap();

        let photos = Arc::new(parking_lot::Mutex::new(PhotoStore::new()));
        let sweeper = CleanupSweeper::new(scheduler, photos, Duration::from_secs(3600), Duration::from_secs(0));
        sweeper.sweep();

        assert!(marker.exists());
    }
}
