//! Reclaiming workdirs left behind by a crashed or killed process

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{WorkdirManager, WORKDIR_PREFIX};

impl WorkdirManager {
    /// Remove unpublished workdirs under the staging root older than `older_than`
    ///
    /// Only directories carrying [`WORKDIR_PREFIX`] are considered, and
    /// directories currently published by this manager are never touched.
    /// Returns how many directories were removed.
    pub async fn sweep_orphans(&self, older_than: Duration) -> std::io::Result<usize> {
        let mut dir = match tokio::fs::read_dir(self.root()).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let live: HashSet<PathBuf> = self.handles().iter().map(|h| h.path.clone()).collect();
        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(WORKDIR_PREFIX) {
                continue;
            }

            let path = entry.path();
            if live.contains(&path) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(m) if m.is_dir() => m,
                Ok(_) => continue,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < older_than {
                continue;
            }

            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), age_secs = age.as_secs(), "removed orphaned workdir");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove orphaned workdir"),
            }
        }

        if removed > 0 {
            info!(removed, root = %self.root().display(), "reclaimed orphaned workdirs");
        }
        Ok(removed)
    }

    /// Run [`sweep_orphans`](Self::sweep_orphans) every `interval` until `shutdown` fires
    pub fn spawn_reaper(
        &self,
        interval: Duration,
        older_than: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately; startup already swept
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = manager.sweep_orphans(older_than).await {
                            warn!(error = %e, "orphan sweep failed");
                        }
                    }
                }
            }
            debug!("workdir reaper stopped");
        })
    }
}
