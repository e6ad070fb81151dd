//! Background cleanup of leaked workspaces
//!
//! Workspaces are removed by the request that created them. A process that
//! is killed mid-request cannot do that, so the [`Janitor`] periodically
//! sweeps the workspace root for stale directories. It runs on its own task
//! with explicit start and stop, independent of any request.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, JanitorConfig};
use crate::sandbox::WORKSPACE_PREFIX;

/// Periodic sweeper for stale workspace directories
///
/// Only directories named with the workspace prefix and last modified more
/// than `max_age` ago are removed. `max_age` must exceed the longest request
/// (compile plus run deadlines), or a live workspace could be swept.
#[derive(Debug, Clone)]
pub struct Janitor {
    root: PathBuf,
    interval: Duration,
    max_age: Duration,
}

impl Janitor {
    /// Create a janitor for `root`
    pub fn new(root: impl Into<PathBuf>, config: &JanitorConfig) -> Self {
        Self {
            root: root.into(),
            interval: config.interval(),
            max_age: config.max_age(),
        }
    }

    /// Create a janitor for the configured workspace root
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.workspace_root(), &config.janitor)
    }

    /// Get the swept directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove stale workspaces once, returning how many were removed
    ///
    /// Failures are logged and skipped; a missing root is not an error.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn sweep(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(error = %e, "failed to read workspace root");
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to list workspace root");
                    break;
                }
            };

            if !entry
                .file_name()
                .to_string_lossy()
                .starts_with(WORKSPACE_PREFIX)
            {
                continue;
            }

            // DirEntry metadata does not follow symlinks
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_dir() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "skipping entry");
                    continue;
                }
            };

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age <= self.max_age {
                continue;
            }

            let path = entry.path();
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), ?age, "removed stale workspace");
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove stale workspace");
                }
            }
        }

        if removed > 0 {
            info!(removed, "swept stale workspaces");
        }
        removed
    }

    /// Start sweeping in the background
    ///
    /// The first sweep runs immediately, then one every `interval`.
    pub fn start(self) -> JanitorHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!(root = %self.root.display(), interval = ?self.interval, "janitor started");

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {
                        self.sweep().await;
                    }
                }
            }

            debug!("janitor stopped");
        });

        JanitorHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Handle to a running [`Janitor`]
///
/// Dropping the handle also stops the janitor, but without waiting for an
/// in-progress sweep to finish.
#[derive(Debug)]
pub struct JanitorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    /// Stop the janitor and wait for it to finish
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "janitor task failed");
        }
    }
}

impl Drop for JanitorHandle {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}
