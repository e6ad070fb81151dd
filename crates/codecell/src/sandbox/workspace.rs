//! Workspace lifecycle management
//!
//! Creates one uniquely named directory per request and guarantees that it is
//! removed again, whichever way the request ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::unistd::{Gid, Uid, chown};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::SandboxUser;
use crate::sandbox::SandboxError;

/// Name prefix of every workspace directory
pub const WORKSPACE_PREFIX: &str = "codecell-";

/// A per-request workspace directory
///
/// The directory is exclusively owned by one request and named after a fresh
/// random UUID.
///
/// # Cleanup
///
/// Call [`release()`](Self::release) when the request is done. It never fails
/// and tolerates a directory that is already partly or fully gone. If the
/// workspace is dropped without being released (a panic or a cancelled
/// request), `Drop` removes the directory synchronously.
#[derive(Debug)]
pub struct Workspace {
    /// Random identifier, also part of the directory name
    id: Uuid,

    /// Absolute path to the workspace directory
    path: PathBuf,

    /// Whether release() already ran
    released: bool,

    /// Concurrency permit (if the manager is bounded)
    _permit: Option<OwnedSemaphorePermit>,
}

impl Workspace {
    /// Create a new workspace directory under `root`
    #[instrument(skip(owner))]
    pub async fn create(root: &Path, owner: Option<SandboxUser>) -> Result<Self, SandboxError> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|source| SandboxError::WorkspaceCreate {
                path: root.to_path_buf(),
                source,
            })?;

        let id = Uuid::new_v4();
        let path = root.join(format!("{WORKSPACE_PREFIX}{}", id.simple()));

        // create_dir (not create_dir_all) so an existing directory is an error
        let mut builder = tokio::fs::DirBuilder::new();
        builder.mode(0o700);
        builder
            .create(&path)
            .await
            .map_err(|source| SandboxError::WorkspaceCreate {
                path: path.clone(),
                source,
            })?;

        let workspace = Self {
            id,
            path,
            released: false,
            _permit: None,
        };

        if let Some(user) = owner {
            // On failure the workspace is dropped and its directory removed
            chown(
                &workspace.path,
                Some(Uid::from_raw(user.uid)),
                Some(Gid::from_raw(user.gid)),
            )
            .map_err(SandboxError::WorkspaceOwner)?;
        }

        debug!(path = %workspace.path.display(), "workspace created");
        Ok(workspace)
    }

    /// Get the workspace ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get the path to the workspace directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the path to a file inside the workspace
    ///
    /// Returns an error if the name would escape the workspace.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, SandboxError> {
        if name.is_empty() || name.contains("..") || name.starts_with('/') {
            return Err(SandboxError::InvalidPath(format!(
                "path traversal not allowed: {name}"
            )));
        }
        Ok(self.path.join(name))
    }

    /// Write a file into the workspace
    #[instrument(skip(self, content), fields(workspace = %self.id))]
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<(), SandboxError> {
        let path = self.file_path(name)?;
        tokio::fs::write(&path, content).await?;
        debug!(?path, len = content.len(), "wrote file to workspace");
        Ok(())
    }

    /// Read a file from the workspace
    pub async fn read_file(&self, name: &str) -> Result<Vec<u8>, SandboxError> {
        let path = self.file_path(name)?;
        Ok(tokio::fs::read(&path).await?)
    }

    /// Check if a file exists in the workspace
    pub async fn file_exists(&self, name: &str) -> Result<bool, SandboxError> {
        let path = self.file_path(name)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    /// Remove the workspace directory
    ///
    /// Best effort: a missing directory is fine, other failures are logged.
    #[instrument(skip(self), fields(workspace = %self.id))]
    pub async fn release(mut self) {
        self.released = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!("workspace released"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("workspace already gone");
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove workspace");
            }
        }
    }

    /// Attach a concurrency permit to this workspace
    pub(crate) fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self._permit = Some(permit);
        self
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!(
            workspace = %self.id,
            path = %self.path.display(),
            "workspace dropped without release, removing synchronously"
        );

        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove workspace");
            }
        }
    }
}

/// Hands out workspaces under a common root
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    /// Directory workspaces are created in
    root: PathBuf,

    /// Identity that workspaces are handed to
    owner: Option<SandboxUser>,

    /// Semaphore limiting live workspaces (None if unbounded)
    semaphore: Option<Arc<Semaphore>>,
}

impl WorkspaceManager {
    /// Create a new workspace manager
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            owner: None,
            semaphore: None,
        }
    }

    /// Limit the number of workspaces alive at once
    pub fn with_max_concurrent(mut self, count: usize) -> Self {
        self.semaphore = Some(Arc::new(Semaphore::new(count.max(1))));
        self
    }

    /// Hand every workspace to `owner`
    pub fn with_owner(mut self, owner: Option<SandboxUser>) -> Self {
        self.owner = owner;
        self
    }

    /// Get the workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire a fresh workspace
    ///
    /// Waits for a free slot when the manager is bounded.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<Workspace, SandboxError> {
        let permit = match self.semaphore {
            Some(ref semaphore) => Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| SandboxError::ManagerClosed)?,
            ),
            None => None,
        };

        let workspace = Workspace::create(&self.root, self.owner).await?;

        Ok(match permit {
            Some(permit) => workspace.with_permit(permit),
            None => workspace,
        })
    }

    /// Get the number of free slots, if bounded
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }
}
