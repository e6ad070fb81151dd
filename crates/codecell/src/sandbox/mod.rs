//! Workspace and child-process plumbing
//!
//! This module owns everything that touches the host: per-request workspace
//! directories, building hardened child commands, and running them with a
//! deadline while capturing their output.
//!
//! Children run in their own process group with resource limits applied
//! before exec, a cleared environment and optionally an unprivileged uid/gid.
//! Unix only.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use crate::sandbox::command::SandboxCommand;
pub use crate::sandbox::process::{ProcessResult, ProcessStatus, run_batch};
pub use crate::sandbox::workspace::{WORKSPACE_PREFIX, Workspace, WorkspaceManager};

mod command;
mod limits;
mod process;
mod reaper;
mod workspace;

/// Errors that occur while preparing or running a child process
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create workspace at {path}: {source}")]
    WorkspaceCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to hand workspace to sandbox user: {0}")]
    WorkspaceOwner(#[source] nix::Error),

    #[error("workspace manager is closed")]
    ManagerClosed,

    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{0}' not found in PATH")]
    CommandNotFound(String),

    #[error("empty command")]
    EmptyCommand,

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid wall time limit: {0}")]
    InvalidWallTime(f64),

    #[error("output capture failed: {0}")]
    Capture(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve the program in a command to a path using the host's PATH.
///
/// Children run with a cleared environment and a narrow PATH, so bare command
/// names (like `g++`) are looked up against the service's own PATH before
/// launch. A missing toolchain then surfaces here instead of as an opaque
/// spawn failure.
///
/// Commands that already contain a `/` (like `/tmp/ws/main`) are left
/// unchanged.
pub fn resolve_command(command: &mut [String]) -> Result<(), SandboxError> {
    let first = match command.first_mut() {
        Some(first) => first,
        None => return Err(SandboxError::EmptyCommand),
    };

    // Already an absolute or relative path
    if first.contains('/') {
        return Ok(());
    }

    let path_var = std::env::var("PATH").unwrap_or_default();
    for dir in path_var.split(':').filter(|dir| !dir.is_empty()) {
        let candidate = Path::new(dir).join(&*first);
        if candidate.is_file() {
            *first = candidate.to_string_lossy().into_owned();
            return Ok(());
        }
    }

    Err(SandboxError::CommandNotFound(first.clone()))
}
