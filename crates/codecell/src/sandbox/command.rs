//! Command builder for sandboxed child processes

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;

use crate::config::SandboxUser;
use crate::sandbox::limits::RlimitSet;
use crate::sandbox::{SandboxError, resolve_command};
use crate::types::ResourceLimits;

/// Builder for a hardened child process
#[derive(Debug, Clone)]
pub struct SandboxCommand {
    /// Program followed by its arguments
    command: Vec<String>,
    /// Working directory, normally the workspace
    working_dir: Option<PathBuf>,
    /// The complete child environment
    env: HashMap<String, String>,
    /// Resource limits
    limits: ResourceLimits,
    /// Identity to switch to before exec
    user: Option<SandboxUser>,
}

impl SandboxCommand {
    /// Create a new command builder
    pub fn new(command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: HashMap::new(),
            limits: ResourceLimits::unlimited(),
            user: None,
        }
    }

    /// Set the working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set several environment variables
    pub fn envs<'a>(mut self, vars: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Set resource limits
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Run as a different user
    pub fn user(mut self, user: Option<SandboxUser>) -> Self {
        self.user = user;
        self
    }

    /// Program name as configured (before PATH resolution)
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or_default()
    }

    /// Get the resource limits
    pub fn resource_limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Wall clock deadline for the child
    pub fn wall_time(&self) -> Result<Option<Duration>, SandboxError> {
        self.limits.wall_time().map_err(SandboxError::InvalidWallTime)
    }

    /// Build the tokio command
    ///
    /// The child gets a cleared environment, its own process group, the
    /// configured identity, `no_new_privs` and its resource limits applied
    /// before exec.
    /// Standard streams are left to the caller.
    pub fn build(self) -> Result<Command, SandboxError> {
        let mut argv = self.command;
        resolve_command(&mut argv)?;

        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]).env_clear().envs(&self.env);

        if let Some(ref dir) = self.working_dir {
            command.current_dir(dir);
        }

        // New process group so a timeout can kill every descendant at once
        command.process_group(0);

        if let Some(user) = self.user {
            command.gid(user.gid).uid(user.uid);
        }

        let rlimits = RlimitSet::from_limits(&self.limits);
        // SAFETY: the hook only issues prctl, getrlimit and setrlimit, which
        // are async-signal-safe, and allocates nothing.
        unsafe {
            command.pre_exec(move || {
                // setuid binaries must not hand privileges back
                #[cfg(target_os = "linux")]
                nix::sys::prctl::set_no_new_privs()?;
                rlimits.apply()
            });
        }

        Ok(command)
    }
}
