//! Request pipeline for codecell
//!
//! [`Runner`] takes an [`ExecutionRequest`] through workspace acquisition,
//! the optional build stage and the execution stage, and folds whatever
//! happens into exactly one [`ExecutionOutcome`].

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument, warn};

pub use crate::runner::compile::{CompileResult, compile};
pub use crate::runner::execute::execute;

mod compile;
mod execute;

use crate::{
    config::{Config, Language},
    sandbox::{ProcessStatus, SandboxError, Workspace, WorkspaceManager},
    types::{ExecutionOutcome, ExecutionRequest, StageResult},
};

/// Errors that occur during compilation
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("language '{0}' does not support compilation")]
    NotCompiled(String),

    #[error("failed to run compiler: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Errors that occur during execution
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("failed to run program: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Errors that end a request before it produces a program result
///
/// Each of these becomes [`ExecutionOutcome::InternalError`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Error while preparing the workspace
    #[error(transparent)]
    Workspace(#[from] SandboxError),

    /// Error during the build stage
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Error during the execution stage
    #[error(transparent)]
    Execute(#[from] ExecuteError),
}

/// High-level runner for code execution
///
/// Cheap to clone; clones share the configuration and the workspace
/// concurrency limit.
#[derive(Debug, Clone)]
pub struct Runner {
    config: Arc<Config>,
    workspaces: WorkspaceManager,
}

impl Runner {
    /// Create a new runner with the given configuration
    pub fn new(config: Config) -> Self {
        let mut workspaces =
            WorkspaceManager::new(config.workspace_root()).with_owner(config.sandbox_user);
        if let Some(max) = config.max_concurrent {
            workspaces = workspaces.with_max_concurrent(max);
        }

        Self {
            config: Arc::new(config),
            workspaces,
        }
    }

    /// Create a new runner with default configuration
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the workspace manager
    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Run `code` written in `language`, feeding it `stdin`
    ///
    /// Never fails: every outcome, including rejected requests and internal
    /// errors, is mapped onto `{stdout, stderr, exit_code}`.
    pub async fn submit(&self, language: &str, code: &str, stdin: &str) -> StageResult {
        self.execute(ExecutionRequest::new(language, code, stdin))
            .await
            .into_result()
    }

    /// Run one request to its outcome
    ///
    /// Unknown languages are rejected before any workspace is created. The
    /// pipeline itself runs on its own task, so a panic inside it is reported
    /// as an internal error and the workspace is still removed. Dropping the
    /// returned future does not cancel the request; it runs to completion in
    /// the background and cleans up after itself.
    #[instrument(skip(self, request), fields(language = %request.language))]
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        if self.config.get_language(&request.language).is_err() {
            debug!("unsupported language");
            return ExecutionOutcome::UnsupportedLanguage(request.language);
        }

        let runner = self.clone();
        let task = tokio::spawn(async move { runner.run_pipeline(request).await });

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "pipeline task failed");
                ExecutionOutcome::InternalError(format!("pipeline task failed: {e}"))
            }
        };

        debug!(outcome = outcome.kind(), "request complete");
        outcome
    }

    /// Acquire a workspace, run both stages in it and release it
    async fn run_pipeline(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let language = match self.config.get_language(&request.language) {
            Ok(language) => language,
            Err(_) => return ExecutionOutcome::UnsupportedLanguage(request.language),
        };

        let workspace = match self.workspaces.acquire().await {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!(error = %e, "failed to acquire workspace");
                return ExecutionOutcome::InternalError(e.to_string());
            }
        };

        let outcome = match self.run_stages(&workspace, language, &request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(workspace = %workspace.id(), error = %e, "request failed");
                ExecutionOutcome::InternalError(e.to_string())
            }
        };

        workspace.release().await;
        outcome
    }

    async fn run_stages(
        &self,
        workspace: &Workspace,
        language: &Language,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome, PipelineError> {
        workspace
            .write_file(language.source_name.as_str(), request.code.as_bytes())
            .await?;

        if language.is_compiled()
            && let CompileResult::Failed { exit_code, stderr } =
                compile(workspace, &self.config, language).await?
        {
            return Ok(ExecutionOutcome::CompileFailure { stderr, exit_code });
        }

        let result = execute(workspace, &self.config, language, request.stdin.as_bytes()).await?;

        Ok(match result.status {
            ProcessStatus::Exited(exit_code) => ExecutionOutcome::Success(StageResult::from_bytes(
                &result.stdout,
                &result.stderr,
                exit_code,
            )),
            ProcessStatus::TimedOut => ExecutionOutcome::Timeout,
        })
    }
}
