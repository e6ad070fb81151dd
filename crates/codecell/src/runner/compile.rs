//! Build stage
//!
//! Runs a language's compiler inside the request's workspace.

use tracing::{debug, instrument};

use crate::config::language::DEFAULT_SANDBOX_PATH;
use crate::config::{Config, Language};
use crate::runner::CompileError;
use crate::sandbox::{ProcessStatus, SandboxCommand, Workspace, run_batch};
use crate::types::{COMPILE_TIMEOUT_MESSAGE, ResourceLimits, TIMEOUT_EXIT_CODE};

/// Result of a compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileResult {
    /// The compiler exited with code 0
    Compiled,

    /// The compiler exited non-zero or ran past its deadline
    Failed { exit_code: i32, stderr: String },
}

impl CompileResult {
    /// Check if compilation was successful
    pub fn is_success(&self) -> bool {
        matches!(self, CompileResult::Compiled)
    }
}

/// Default compilation limits
fn default_compile_limits() -> ResourceLimits {
    ResourceLimits {
        time_limit: Some(60.0),      // CPU seconds
        wall_time_limit: Some(30.0), // 30 seconds wall time
        max_output: Some(65536),     // 64 MB output
        max_open_files: Some(256),
        ..ResourceLimits::unlimited()
    }
}

/// Compile the source already written to `workspace`
///
/// The compiler gets no stdin and its stdout is discarded. A non-zero exit
/// becomes [`CompileResult::Failed`] carrying the compiler's stderr; running
/// past the wall clock limit is reported the same way with exit code 124.
#[instrument(
    skip(workspace, config, language),
    fields(language = %language.name, workspace = %workspace.id())
)]
pub async fn compile(
    workspace: &Workspace,
    config: &Config,
    language: &Language,
) -> Result<CompileResult, CompileError> {
    let compile_config = language
        .compile
        .as_ref()
        .ok_or_else(|| CompileError::NotCompiled(language.name.clone()))?;

    let limits = match compile_config.limits {
        Some(ref lang) => default_compile_limits().with_overrides(lang),
        None => default_compile_limits(),
    };

    let argv = Language::expand_command(
        &compile_config.command,
        language.source_name.as_str(),
        &compile_config.output_name,
        workspace.path(),
    );
    debug!(?argv, "compiling");

    let command = SandboxCommand::new(argv)
        .working_dir(workspace.path())
        .env("PATH", DEFAULT_SANDBOX_PATH)
        .env("HOME", workspace.path().to_string_lossy())
        .envs(&compile_config.env)
        .limits(limits)
        .user(config.sandbox_user);

    let result = run_batch(command, None).await?;

    let compiled = match result.status {
        ProcessStatus::Exited(0) => CompileResult::Compiled,
        ProcessStatus::Exited(exit_code) => CompileResult::Failed {
            exit_code,
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
        },
        ProcessStatus::TimedOut => CompileResult::Failed {
            exit_code: TIMEOUT_EXIT_CODE,
            stderr: COMPILE_TIMEOUT_MESSAGE.to_string(),
        },
    };

    debug!(
        success = compiled.is_success(),
        status = ?result.status,
        wall_time = ?result.wall_time,
        "compilation complete"
    );

    Ok(compiled)
}
