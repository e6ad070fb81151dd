//! Execution stage
//!
//! Runs the compiled artifact or interpreted source with the request's input.

use tracing::{debug, instrument};

use crate::config::{Config, Language};
use crate::runner::ExecuteError;
use crate::sandbox::{ProcessResult, SandboxCommand, Workspace, run_batch};

/// Run the program in `workspace`, feeding `stdin` to it
///
/// Limits are the configured defaults overridden by the language's run
/// limits. A missing artifact is left to the run command to report, so its
/// own diagnostic and exit code reach the caller.
#[instrument(
    skip(workspace, config, language, stdin),
    fields(language = %language.name, workspace = %workspace.id())
)]
pub async fn execute(
    workspace: &Workspace,
    config: &Config,
    language: &Language,
    stdin: &[u8],
) -> Result<ProcessResult, ExecuteError> {
    let limits = config.effective_limits(language.run.limits.as_ref());
    let argv = language.run_command(workspace.path());
    debug!(?argv, "executing program");

    let command = SandboxCommand::new(argv)
        .working_dir(workspace.path())
        .env("PATH", &language.run.path)
        .env("HOME", workspace.path().to_string_lossy())
        .envs(&language.run.env)
        .limits(limits)
        .user(config.sandbox_user);

    let result = run_batch(command, Some(stdin)).await?;

    debug!(
        status = ?result.status,
        wall_time = ?result.wall_time,
        stdout_len = result.stdout.len(),
        stderr_len = result.stderr.len(),
        "execution complete"
    );

    Ok(result)
}
