//! Process spawning and I/O
//!
//! Runs a [`SandboxCommand`] to completion or to its deadline, feeding stdin
//! and capturing stdout and stderr.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::sandbox::SandboxError;
use crate::sandbox::command::SandboxCommand;
use crate::sandbox::reaper;

/// How long to wait for the output pipes to drain after the child exits
const CAPTURE_GRACE: Duration = Duration::from_secs(1);

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Exited on its own; signal deaths are reported as `128 + signal`
    Exited(i32),

    /// Killed after running past its wall clock limit
    TimedOut,
}

/// Result of running a child process
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub status: ProcessStatus,

    /// Captured standard output (empty on timeout)
    pub stdout: Vec<u8>,

    /// Captured standard error (empty on timeout)
    pub stderr: Vec<u8>,

    /// Wall clock time from spawn to exit or kill
    pub wall_time: Duration,
}

impl ProcessResult {
    /// Check if the process was killed for running too long
    pub fn timed_out(&self) -> bool {
        matches!(self.status, ProcessStatus::TimedOut)
    }

    /// Exit code, if the process exited on its own
    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            ProcessStatus::Exited(code) => Some(code),
            ProcessStatus::TimedOut => None,
        }
    }
}

/// Run a command with batch I/O
///
/// `stdin_data` is written to the child's stdin, which is then closed; with
/// `None` the child gets `/dev/null`. Output beyond the command's
/// `max_output` is drained and discarded.
///
/// When the wall clock limit passes, the child's whole process group is
/// killed and the captured output is dropped. After a normal exit the group
/// is killed as well so no background descendant outlives the call. Either
/// way, descendants that moved to another group or session are then killed
/// by the escaped process sweep.
#[instrument(skip(command, stdin_data), fields(program = %command.program()))]
pub async fn run_batch(
    command: SandboxCommand,
    stdin_data: Option<&[u8]>,
) -> Result<ProcessResult, SandboxError> {
    let deadline = command.wall_time()?;
    let output_cap = command.resource_limits().output_cap();
    let program = command.program().to_owned();

    let mut cmd = command.build()?;
    cmd.stdin(if stdin_data.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let started = Instant::now();
    let (mut child, tracked) = reaper::spawn_tracked(&mut cmd)
        .map_err(|source| SandboxError::SpawnFailed { program, source })?;

    // The child leads its own group, so its pid is also the group id
    let group = child.id().map(|pid| Pid::from_raw(pid as i32));
    debug!(pid = ?group, "process spawned");

    let stdin_task = match (child.stdin.take(), stdin_data) {
        (Some(mut pipe), Some(data)) => {
            let data = data.to_vec();
            Some(tokio::spawn(async move {
                // A child that exits without reading closes the pipe early
                if let Err(e) = pipe.write_all(&data).await {
                    debug!(error = %e, "stdin not fully consumed");
                }
            }))
        }
        _ => None,
    };
    let mut stdout_task = child
        .stdout
        .take()
        .map(|stream| tokio::spawn(read_capped(stream, output_cap)));
    let mut stderr_task = child
        .stderr
        .take()
        .map(|stream| tokio::spawn(read_capped(stream, output_cap)));

    let waited = match deadline {
        Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
        None => Some(child.wait().await),
    };

    kill_group(group);
    if let Some(task) = stdin_task {
        task.abort();
    }

    let Some(status) = waited else {
        let wall_time = started.elapsed();
        // The group is dead; reap the leader
        if let Err(e) = child.wait().await {
            warn!(error = %e, "failed to reap timed out process");
        }
        drop(tracked);
        reaper::kill_escaped().await;
        abort(stdout_task);
        abort(stderr_task);
        debug!(?wall_time, "process timed out");
        return Ok(ProcessResult {
            status: ProcessStatus::TimedOut,
            stdout: Vec::new(),
            stderr: Vec::new(),
            wall_time,
        });
    };

    let status = status?;
    let wall_time = started.elapsed();
    drop(tracked);
    reaper::kill_escaped().await;

    // Only an escaped descendant that could not be killed can still hold the
    // pipes open at this point
    let captured = tokio::time::timeout(CAPTURE_GRACE, async {
        let stdout = collect(&mut stdout_task).await?;
        let stderr = collect(&mut stderr_task).await?;
        Ok::<_, SandboxError>((stdout, stderr))
    })
    .await;
    let (stdout, stderr) = match captured {
        Ok(streams) => streams?,
        Err(_) => {
            abort(stdout_task);
            abort(stderr_task);
            return Err(SandboxError::Capture(
                "output streams held open after exit".to_string(),
            ));
        }
    };

    let exit_code = status_code(status);
    debug!(exit_code, ?wall_time, "process exited");

    Ok(ProcessResult {
        status: ProcessStatus::Exited(exit_code),
        stdout,
        stderr,
        wall_time,
    })
}

/// Map an exit status to a shell-style exit code
fn status_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

/// SIGKILL every process in the group, ignoring an already empty group
fn kill_group(group: Option<Pid>) {
    let Some(group) = group else {
        return;
    };
    match killpg(group, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = %group, error = %e, "failed to kill process group"),
    }
}

type CaptureTask = JoinHandle<std::io::Result<Vec<u8>>>;

fn abort(task: Option<CaptureTask>) {
    if let Some(task) = task {
        task.abort();
    }
}

async fn collect(task: &mut Option<CaptureTask>) -> Result<Vec<u8>, SandboxError> {
    match task {
        Some(task) => task
            .await
            .map_err(|e| SandboxError::Capture(e.to_string()))?
            .map_err(SandboxError::Io),
        None => Ok(Vec::new()),
    }
}

/// Read a stream to the end, keeping at most `cap` bytes
async fn read_capped<R>(mut reader: R, cap: Option<u64>) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    match cap {
        Some(cap) => {
            (&mut reader).take(cap).read_to_end(&mut buf).await?;
            let dropped = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
            if dropped > 0 {
                debug!(kept = buf.len(), dropped, "output truncated");
            }
        }
        None => {
            reader.read_to_end(&mut buf).await?;
        }
    }
    Ok(buf)
}
