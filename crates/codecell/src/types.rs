use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exit code reported when the run stage exceeds its wall-clock limit
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported for internal errors and rejected requests
pub const INTERNAL_ERROR_EXIT_CODE: i32 = 1;

/// stderr text reported when the run stage exceeds its wall-clock limit
pub const TIMEOUT_MESSAGE: &str = "Execution timed out";

/// stderr text reported when the compile stage exceeds its wall-clock limit
pub const COMPILE_TIMEOUT_MESSAGE: &str = "Compilation timed out";

/// stderr text reported for an unknown language identifier
pub const UNSUPPORTED_LANGUAGE_MESSAGE: &str = "Unsupported language";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time limit in seconds (RLIMIT_CPU)
    #[serde(default)]
    pub time_limit: Option<f64>,

    /// Wall clock time limit in seconds
    #[serde(default)]
    pub wall_time_limit: Option<f64>,

    /// Address space limit in kilobytes (RLIMIT_AS)
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Stack size limit in kilobytes
    #[serde(default)]
    pub stack_limit: Option<u64>,

    /// Maximum number of processes/threads for the executing user
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Maximum output size in kilobytes, applied both to files the program
    /// writes and to each captured stream
    #[serde(default)]
    pub max_output: Option<u64>,

    /// Maximum open files
    #[serde(default)]
    pub max_open_files: Option<u32>,
}

impl ResourceLimits {
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;

    /// Create new resource limits with the default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Resource limits with every field unset
    pub fn unlimited() -> Self {
        Self {
            time_limit: None,
            wall_time_limit: None,
            memory_limit: None,
            stack_limit: None,
            max_processes: None,
            max_output: None,
            max_open_files: None,
        }
    }

    /// Set the CPU time limit in seconds
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    /// Set the wall clock time limit in seconds
    pub fn with_wall_time_limit(mut self, seconds: f64) -> Self {
        self.wall_time_limit = Some(seconds);
        self
    }

    /// Set the memory limit in kilobytes
    pub fn with_memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = Some(kb);
        self
    }

    /// Set the stack size limit in kilobytes
    pub fn with_stack_limit(mut self, kb: u64) -> Self {
        self.stack_limit = Some(kb);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Set the maximum output size in kilobytes
    pub fn with_max_output(mut self, kb: u64) -> Self {
        self.max_output = Some(kb);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    ///
    /// Returns a new ResourceLimits with values from `overrides` taking precedence
    /// over values from `self` when both are present.
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            time_limit: overrides.time_limit.or(self.time_limit),
            wall_time_limit: overrides.wall_time_limit.or(self.wall_time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            stack_limit: overrides.stack_limit.or(self.stack_limit),
            max_processes: overrides.max_processes.or(self.max_processes),
            max_output: overrides.max_output.or(self.max_output),
            max_open_files: overrides.max_open_files.or(self.max_open_files),
        }
    }

    /// Wall clock deadline, if one is set and representable
    ///
    /// Returns `Err` with the offending value when the limit is negative,
    /// NaN or too large to fit a [`Duration`].
    pub fn wall_time(&self) -> Result<Option<Duration>, f64> {
        match self.wall_time_limit {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map(Some)
                .map_err(|_| secs),
            None => Ok(None),
        }
    }

    /// Per-stream capture cap in bytes
    pub fn output_cap(&self) -> Option<u64> {
        self.max_output.map(|kb| kb.saturating_mul(1024))
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            // Kept above the wall limit so runaway loops surface as timeouts
            time_limit: Some(10.0),
            wall_time_limit: Some(5.0),
            memory_limit: None,
            stack_limit: None,
            max_processes: None,
            max_output: Some(65536), // 64 MB
            max_open_files: Some(256),
        }
    }
}

/// A request to run one program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Language identifier (e.g., "python", "cpp")
    pub language: String,

    /// Program source code
    pub code: String,

    /// Text fed to the program's standard input
    #[serde(default)]
    pub stdin: String,
}

impl ExecutionRequest {
    pub fn new(
        language: impl Into<String>,
        code: impl Into<String>,
        stdin: impl Into<String>,
    ) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            stdin: stdin.into(),
        }
    }
}

/// Uniform result shape of a stage and of a whole request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl StageResult {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Build a result from raw captured streams, replacing invalid UTF-8
    pub fn from_bytes(stdout: &[u8], stderr: &[u8], exit_code: i32) -> Self {
        Self {
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
            exit_code,
        }
    }

    /// Check if the program exited with code 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The single outcome of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The program ran to completion (with any exit code)
    Success(StageResult),

    /// The compiler exited non-zero or ran past its deadline
    CompileFailure { stderr: String, exit_code: i32 },

    /// The program ran past its wall-clock limit and was killed
    Timeout,

    /// The pipeline could not launch a process or hit an unexpected failure
    InternalError(String),

    /// The language identifier has no registered strategy
    UnsupportedLanguage(String),
}

impl ExecutionOutcome {
    /// Map the outcome onto the uniform `{stdout, stderr, exit_code}` shape
    pub fn into_result(self) -> StageResult {
        match self {
            ExecutionOutcome::Success(result) => result,
            ExecutionOutcome::CompileFailure { stderr, exit_code } => {
                StageResult::new("", stderr, exit_code)
            }
            ExecutionOutcome::Timeout => {
                StageResult::new("", TIMEOUT_MESSAGE, TIMEOUT_EXIT_CODE)
            }
            ExecutionOutcome::InternalError(message) => {
                StageResult::new("", message, INTERNAL_ERROR_EXIT_CODE)
            }
            ExecutionOutcome::UnsupportedLanguage(_) => StageResult::new(
                "",
                UNSUPPORTED_LANGUAGE_MESSAGE,
                INTERNAL_ERROR_EXIT_CODE,
            ),
        }
    }

    /// Short label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success(_) => "success",
            ExecutionOutcome::CompileFailure { .. } => "compile_failure",
            ExecutionOutcome::Timeout => "timeout",
            ExecutionOutcome::InternalError(_) => "internal_error",
            ExecutionOutcome::UnsupportedLanguage(_) => "unsupported_language",
        }
    }
}

impl From<ExecutionOutcome> for StageResult {
    fn from(outcome: ExecutionOutcome) -> Self {
        outcome.into_result()
    }
}
