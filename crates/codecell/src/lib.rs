//! A library for running untrusted programs.
//!
//! Codecell takes a language identifier, source code and standard input,
//! builds and runs the program in a fresh per-request workspace, and reports
//! a uniform `{stdout, stderr, exit_code}` result.
//!
//! # Features
//!
//! - **Per-request workspaces**: every request gets its own directory, removed whatever the outcome.
//! - **Multi-language**: compiled and interpreted languages, registered in TOML configuration.
//! - **Bounded stages**: both the build and run stages have wall clock deadlines.
//! - **Process hardening**: process-group kill, rlimits, cleared environment, optional unprivileged user.
//! - **Janitor**: background sweeping of workspaces leaked by a crashed service.
//!
//! ```no_run
//! # async fn demo() {
//! let runner = codecell::Runner::with_defaults();
//! let result = runner.submit("python", "print('hi')", "").await;
//! assert_eq!(result.stdout, "hi\n");
//! # }
//! ```

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, JanitorConfig, Language, SandboxUser};
pub use maintenance::{Janitor, JanitorHandle};
pub use runner::{CompileError, CompileResult, ExecuteError, PipelineError, Runner};
pub use sandbox::{SandboxError, Workspace, WorkspaceManager};
pub use types::{ExecutionOutcome, ExecutionRequest, ResourceLimits, StageResult};

pub mod config;
pub mod maintenance;
pub mod runner;
pub mod sandbox;
pub mod types;
