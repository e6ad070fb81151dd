use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::config::language::{
    CompileConfig, DEFAULT_SANDBOX_PATH, Language, RunConfig, SourceName,
};
use crate::types::ResourceLimits;

pub mod language;
mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file. It also
/// defines the built-in language registry used by [`Config::default`].
pub const EXAMPLE_CONFIG: &str = include_str!("../../codecell.example.toml");

/// Prefix for environment variable overrides (e.g. `CODECELL__MAX_CONCURRENT`)
pub const ENV_PREFIX: &str = "CODECELL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid source file name '{0}'")]
    InvalidSourceName(String),

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for codecell
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory under which per-request workspaces are created.
    ///
    /// Defaults to the OS temporary directory.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Maximum number of workspaces alive at once. Unbounded when unset.
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Unprivileged identity that compilers and programs run as.
    ///
    /// Switching identity requires the service to run as root. Workspaces are
    /// handed to this user so the child can write its artifacts.
    #[serde(default)]
    pub sandbox_user: Option<SandboxUser>,

    /// Default resource limits applied to all executions.
    /// Per-language run limits override these.
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Background sweeping of leaked workspaces
    #[serde(default)]
    pub janitor: JanitorConfig,

    /// Language configurations keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, Language>,
}

/// Numeric identity for child processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxUser {
    pub uid: u32,
    pub gid: u32,
}

/// Settings for the workspace janitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanitorConfig {
    /// Whether the service entry point should start the janitor
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_janitor_interval")]
    pub interval_secs: u64,

    /// Workspaces older than this many seconds are removed
    #[serde(default = "default_janitor_max_age")]
    pub max_age_secs: u64,
}

impl JanitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_janitor_interval(),
            max_age_secs: default_janitor_max_age(),
        }
    }
}

fn default_janitor_interval() -> u64 {
    300
}

fn default_janitor_max_age() -> u64 {
    3600
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            workspace_root: None,
            max_concurrent: None,
            sandbox_user: None,
            default_limits: ResourceLimits::default(),
            janitor: JanitorConfig::default(),
            languages: HashMap::new(),
        }
    }

    /// Register a language strategy under `id`, replacing any previous entry
    pub fn with_language(mut self, id: impl Into<String>, language: Language) -> Self {
        self.languages.insert(id.into(), language);
        self
    }

    /// Get a language by ID
    pub fn get_language(&self, id: &str) -> Result<&Language, ConfigError> {
        self.languages
            .get(id)
            .ok_or_else(|| ConfigError::LanguageNotFound(id.to_string()))
    }

    /// Get the directory workspaces are created in
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Merge run limits with defaults
    pub fn effective_limits(&self, overrides: Option<&ResourceLimits>) -> ResourceLimits {
        match overrides {
            Some(limits) => self.default_limits.with_overrides(limits),
            None => self.default_limits.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}
