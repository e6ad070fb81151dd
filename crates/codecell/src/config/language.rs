use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;
use crate::types::ResourceLimits;

/// Build and run recipe for one programming language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    /// Human-readable name for the language (e.g., "C (GCC)")
    pub name: String,

    /// File name the source code is written to inside the workspace
    ///
    /// Some toolchains dictate this: Java requires the public entry type to
    /// match the file name, so the Java recipe uses `Main.java` and programs
    /// must declare `class Main`.
    pub source_name: SourceName,

    /// Compilation configuration (None for interpreted languages)
    #[serde(default)]
    pub compile: Option<CompileConfig>,

    /// Execution configuration
    pub run: RunConfig,
}

impl Language {
    /// Check if the language is compiled
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// Name of the artifact produced by the compile step, or the source for
    /// interpreted languages
    pub fn binary_name(&self) -> &str {
        match self.compile {
            Some(ref compile) => &compile.output_name,
            None => self.source_name.as_str(),
        }
    }

    /// Expanded compile command for a workspace, if the language compiles
    pub fn compile_command(&self, workspace: &Path) -> Option<Vec<String>> {
        self.compile.as_ref().map(|compile| {
            Self::expand_command(
                &compile.command,
                self.source_name.as_str(),
                &compile.output_name,
                workspace,
            )
        })
    }

    /// Expanded run command for a workspace
    pub fn run_command(&self, workspace: &Path) -> Vec<String> {
        Self::expand_command(
            &self.run.command,
            self.source_name.as_str(),
            self.binary_name(),
            workspace,
        )
    }

    /// Expand placeholders in the given command
    ///
    /// Placeholders: `{source}`, `{output}`/`{binary}` and `{workspace}`.
    pub fn expand_command(
        command: &[String],
        source: &str,
        binary: &str,
        workspace: &Path,
    ) -> Vec<String> {
        let workspace = workspace.to_string_lossy();
        command
            .iter()
            .map(|arg| {
                arg.replace("{source}", source)
                    .replace("{output}", binary)
                    .replace("{binary}", binary)
                    .replace("{workspace}", &workspace)
            })
            .collect()
    }
}

/// Plain file name inside a workspace (e.g., "main.py")
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceName(String);

impl SourceName {
    pub fn new(name: &str) -> Result<Self, ConfigError> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
            return Err(ConfigError::InvalidSourceName(name.to_owned()));
        }
        Ok(Self(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for SourceName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SourceName::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a plain file name without '/' characters",
            )
        })
    }
}

impl std::fmt::Display for SourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for the compilation step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {output}, {workspace}
    pub command: Vec<String>,

    /// Artifact the compiler leaves in the workspace (e.g., "main" or
    /// "Main.class"), substituted for `{output}` and `{binary}`
    pub output_name: String,

    /// Environment variables to set during compilation
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Resource limits for compilation (overrides defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

/// Default PATH for child processes
pub const DEFAULT_SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Configuration for the execution step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Command and arguments with placeholders
    /// Placeholders: {source}, {binary}, {workspace}
    pub command: Vec<String>,

    /// Environment Variables to set
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// PATH environment variable for child processes
    ///
    /// Defaults to "/usr/local/bin:/usr/bin:/bin" if not specified.
    #[serde(default = "default_sandbox_path")]
    pub path: String,

    /// Resource limits for execution (overrides defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

fn default_sandbox_path() -> String {
    DEFAULT_SANDBOX_PATH.to_owned()
}
