//! Configuration file loading for codecell
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError, ENV_PREFIX, EXAMPLE_CONFIG};
use crate::types::ResourceLimits;

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration for a service
    ///
    /// Reads `path` if given, otherwise the embedded example configuration,
    /// then layers `CODECELL__*` environment variables on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = match path {
            Some(path) => ConfigBuilder::builder().add_source(File::from(path)),
            None => ConfigBuilder::builder()
                .add_source(File::from_str(EXAMPLE_CONFIG, FileFormat::Toml)),
        };
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == Some(0) {
            return Err(ConfigError::Invalid(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.janitor.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "janitor interval_secs must be at least 1".to_string(),
            ));
        }
        if self.janitor.max_age_secs == 0 {
            return Err(ConfigError::Invalid(
                "janitor max_age_secs must be at least 1".to_string(),
            ));
        }
        validate_limits("default_limits", &self.default_limits)?;

        for (id, lang) in &self.languages {
            if lang.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty name"
                )));
            }
            if lang.run.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty run command"
                )));
            }
            if let Some(ref limits) = lang.run.limits {
                validate_limits(&format!("language '{id}' run limits"), limits)?;
            }
            if let Some(ref compile) = lang.compile {
                if compile.command.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "language '{id}' has empty compile command"
                    )));
                }
                if compile.output_name.is_empty() || compile.output_name.contains('/') {
                    return Err(ConfigError::Invalid(format!(
                        "language '{id}' has invalid compile output name '{}'",
                        compile.output_name
                    )));
                }
                if let Some(ref limits) = compile.limits {
                    validate_limits(&format!("language '{id}' compile limits"), limits)?;
                }
            }
        }

        Ok(())
    }
}

fn validate_limits(scope: &str, limits: &ResourceLimits) -> Result<(), ConfigError> {
    let seconds = [
        ("time_limit", limits.time_limit),
        ("wall_time_limit", limits.wall_time_limit),
    ];
    for (field, value) in seconds {
        if let Some(value) = value
            && !(value.is_finite() && value > 0.0)
        {
            return Err(ConfigError::Invalid(format!(
                "{scope}: {field} must be a positive number of seconds, got {value}"
            )));
        }
    }
    if limits.wall_time().is_err() {
        return Err(ConfigError::Invalid(format!(
            "{scope}: wall_time_limit is out of range"
        )));
    }
    Ok(())
}
