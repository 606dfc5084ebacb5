//! Configuration validation

use netsec_policy::Platform;

use crate::{Config, ConfigError, GenerationConfig, Result};

/// Log levels accepted in configuration and on the command line
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate a configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_version(&config.version)?;
    validate_generation_config(&config.generation)?;

    if let Some(ref log_level) = config.log_level {
        validate_log_level(log_level)?;
    }

    validate_adapters(config)?;

    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() {
        return Err(ConfigError::ValidationError(
            "Version cannot be empty".to_string(),
        ));
    }

    if !version.starts_with("1.") && version != "1" {
        return Err(ConfigError::ValidationError(format!(
            "Unsupported configuration version: {}",
            version
        )));
    }

    Ok(())
}

fn validate_generation_config(generation: &GenerationConfig) -> Result<()> {
    let prefix = &generation.workspace_prefix;
    if prefix.is_empty()
        || !prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(ConfigError::InvalidValue {
            field: "generation.workspace_prefix".to_string(),
            value: prefix.clone(),
        });
    }

    let extension = &generation.file_extension;
    if extension.is_empty() || extension.contains('.') || extension.contains('/') {
        return Err(ConfigError::InvalidValue {
            field: "generation.file_extension".to_string(),
            value: extension.clone(),
        });
    }

    if let Some(ref platforms) = generation.platforms {
        if platforms.is_empty() {
            return Err(ConfigError::ValidationError(
                "generation.platforms cannot be an empty list".to_string(),
            ));
        }
    }

    Ok(())
}

/// Reject anything but the five tracing levels
pub fn validate_log_level(log_level: &str) -> Result<()> {
    if LOG_LEVELS.contains(&log_level) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "Invalid log level: {}",
            log_level
        )))
    }
}

fn validate_adapters(config: &Config) -> Result<()> {
    for (name, settings) in &config.adapters {
        name.parse::<Platform>()?;
        if !settings.is_mapping() && !settings.is_null() {
            return Err(ConfigError::ValidationError(format!(
                "Settings for adapter '{}' must be a mapping",
                name
            )));
        }
    }

    Ok(())
}
