//! Configuration system for netsec

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use netsec_policy::{AdapterConfig, EngineOptions, Platform};
use serde::{Deserialize, Serialize};

pub mod defaults;
pub mod error;
pub mod loader;
pub mod validation;

pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;

/// Main configuration structure for netsec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Configuration format version
    pub version: String,

    /// Metadata about this configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Repository locations
    #[serde(default = "defaults::default_paths_config")]
    pub paths: PathsConfig,

    /// Output naming and platform selection
    #[serde(default = "defaults::default_generation_config")]
    pub generation: GenerationConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Per-platform adapter settings, passed to the adapters as-is
    #[serde(default)]
    pub adapters: BTreeMap<String, serde_yaml::Value>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub owner: Option<String>,
}

/// Repository locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Registry root holding `hosts/`, `groups/` and `services/`
    pub registry: PathBuf,

    /// Directory of policy documents
    pub policies: PathBuf,

    /// Root of generated Terraform
    pub output: PathBuf,

    /// Guardrail rules file
    pub guardrails: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        defaults::default_paths_config()
    }
}

/// Generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Prefix of deployment-unit identifiers
    pub workspace_prefix: String,

    /// Extension of generated files, without the dot
    pub file_extension: String,

    /// Restrict generation to these platforms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<Platform>>,

    /// Process policies on blocking tasks in parallel
    pub concurrent: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        defaults::default_generation_config()
    }
}

#[cfg(test)]
mod tests;

impl Config {
    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }

    /// Merge with another configuration (other takes precedence)
    pub fn merge(&mut self, other: Config) -> Result<()> {
        if major_version(&other.version) != major_version(&self.version) {
            return Err(ConfigError::VersionMismatch {
                expected: self.version.clone(),
                found: other.version,
            });
        }

        self.version = other.version;

        if let Some(metadata) = other.metadata {
            self.metadata = Some(metadata);
        }

        self.paths = other.paths;
        self.generation = other.generation;

        if let Some(log_level) = other.log_level {
            self.log_level = Some(log_level);
        }

        self.adapters.extend(other.adapters);

        Ok(())
    }

    /// Output naming for the adapter engine
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            workspace_prefix: self.generation.workspace_prefix.clone(),
            file_extension: self.generation.file_extension.clone(),
        }
    }

    /// Adapter settings keyed by platform
    pub fn adapter_configs(&self) -> Result<BTreeMap<Platform, AdapterConfig>> {
        self.adapters
            .iter()
            .map(|(name, value)| -> Result<(Platform, AdapterConfig)> {
                let platform: Platform = name.parse()?;
                Ok((platform, AdapterConfig::new(value.clone())))
            })
            .collect()
    }
}

fn major_version(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

impl Default for Config {
    fn default() -> Self {
        defaults::default_config()
    }
}
