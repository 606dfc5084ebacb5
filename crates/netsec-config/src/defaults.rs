//! Default configuration values

use std::{collections::BTreeMap, path::PathBuf};

use netsec_policy::engine::{DEFAULT_FILE_EXTENSION, DEFAULT_WORKSPACE_PREFIX};

use crate::*;

/// Configuration format version written by default
pub const CONFIG_VERSION: &str = "1.0";

/// Create a default configuration
pub fn default_config() -> Config {
    Config {
        version: CONFIG_VERSION.to_string(),
        metadata: None,
        paths: default_paths_config(),
        generation: default_generation_config(),
        log_level: None,
        adapters: BTreeMap::new(),
    }
}

pub fn default_paths_config() -> PathsConfig {
    PathsConfig {
        registry: PathBuf::from("registry"),
        policies: PathBuf::from("policies"),
        output: PathBuf::from("generated"),
        guardrails: PathBuf::from("guardrails/rules.yaml"),
    }
}

pub fn default_generation_config() -> GenerationConfig {
    GenerationConfig {
        workspace_prefix: DEFAULT_WORKSPACE_PREFIX.to_string(),
        file_extension: DEFAULT_FILE_EXTENSION.to_string(),
        platforms: None,
        concurrent: true,
    }
}
