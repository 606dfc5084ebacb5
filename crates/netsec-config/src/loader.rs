//! Configuration loader with multiple source support

use std::{
    env,
    path::{Path, PathBuf},
};

use crate::{Config, ConfigError, Result};

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Configuration loader that supports multiple sources
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    env_prefix: String,
    env: EnvLookup,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            search_paths: default_search_paths(),
            env_prefix: "NETSEC".to_string(),
            env: Box::new(|key| env::var(key).ok()),
        }
    }

    /// A loader that searches only the paths added to it
    pub fn without_search_paths() -> Self {
        Self {
            search_paths: Vec::new(),
            ..Self::new()
        }
    }

    /// Add a search path
    pub fn add_search_path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Set environment variable prefix
    pub fn set_env_prefix(&mut self, prefix: impl Into<String>) -> &mut Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Replace the environment lookup used for overrides
    pub fn set_env<F>(&mut self, lookup: F) -> &mut Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(lookup);
        self
    }

    /// Directories searched, in order
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Load configuration from all available sources
    pub fn load(&self) -> Result<Config> {
        let mut config = Config::default();

        if let Some(file_config) = self.load_from_file()? {
            config.merge(file_config)?;
        }

        self.apply_env_overrides(&mut config)?;

        config.validate()?;
        Ok(config)
    }

    /// Load an explicit file, then apply environment overrides
    pub fn load_path<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let mut config = Config::default();
        config.merge(self.load_from_specific_file(path)?)?;
        self.apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_specific_file<P: AsRef<Path>>(&self, path: P) -> Result<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        match extension {
            "yaml" | "yml" => Config::from_yaml_file(path),
            "json" => Config::from_json_file(path),
            _ => Err(ConfigError::ValidationError(format!(
                "Unsupported config file extension: {}",
                extension
            ))),
        }
    }

    /// Load configuration from the first found config file
    fn load_from_file(&self) -> Result<Option<Config>> {
        let config_names = [
            "netsec.yaml",
            "netsec.yml",
            "netsec.json",
            ".netsec.yaml",
            ".netsec.yml",
            ".netsec.json",
        ];

        for dir in &self.search_paths {
            for name in &config_names {
                let path = dir.join(name);
                if path.exists() {
                    tracing::debug!("Loading config from: {}", path.display());
                    return self.load_from_specific_file(path).map(Some);
                }
            }
        }

        Ok(None)
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.env)(&format!("{}_{}", self.env_prefix, name)).filter(|v| !v.is_empty())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut Config) -> Result<()> {
        if let Some(registry) = self.var("REGISTRY") {
            config.paths.registry = PathBuf::from(registry);
        }

        if let Some(policies) = self.var("POLICIES") {
            config.paths.policies = PathBuf::from(policies);
        }

        if let Some(output) = self.var("OUTPUT") {
            config.paths.output = PathBuf::from(output);
        }

        if let Some(prefix) = self.var("WORKSPACE_PREFIX") {
            config.generation.workspace_prefix = prefix;
        }

        if let Some(log_level) = self.var("LOG_LEVEL") {
            config.log_level = Some(log_level.to_lowercase());
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Get default configuration search paths
fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![env::current_dir().unwrap_or_default()];

    if let Ok(config_dir) = env::var("NETSEC_CONFIG_DIR") {
        paths.push(PathBuf::from(config_dir));
    }

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config").join("netsec"));
    }

    if let Some(config_home) = dirs::config_dir() {
        paths.push(config_home.join("netsec"));
    }

    paths.push(PathBuf::from("/etc/netsec"));

    paths
}
