use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use netsec_config::{Config, ConfigLoader};
use netsec_policy::{Registry, registry::collect_documents};
use tracing::{debug, warn};

pub mod analyze;
pub mod generate;
pub mod guardrails;
pub mod validate;

/// Explicit `--config` file, or the first one found on the search path
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let loader = ConfigLoader::new();
    match path {
        Some(path) => loader
            .load_path(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => loader.load().context("Failed to load configuration"),
    }
}

/// Policy files named by `input`.
///
/// `input` is a JSON array of paths, a single file, or a directory searched
/// recursively. Listed files that do not exist are skipped.
pub fn collect_policy_files(input: &str) -> Result<Vec<PathBuf>> {
    let trimmed = input.trim();
    let files: Vec<PathBuf> = if trimmed.starts_with('[') {
        let listed: Vec<String> =
            serde_json::from_str(trimmed).context("Invalid JSON list of policy files")?;
        listed.into_iter().map(PathBuf::from).collect()
    } else {
        let path = Path::new(trimmed);
        if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            collect_documents(path)
                .with_context(|| format!("Failed to read policies: {}", path.display()))?
        }
    };

    let files: Vec<PathBuf> = files
        .into_iter()
        .filter(|file| {
            let exists = file.exists();
            if !exists {
                warn!("Skipping missing policy file: {}", file.display());
            }
            exists
        })
        .collect();
    debug!("Collected {} policy file(s)", files.len());
    Ok(files)
}

pub fn load_registry(path: &Path) -> Result<Registry> {
    Registry::load(path).with_context(|| format!("Failed to load registry: {}", path.display()))
}

/// Path argument, falling back to a configured default
pub fn or_config(arg: Option<PathBuf>, configured: &Path) -> PathBuf {
    arg.unwrap_or_else(|| configured.to_path_buf())
}
