//! Change-impact analysis
//!
//! Given the files touched by a change set, works out which policies have to be
//! regenerated. Registry edits propagate: a changed host affects every group that
//! lists it or selects it by label, and a changed group affects every group that
//! nests it.

use std::{collections::BTreeSet, path::Path};

use globset::{Glob, GlobSet, GlobSetBuilder};
use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::debug;

use crate::{
    error::Result,
    model::Policy,
    registry::{Registry, collect_documents},
};

/// Top-level directory names of a policy repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    /// Directory holding policy documents
    pub policies: String,
    /// Directory holding the object registry
    pub registry: String,
}

impl Default for RepoLayout {
    fn default() -> Self {
        RepoLayout {
            policies: "policies".to_string(),
            registry: "registry".to_string(),
        }
    }
}

/// What a changed path is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A policy document
    Policy,
    /// A group definition
    Group,
    /// A host definition
    Host,
    /// A service definition
    Service,
    /// Some other registry file
    Registry,
    /// Not part of the policy repository
    Other,
}

/// Classifies repository paths with glob patterns
pub struct ChangeClassifier {
    policies: GlobSet,
    groups: GlobSet,
    hosts: GlobSet,
    services: GlobSet,
    registry: GlobSet,
}

fn glob_set(pattern: &str) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new(pattern)?);
    Ok(builder.build()?)
}

impl ChangeClassifier {
    /// Build the patterns for `layout`
    pub fn new(layout: &RepoLayout) -> Result<Self> {
        let policies = layout.policies.trim_end_matches('/');
        let registry = layout.registry.trim_end_matches('/');
        Ok(ChangeClassifier {
            policies: glob_set(&format!("{policies}/**/*.{{yaml,yml}}"))?,
            groups: glob_set(&format!("{registry}/groups/**"))?,
            hosts: glob_set(&format!("{registry}/hosts/**"))?,
            services: glob_set(&format!("{registry}/services/**"))?,
            registry: glob_set(&format!("{registry}/**"))?,
        })
    }

    /// Classify one path
    pub fn classify(&self, path: &str) -> ChangeKind {
        let path = normalize(path);
        if self.policies.is_match(&path) {
            ChangeKind::Policy
        } else if self.groups.is_match(&path) {
            ChangeKind::Group
        } else if self.hosts.is_match(&path) {
            ChangeKind::Host
        } else if self.services.is_match(&path) {
            ChangeKind::Service
        } else if self.registry.is_match(&path) {
            ChangeKind::Registry
        } else {
            ChangeKind::Other
        }
    }
}

fn normalize(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    path.strip_prefix("./").unwrap_or(&path).to_string()
}

fn stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Declared `metadata.name` of a changed registry document.
///
/// Deleted or unparseable documents fall back to the file stem.
fn object_name(file: &str, registry: &Registry, layout: &RepoLayout) -> String {
    let relative = file
        .strip_prefix(layout.registry.trim_end_matches('/'))
        .map(|rest| rest.trim_start_matches('/'));
    let declared = registry.root().zip(relative).and_then(|(root, relative)| {
        let contents = std::fs::read_to_string(root.join(relative)).ok()?;
        let document: serde_yaml::Value = serde_yaml::from_str(&contents).ok()?;
        document.get("metadata")?.get("name")?.as_str().map(str::to_string)
    });
    declared.unwrap_or_else(|| {
        debug!("No readable document at {file}, using its file name");
        stem(file)
    })
}

/// Result of a change-impact analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeAnalysis {
    /// Policy files changed directly
    pub direct_policy_changes: Vec<String>,
    /// Registry files changed
    pub registry_changes: Vec<String>,
    /// Groups whose resolved membership may differ
    pub affected_groups: Vec<String>,
    /// Services changed directly
    pub affected_services: Vec<String>,
    /// Policy files that must be regenerated
    pub affected_policies: Vec<String>,
    /// True when any policy must be regenerated
    pub regeneration_needed: bool,
}

impl ChangeAnalysis {
    /// Write the analysis as pretty JSON
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Groups affected by changed group and host files, closed over nesting
fn affected_groups(
    classifier: &ChangeClassifier,
    changed_files: &[String],
    registry: &Registry,
    layout: &RepoLayout,
) -> BTreeSet<String> {
    let mut affected: FxHashSet<String> = FxHashSet::default();

    for file in changed_files {
        match classifier.classify(file) {
            ChangeKind::Group => {
                affected.insert(object_name(file, registry, layout));
            }
            ChangeKind::Host => {
                let name = object_name(file, registry, layout);
                if let Ok(host) = registry.get_host(&name) {
                    for group in registry.find_groups_matching_host(&host) {
                        affected.insert(group.name().to_string());
                    }
                }
                for group in registry.groups_referencing_host(&name) {
                    affected.insert(group.name().to_string());
                }
            }
            _ => {}
        }
    }

    let mut pending: Vec<String> = affected.iter().cloned().collect();
    while let Some(group) = pending.pop() {
        for parent in registry.groups_nesting(&group) {
            if affected.insert(parent.name().to_string()) {
                pending.push(parent.name().to_string());
            }
        }
    }

    affected.into_iter().collect()
}

/// Work out which policies a change set requires regenerating.
///
/// Policy files under `policies_dir` that fail to parse are skipped.
pub fn analyze_changes(
    changed_files: &[String],
    registry: &Registry,
    policies_dir: &Path,
    layout: &RepoLayout,
) -> Result<ChangeAnalysis> {
    let classifier = ChangeClassifier::new(layout)?;
    let changed_files: Vec<String> = changed_files
        .iter()
        .map(|f| normalize(f))
        .filter(|f| !f.is_empty())
        .collect();

    let mut analysis = ChangeAnalysis::default();
    let mut policies: BTreeSet<String> = BTreeSet::new();
    let mut services: BTreeSet<String> = BTreeSet::new();

    for file in &changed_files {
        match classifier.classify(file) {
            ChangeKind::Policy => {
                analysis.direct_policy_changes.push(file.clone());
                policies.insert(file.clone());
            }
            ChangeKind::Service => {
                analysis.registry_changes.push(file.clone());
                services.insert(object_name(file, registry, layout));
            }
            ChangeKind::Group | ChangeKind::Host | ChangeKind::Registry => {
                analysis.registry_changes.push(file.clone())
            }
            ChangeKind::Other => {}
        }
    }

    let groups = affected_groups(&classifier, &changed_files, registry, layout);

    if !groups.is_empty() || !services.is_empty() {
        for path in collect_documents(policies_dir)? {
            let policy = match Policy::from_yaml_file(&path) {
                Ok(policy) => policy,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            let touches_group = policy
                .referenced_groups()
                .iter()
                .any(|g| groups.contains(g));
            let touches_service = policy
                .referenced_services()
                .iter()
                .any(|s| services.contains(s));
            if touches_group || touches_service {
                policies.insert(repository_path(&path, policies_dir, layout));
            }
        }
    }

    analysis.affected_groups = groups.into_iter().collect();
    analysis.affected_services = services.into_iter().collect();
    analysis.affected_policies = policies.into_iter().collect();
    analysis.regeneration_needed = !analysis.affected_policies.is_empty();

    debug!(
        "Change analysis: {} groups, {} services, {} policies",
        analysis.affected_groups.len(),
        analysis.affected_services.len(),
        analysis.affected_policies.len()
    );

    Ok(analysis)
}

/// A scanned policy path in the same form as changed-file entries
fn repository_path(path: &Path, policies_dir: &Path, layout: &RepoLayout) -> String {
    match path.strip_prefix(policies_dir) {
        Ok(relative) => normalize(&format!(
            "{}/{}",
            layout.policies.trim_end_matches('/'),
            relative.to_string_lossy()
        )),
        Err(_) => normalize(&path.to_string_lossy()),
    }
}
