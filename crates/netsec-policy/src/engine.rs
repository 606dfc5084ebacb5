//! Adapter engine driving policies through every targeted platform

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{
    adapter::{AdapterConfig, PlatformAdapter, require_addresses},
    error::{PolicyError, Result},
    model::{
        Endpoint, Platform, Policy, ResolvedGroup, ResolvedPolicy, ResolvedService, ServiceRef,
        is_safe_identifier,
    },
    platforms::build_adapter,
    registry::Registry,
};

/// Default deployment-unit prefix
pub const DEFAULT_WORKSPACE_PREFIX: &str = "netsec";
/// Default extension of generated files
pub const DEFAULT_FILE_EXTENSION: &str = "tf";

const RULE: &str =
    "# =============================================================================";

/// Generated text per scope
pub type ScopeOutputs = BTreeMap<String, String>;

/// Generated text keyed by policy, platform, scope
pub type GenerationResults = BTreeMap<String, BTreeMap<Platform, ScopeOutputs>>;

/// Output naming options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Prefix of deployment-unit identifiers
    pub workspace_prefix: String,
    /// Extension of generated files, without the dot
    pub file_extension: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            workspace_prefix: DEFAULT_WORKSPACE_PREFIX.to_string(),
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
        }
    }
}

/// Result of processing one policy; each platform succeeds or fails on its own
#[derive(Debug)]
pub struct PolicyOutput {
    /// Policy name
    pub policy: String,
    /// Per-platform outcome
    pub platforms: BTreeMap<Platform, Result<ScopeOutputs>>,
}

impl PolicyOutput {
    /// True when every platform produced output
    pub fn is_success(&self) -> bool {
        self.platforms.values().all(|result| result.is_ok())
    }

    /// Successful platforms
    pub fn outputs(&self) -> impl Iterator<Item = (Platform, &ScopeOutputs)> {
        self.platforms
            .iter()
            .filter_map(|(platform, result)| result.as_ref().ok().map(|out| (*platform, out)))
    }

    /// Failed platforms
    pub fn errors(&self) -> impl Iterator<Item = (Platform, &PolicyError)> {
        self.platforms
            .iter()
            .filter_map(|(platform, result)| result.as_ref().err().map(|err| (*platform, err)))
    }
}

/// One failed (policy, platform) pair, or a policy that could not be loaded
#[derive(Debug)]
pub struct GenerationFailure {
    /// Policy name, or the file path when the policy did not load
    pub policy: String,
    /// Platform branch that failed; `None` for load failures
    pub platform: Option<Platform>,
    /// Cause
    pub error: PolicyError,
}

/// Batch generation outcome
#[derive(Debug, Default)]
pub struct BatchOutput {
    /// Successful output
    pub results: GenerationResults,
    /// Itemized failures
    pub failures: Vec<GenerationFailure>,
}

impl BatchOutput {
    /// True when nothing failed
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, output: PolicyOutput) {
        if self.results.contains_key(&output.policy) {
            self.failures.push(GenerationFailure {
                error: PolicyError::InvalidFormat(format!(
                    "Duplicate policy name: {}",
                    output.policy
                )),
                policy: output.policy,
                platform: None,
            });
            return;
        }

        let mut platforms = BTreeMap::new();
        for (platform, result) in output.platforms {
            match result {
                Ok(scopes) => {
                    platforms.insert(platform, scopes);
                }
                Err(error) => self.failures.push(GenerationFailure {
                    policy: output.policy.clone(),
                    platform: Some(platform),
                    error,
                }),
            }
        }
        if !platforms.is_empty() {
            self.results.insert(output.policy, platforms);
        }
    }
}

/// Deployment units touched by a write, grouped by platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkspaceManifest {
    /// Platform to deployment-unit identifiers
    pub platforms: BTreeMap<Platform, BTreeSet<String>>,
}

impl WorkspaceManifest {
    /// Flat list of every deployment unit
    pub fn workspaces(&self) -> Vec<String> {
        self.platforms.values().flatten().cloned().collect()
    }

    /// True when nothing was written
    pub fn is_empty(&self) -> bool {
        self.platforms.values().all(BTreeSet::is_empty)
    }

    /// Write the flat list as a JSON array
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.workspaces())?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// `"<prefix>-<platform>-<scope>"`
pub fn deployment_unit(prefix: &str, platform: Platform, scope: &str) -> String {
    format!("{prefix}-{platform}-{scope}")
}

/// Coordinates the adapters over one immutable registry
pub struct AdapterEngine {
    registry: Arc<Registry>,
    adapters: BTreeMap<Platform, Box<dyn PlatformAdapter>>,
    options: EngineOptions,
}

impl AdapterEngine {
    /// Create an engine with an empty adapter table
    pub fn new(registry: Arc<Registry>, options: EngineOptions) -> Self {
        AdapterEngine {
            registry,
            adapters: BTreeMap::new(),
            options,
        }
    }

    /// Create an engine with all six built-in adapters
    pub fn with_default_adapters(
        registry: Arc<Registry>,
        options: EngineOptions,
        configs: &BTreeMap<Platform, AdapterConfig>,
    ) -> Result<Self> {
        let mut engine = AdapterEngine::new(Arc::clone(&registry), options);
        let empty = AdapterConfig::default();
        for platform in Platform::ALL {
            let config = configs.get(&platform).unwrap_or(&empty);
            engine.register_adapter(build_adapter(platform, Arc::clone(&registry), config)?);
        }
        Ok(engine)
    }

    /// Register (or replace) the adapter for its platform
    pub fn register_adapter(&mut self, adapter: Box<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    /// Adapter registered for `platform`
    pub fn adapter(&self, platform: Platform) -> Option<&dyn PlatformAdapter> {
        self.adapters.get(&platform).map(|adapter| adapter.as_ref())
    }

    /// Shared registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Naming options
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Generate every (platform, scope) output of one policy.
    ///
    /// Targets naming the same platform are merged. A failure aborts only its
    /// platform branch.
    pub fn process_policy(&self, policy: &Policy) -> PolicyOutput {
        let mut targets: BTreeMap<Platform, Vec<&str>> = BTreeMap::new();
        for target in &policy.spec.targets {
            let scopes = targets.entry(target.platform).or_default();
            for scope in &target.scope {
                if !scopes.contains(&scope.as_str()) {
                    scopes.push(scope);
                }
            }
        }

        let mut platforms = BTreeMap::new();
        for (platform, scopes) in targets {
            let Some(adapter) = self.adapter(platform) else {
                platforms.insert(platform, Err(PolicyError::UnknownPlatform(platform.to_string())));
                continue;
            };
            if !adapter.can_handle(policy) {
                debug!("{} adapter skipped policy {}", platform, policy.name());
                continue;
            }

            let result = self.generate_platform(policy, adapter, &scopes);
            if let Err(err) = &result {
                warn!("Policy {} failed for {}: {}", policy.name(), platform, err);
            }
            platforms.insert(platform, result);
        }

        PolicyOutput {
            policy: policy.name().to_string(),
            platforms,
        }
    }

    fn generate_platform(
        &self,
        policy: &Policy,
        adapter: &dyn PlatformAdapter,
        scopes: &[&str],
    ) -> Result<ScopeOutputs> {
        let errors = adapter.validate(policy);
        if !errors.is_empty() {
            return Err(PolicyError::validation(
                format!("{} on {}", policy.name(), adapter.platform()),
                errors,
            ));
        }

        let mut outputs = ScopeOutputs::new();
        for scope in scopes {
            let resolved = self.resolve_policy(policy, adapter, scope)?;
            let supporting = adapter.get_supporting_resources(&resolved, scope);
            let main = adapter.generate_terraform(&resolved, scope);
            debug!(
                "Generated {} for {} scope {}",
                policy.name(),
                adapter.platform(),
                scope
            );
            outputs.insert(
                scope.to_string(),
                combine_terraform(&supporting, &main, policy, adapter, scope),
            );
        }
        Ok(outputs)
    }

    /// Resolve every reference of a policy for one platform and scope
    pub fn resolve_policy(
        &self,
        policy: &Policy,
        adapter: &dyn PlatformAdapter,
        scope: &str,
    ) -> Result<ResolvedPolicy> {
        let source = self.resolve_endpoint(&policy.spec.source, adapter, scope)?;
        let destination = self.resolve_endpoint(&policy.spec.destination, adapter, scope)?;
        let services = policy
            .spec
            .services
            .iter()
            .map(|service| match service {
                ServiceRef::Named(name) => adapter.resolve_service(name, scope),
                ServiceRef::Inline(inline) => Ok(ResolvedService::inline(inline)),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ResolvedPolicy {
            name: policy.name().to_string(),
            description: policy.spec.description.clone().unwrap_or_default(),
            ticket: policy.metadata.ticket.clone(),
            source,
            destination,
            services,
            action: policy.spec.action,
            logging: policy.spec.logging,
        })
    }

    /// Literal endpoints never reach the adapter; groups always do
    pub fn resolve_endpoint(
        &self,
        endpoint: &Endpoint,
        adapter: &dyn PlatformAdapter,
        scope: &str,
    ) -> Result<ResolvedGroup> {
        match endpoint {
            Endpoint::Any => Ok(ResolvedGroup::any()),
            Endpoint::Cidr(cidr) => Ok(ResolvedGroup::cidr(cidr)),
            Endpoint::Host(name) => {
                let host = ResolvedGroup::host(self.registry.get_host(name)?);
                require_addresses(adapter.platform(), &host)?;
                Ok(host)
            }
            Endpoint::Group(name) => adapter.resolve_group(name, scope),
        }
    }

    /// Load policy files, keep targets in `filter`, and generate everything
    pub fn process_policies<P: AsRef<Path>>(
        &self,
        paths: &[P],
        filter: Option<&[Platform]>,
    ) -> BatchOutput {
        let mut batch = BatchOutput::default();
        for path in paths {
            match load_filtered(path.as_ref(), filter) {
                Ok(Some(policy)) => batch.absorb(self.process_policy(&policy)),
                Ok(None) => {}
                Err(failure) => batch.failures.push(failure),
            }
        }
        info!(
            "Processed {} policies: {} generated, {} failures",
            paths.len(),
            batch.results.len(),
            batch.failures.len()
        );
        batch
    }

    /// [`AdapterEngine::process_policies`] with each policy on a blocking task.
    ///
    /// Output is folded in input order, so it equals the sequential result.
    pub async fn process_policies_concurrent(
        self: &Arc<Self>,
        paths: Vec<PathBuf>,
        filter: Option<Vec<Platform>>,
    ) -> BatchOutput {
        let filter = filter.map(Arc::new);
        let mut tasks = JoinSet::new();
        for (index, path) in paths.iter().cloned().enumerate() {
            let engine = Arc::clone(self);
            let filter = filter.clone();
            tasks.spawn_blocking(move || {
                let outcome = load_filtered(&path, filter.as_deref().map(Vec::as_slice))
                    .map(|policy| policy.map(|policy| engine.process_policy(&policy)));
                (index, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(paths.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => warn!("Generation task failed: {}", err),
            }
        }
        outcomes.sort_by_key(|(index, _)| *index);

        let mut batch = BatchOutput::default();
        for (index, outcome) in outcomes {
            match outcome {
                Ok(Some(output)) => batch.absorb(output),
                Ok(None) => {}
                Err(failure) => batch.failures.push(failure),
            }
            debug!("Folded policy {}/{}", index + 1, paths.len());
        }
        info!(
            "Processed {} policies concurrently: {} generated, {} failures",
            paths.len(),
            batch.results.len(),
            batch.failures.len()
        );
        batch
    }

    /// Write `output_root/<platform>/<scope>/<policy>.<ext>` for every result
    pub fn write_terraform<P: AsRef<Path>>(
        &self,
        results: &GenerationResults,
        output_root: P,
    ) -> Result<WorkspaceManifest> {
        let output_root = output_root.as_ref();
        let mut manifest = WorkspaceManifest::default();

        for (policy, platforms) in results {
            if !is_safe_identifier(policy) {
                return Err(PolicyError::InvalidFormat(format!(
                    "policy name '{policy}' is not a safe file name"
                )));
            }
            for (platform, scopes) in platforms {
                let units = manifest.platforms.entry(*platform).or_default();
                for (scope, text) in scopes {
                    if !is_safe_identifier(scope) {
                        return Err(PolicyError::InvalidFormat(format!(
                            "scope '{scope}' of policy '{policy}' is not a safe directory name"
                        )));
                    }
                    let dir = output_root.join(platform.as_str()).join(scope);
                    std::fs::create_dir_all(&dir)?;
                    let file = dir.join(format!("{policy}.{}", self.options.file_extension));
                    std::fs::write(&file, text)?;
                    debug!("Wrote {}", file.display());
                    units.insert(deployment_unit(
                        &self.options.workspace_prefix,
                        *platform,
                        scope,
                    ));
                }
            }
        }

        Ok(manifest)
    }
}

/// Load, structurally validate and filter one policy file.
///
/// `Ok(None)` means no target survived the filter.
fn load_filtered(
    path: &Path,
    filter: Option<&[Platform]>,
) -> std::result::Result<Option<Policy>, GenerationFailure> {
    let failure = |error: PolicyError| GenerationFailure {
        policy: path.display().to_string(),
        platform: None,
        error,
    };

    let mut policy = Policy::from_yaml_file(path).map_err(failure)?;
    let errors = policy.validate();
    if !errors.is_empty() {
        return Err(failure(PolicyError::validation(policy.name(), errors)));
    }

    if let Some(platforms) = filter {
        policy.retain_platforms(platforms);
    }
    if policy.spec.targets.is_empty() {
        debug!("Policy {} has no targets after filtering", policy.name());
        return Ok(None);
    }
    Ok(Some(policy))
}

/// Header, supporting resources and rule resources as one file
fn combine_terraform(
    supporting: &str,
    main: &str,
    policy: &Policy,
    adapter: &dyn PlatformAdapter,
    scope: &str,
) -> String {
    let mut out = String::new();
    out.push_str(RULE);
    out.push('\n');
    out.push_str("# Auto-generated by netsec. Do not edit by hand.\n");
    out.push_str(&format!("# Policy: {}\n", policy.name()));
    out.push_str(&format!("# Ticket: {}\n", policy.metadata.ticket));
    out.push_str(&format!("# Requestor: {}\n", policy.metadata.requestor));
    out.push_str(&format!(
        "# Platform: {} ({})\n",
        adapter.display_name(),
        adapter.terraform_provider()
    ));
    out.push_str(&format!("# Scope: {scope}\n"));
    out.push_str(RULE);
    out.push_str("\n\n");

    if !supporting.trim().is_empty() {
        out.push_str("# Supporting Resources\n");
        out.push_str(supporting);
        out.push('\n');
    }

    out.push_str("# Policy Resources\n");
    out.push_str(main);
    out
}
