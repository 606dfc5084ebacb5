//! Immutable store of hosts, groups and services
//!
//! The registry is loaded once from a directory tree and then shared as
//! `Arc<Registry>`. Group resolution flattens static, literal, label-matched
//! and nested members into a [`ResolvedMembers`] value.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{
    error::{ObjectKind, PolicyError, Result},
    model::{Endpoint, Group, Host, Policy, ResolvedMembers, Service, ServiceRef, parse_document, strip_host_prefix},
};

/// Subdirectory holding host documents
pub const HOSTS_DIR: &str = "hosts";
/// Subdirectory holding group documents
pub const GROUPS_DIR: &str = "groups";
/// Subdirectory holding service documents
pub const SERVICES_DIR: &str = "services";

/// Central store of canonical network objects
#[derive(Debug, Default)]
pub struct Registry {
    root: Option<PathBuf>,
    hosts: BTreeMap<String, Arc<Host>>,
    groups: BTreeMap<String, Arc<Group>>,
    services: BTreeMap<String, Arc<Service>>,
}

impl Registry {
    /// Load every document under `root/{hosts,groups,services}`.
    ///
    /// A missing category directory is an empty category. Any unreadable
    /// document or duplicate name fails the whole load.
    pub fn load<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(PolicyError::registry(root, "registry directory does not exist"));
        }

        let hosts = load_category(&root.join(HOSTS_DIR), ObjectKind::Host, |h: &Host| {
            (&h.api_version, &h.kind, &h.metadata.name)
        })?;
        let groups = load_category(&root.join(GROUPS_DIR), ObjectKind::Group, |g: &Group| {
            (&g.api_version, &g.kind, &g.metadata.name)
        })?;
        let services = load_category(
            &root.join(SERVICES_DIR),
            ObjectKind::Service,
            |s: &Service| (&s.api_version, &s.kind, &s.metadata.name),
        )?;

        debug!(
            "Loaded registry {}: {} hosts, {} groups, {} services",
            root.display(),
            hosts.len(),
            groups.len(),
            services.len()
        );

        Ok(Registry {
            root: Some(root.to_path_buf()),
            hosts,
            groups,
            services,
        })
    }

    /// Build a registry from in-memory objects; later duplicates are rejected
    pub fn from_objects(
        hosts: impl IntoIterator<Item = Host>,
        groups: impl IntoIterator<Item = Group>,
        services: impl IntoIterator<Item = Service>,
    ) -> Result<Self> {
        let mut registry = Registry::default();
        for host in hosts {
            insert_unique(&mut registry.hosts, host.metadata.name.clone(), host, ObjectKind::Host)?;
        }
        for group in groups {
            insert_unique(&mut registry.groups, group.metadata.name.clone(), group, ObjectKind::Group)?;
        }
        for service in services {
            insert_unique(
                &mut registry.services,
                service.metadata.name.clone(),
                service,
                ObjectKind::Service,
            )?;
        }
        Ok(registry)
    }

    /// Directory the registry was loaded from
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Look up a host; a `host/` prefix is accepted
    pub fn get_host(&self, name: &str) -> Result<Arc<Host>> {
        let name = strip_host_prefix(name);
        self.hosts
            .get(name)
            .cloned()
            .ok_or_else(|| PolicyError::not_found(ObjectKind::Host, name))
    }

    /// Look up a group
    pub fn get_group(&self, name: &str) -> Result<Arc<Group>> {
        self.groups
            .get(name)
            .cloned()
            .ok_or_else(|| PolicyError::not_found(ObjectKind::Group, name))
    }

    /// Look up a service
    pub fn get_service(&self, name: &str) -> Result<Arc<Service>> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| PolicyError::not_found(ObjectKind::Service, name))
    }

    /// True if a host with this name (or `host/` prefixed name) exists
    pub fn contains_host(&self, name: &str) -> bool {
        self.hosts.contains_key(strip_host_prefix(name))
    }

    /// True if a group with this name exists
    pub fn contains_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// True if a service with this name exists
    pub fn contains_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// All hosts in name order
    pub fn hosts(&self) -> impl Iterator<Item = &Arc<Host>> {
        self.hosts.values()
    }

    /// All groups in name order
    pub fn groups(&self) -> impl Iterator<Item = &Arc<Group>> {
        self.groups.values()
    }

    /// All services in name order
    pub fn services(&self) -> impl Iterator<Item = &Arc<Service>> {
        self.services.values()
    }

    /// Flatten a group into concrete hosts and networks.
    ///
    /// Order: static hosts, literal networks, label matches in host name
    /// order, then nested groups. Static hosts that do not exist are skipped.
    /// A missing nested group or a nesting cycle is an error.
    pub fn resolve_group_members(&self, group: &Group) -> Result<ResolvedMembers> {
        let mut path = Vec::new();
        self.resolve_visiting(group, &mut path)
    }

    fn resolve_visiting(&self, group: &Group, path: &mut Vec<String>) -> Result<ResolvedMembers> {
        let name = group.name().to_string();
        if let Some(start) = path.iter().position(|visited| *visited == name) {
            let mut cycle = path[start..].to_vec();
            cycle.push(name);
            return Err(PolicyError::CyclicMembership { cycle });
        }
        path.push(name);

        let membership = &group.spec.membership;
        let mut members = ResolvedMembers::default();

        for host_ref in &membership.static_hosts {
            match self.get_host(host_ref) {
                Ok(host) => members.add_host(host),
                Err(_) => warn!(
                    "Group {} references unknown host {}, skipping",
                    group.name(),
                    host_ref
                ),
            }
        }

        for network in &membership.networks {
            members.add_network(network.as_str());
        }

        if let Some(dynamic) = &membership.dynamic {
            for host in self.hosts.values() {
                if dynamic.matches(host.labels()) {
                    members.add_host(Arc::clone(host));
                }
            }
        }

        for nested_name in &membership.groups {
            let nested = self.get_group(nested_name)?;
            let nested_members = self.resolve_visiting(&nested, path)?;
            members.merge(nested_members);
        }

        path.pop();
        Ok(members)
    }

    /// Every dangling reference of a policy, one message each
    pub fn validate_policy_references(&self, policy: &Policy) -> Vec<String> {
        let mut errors = Vec::new();

        for (side, endpoint) in [
            ("Source", &policy.spec.source),
            ("Destination", &policy.spec.destination),
        ] {
            match endpoint {
                Endpoint::Group(name) if !self.contains_group(name) => {
                    errors.push(format!("{side} group not found: {name}"));
                }
                Endpoint::Host(name) if !self.contains_host(name) => {
                    errors.push(format!("{side} host not found: {name}"));
                }
                _ => {}
            }
        }

        for service in &policy.spec.services {
            if let ServiceRef::Named(name) = service
                && !self.contains_service(name)
            {
                errors.push(format!("Service not found: {name}"));
            }
        }

        errors
    }

    /// Dangling static hosts, dangling nested groups and nesting cycles of a group
    pub fn validate_group_references(&self, group: &Group) -> Vec<String> {
        let membership = &group.spec.membership;
        let mut errors: Vec<String> = membership
            .static_hosts
            .iter()
            .filter(|host| !self.contains_host(host))
            .map(|host| format!("Group {} references unknown host: {host}", group.name()))
            .collect();

        let mut nested_missing = false;
        for nested in &membership.groups {
            if !self.contains_group(nested) {
                nested_missing = true;
                errors.push(format!(
                    "Group {} references unknown group: {nested}",
                    group.name()
                ));
            }
        }

        if !nested_missing
            && let Err(err @ PolicyError::CyclicMembership { .. }) =
                self.resolve_group_members(group)
        {
            errors.push(err.to_string());
        }

        errors
    }

    /// Group reference errors for every group that has any, keyed by group name
    pub fn validate_references(&self) -> BTreeMap<String, Vec<String>> {
        self.groups
            .values()
            .filter_map(|group| {
                let errors = self.validate_group_references(group);
                (!errors.is_empty()).then(|| (group.name().to_string(), errors))
            })
            .collect()
    }

    /// Groups whose dynamic clause selects this host
    pub fn find_groups_matching_host(&self, host: &Host) -> Vec<Arc<Group>> {
        self.groups
            .values()
            .filter(|group| group.matches_labels(host.labels()))
            .cloned()
            .collect()
    }

    /// Groups listing this host statically
    pub fn groups_referencing_host(&self, name: &str) -> Vec<Arc<Group>> {
        let name = strip_host_prefix(name);
        self.groups
            .values()
            .filter(|group| {
                group
                    .spec
                    .membership
                    .static_hosts
                    .iter()
                    .any(|host| strip_host_prefix(host) == name)
            })
            .cloned()
            .collect()
    }

    /// Groups that nest `group` directly
    pub fn groups_nesting(&self, group: &str) -> Vec<Arc<Group>> {
        self.groups
            .values()
            .filter(|candidate| candidate.spec.membership.groups.iter().any(|g| g == group))
            .cloned()
            .collect()
    }
}

/// Recursively collect `*.yaml` and `*.yml` files under `dir`, sorted.
///
/// A missing directory yields an empty list.
pub fn collect_documents<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    if dir.is_dir() {
        walk(dir, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else if is_yaml(&path) {
            files.push(path);
        }
    }
    Ok(())
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn load_category<T, F>(dir: &Path, kind: ObjectKind, header: F) -> Result<BTreeMap<String, Arc<T>>>
where
    T: DeserializeOwned,
    F: Fn(&T) -> (&String, &String, &String),
{
    let mut objects = BTreeMap::new();
    for path in collect_documents(dir)? {
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| PolicyError::registry(&path, e.to_string()))?;
        let object: T = parse_document(&contents, kind, |doc: &T| {
            let (api_version, found_kind, _) = header(doc);
            (api_version.as_str(), found_kind.as_str())
        })
        .map_err(|e| PolicyError::registry(&path, e.to_string()))?;

        let name = header(&object).2.clone();
        if objects.contains_key(&name) {
            return Err(PolicyError::registry(
                &path,
                format!("duplicate {kind} name: {name}"),
            ));
        }
        debug!("Loaded {} {} from {}", kind, name, path.display());
        objects.insert(name, Arc::new(object));
    }
    Ok(objects)
}

fn insert_unique<T>(
    table: &mut BTreeMap<String, Arc<T>>,
    name: String,
    object: T,
    kind: ObjectKind,
) -> Result<()> {
    if table.contains_key(&name) {
        return Err(PolicyError::InvalidFormat(format!(
            "duplicate {kind} name: {name}"
        )));
    }
    table.insert(name, Arc::new(object));
    Ok(())
}
