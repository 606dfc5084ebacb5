//! Platform adapter contract
//!
//! Every enforcement platform implements [`PlatformAdapter`]. The engine owns
//! an explicit table of adapters keyed by [`Platform`] and drives each policy
//! through `validate`, `resolve_group`, `resolve_service`,
//! `get_supporting_resources` and `generate_terraform`.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{
    error::{ObjectKind, PolicyError, Result},
    model::{
        Group, Platform, PlatformMapping, Policy, ProtocolDef, ReferenceKind, ResolvedGroup,
        ResolvedPolicy, ResolvedService, Service, ServiceRef,
    },
    registry::Registry,
};

/// Address rendered for the `any` endpoint
pub const ANY_IPV4: &str = "0.0.0.0/0";

/// One enforcement platform's resolution strategies and code emission
pub trait PlatformAdapter: Send + Sync {
    /// Platform this adapter handles
    fn platform(&self) -> Platform;

    /// Human-readable platform name
    fn display_name(&self) -> &'static str;

    /// Terraform provider source address
    fn terraform_provider(&self) -> &'static str;

    /// Registry the adapter resolves against
    fn registry(&self) -> &Registry;

    /// True if any target of the policy names this platform
    fn can_handle(&self, policy: &Policy) -> bool {
        policy.targets_platform(self.platform())
    }

    /// Resolve a registry group into this platform's representation
    fn resolve_group(&self, group_name: &str, scope: &str) -> Result<ResolvedGroup>;

    /// Resolve a registry service into this platform's representation
    fn resolve_service(&self, service_name: &str, scope: &str) -> Result<ResolvedService>;

    /// Platform preconditions; every violation is returned, none is raised
    fn validate(&self, policy: &Policy) -> Vec<String> {
        validate_mappings(self.registry(), self.platform(), policy)
    }

    /// Render the rule resources; must not consult the registry
    fn generate_terraform(&self, policy: &ResolvedPolicy, scope: &str) -> String;

    /// Supporting text captured on the resolved source and destination
    fn get_supporting_resources(&self, policy: &ResolvedPolicy, _scope: &str) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for group in [&policy.source, &policy.destination] {
            let text = group.supporting_config.as_str();
            // A group on both sides contributes its objects once
            if !text.trim().is_empty() && !parts.contains(&text) {
                parts.push(text);
            }
        }
        parts.join("\n")
    }
}

/// Free-form adapter settings taken from the generator configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdapterConfig(serde_yaml::Value);

impl AdapterConfig {
    /// Wrap a raw settings value
    pub fn new(value: serde_yaml::Value) -> Self {
        AdapterConfig(value)
    }

    /// Raw settings value
    pub fn value(&self) -> &serde_yaml::Value {
        &self.0
    }

    /// Deserialize into an adapter's typed settings; absent settings yield `T::default()`
    pub fn parse<T: DeserializeOwned + Default>(&self, platform: Platform) -> Result<T> {
        if self.0.is_null() {
            return Ok(T::default());
        }
        serde_yaml::from_value(self.0.clone()).map_err(|e| {
            PolicyError::InvalidFormat(format!("Invalid {platform} adapter settings: {e}"))
        })
    }
}

impl From<serde_yaml::Value> for AdapterConfig {
    fn from(value: serde_yaml::Value) -> Self {
        AdapterConfig(value)
    }
}

/// Look up a group and its mapping for `platform`; a missing mapping is an error
pub fn group_mapping(
    registry: &Registry,
    platform: Platform,
    group_name: &str,
) -> Result<(Arc<Group>, PlatformMapping)> {
    let group = registry.get_group(group_name)?;
    let mapping = group
        .mapping(platform)
        .cloned()
        .ok_or_else(|| PolicyError::MissingPlatformMapping {
            platform: platform.to_string(),
            kind: ObjectKind::Group,
            name: group_name.to_string(),
        })?;
    Ok((group, mapping))
}

/// Look up a service and its optional mapping for `platform`
pub fn service_mapping(
    registry: &Registry,
    platform: Platform,
    service_name: &str,
) -> Result<(Arc<Service>, PlatformMapping)> {
    let service = registry.get_service(service_name)?;
    let mapping = service.mapping(platform).cloned().unwrap_or_default();
    Ok((service, mapping))
}

/// Parse the mapping's `strategy` into the adapter's strategy enum.
///
/// An absent key selects the adapter default; a name the adapter does not
/// implement is [`PolicyError::StrategyNotImplemented`].
pub fn select_strategy<S>(
    platform: Platform,
    mapping: &PlatformMapping,
    kind: ObjectKind,
    name: &str,
) -> Result<S>
where
    S: DeserializeOwned + Default,
{
    match &mapping.strategy {
        None => Ok(S::default()),
        Some(strategy) => serde_yaml::from_value(serde_yaml::Value::String(strategy.clone()))
            .map_err(|_| PolicyError::StrategyNotImplemented {
                platform: platform.to_string(),
                strategy: strategy.clone(),
                kind,
                name: name.to_string(),
            }),
    }
}

/// Every referenced group exists and declares a mapping for `platform`;
/// every named service exists
pub fn validate_mappings(registry: &Registry, platform: Platform, policy: &Policy) -> Vec<String> {
    let mut errors = Vec::new();

    for group_name in policy.referenced_groups() {
        match registry.get_group(&group_name) {
            Ok(group) if group.mapping(platform).is_none() => {
                errors.push(format!(
                    "Group '{group_name}' has no {platform} platform mapping"
                ));
            }
            Ok(_) => {}
            Err(e) => errors.push(format!("Failed to load group '{group_name}': {e}")),
        }
    }

    for host_name in policy.referenced_hosts() {
        if !registry.contains_host(&host_name) {
            errors.push(format!("Host not found: {host_name}"));
        }
    }

    for service in &policy.spec.services {
        if let ServiceRef::Named(name) = service
            && !registry.contains_service(name)
        {
            errors.push(format!("Service not found: {name}"));
        }
    }

    errors
}

/// IPv4 and IPv6 ranges for an address-based rule side.
///
/// Only `any` widens to `0.0.0.0/0`; named endpoints are checked with
/// [`require_addresses`] when they are resolved.
pub fn endpoint_ranges(group: &ResolvedGroup) -> (Vec<String>, Vec<String>) {
    if group.kind == ReferenceKind::Any {
        (vec![ANY_IPV4.to_string()], Vec::new())
    } else {
        (group.members.all_ipv4(), group.members.all_ipv6())
    }
}

/// Fail when a group or host endpoint has no IP address to render
pub fn require_addresses(platform: Platform, group: &ResolvedGroup) -> Result<()> {
    let kind = match group.kind {
        ReferenceKind::Any => return Ok(()),
        ReferenceKind::Host => ObjectKind::Host,
        _ => ObjectKind::Group,
    };
    if group.members.has_addresses() {
        Ok(())
    } else {
        Err(PolicyError::EmptyEndpoint {
            platform: platform.to_string(),
            kind,
            name: group.name.clone(),
        })
    }
}

/// Number of rule resources a policy expands to (one per protocol definition)
pub fn rule_count(registry: &Registry, policy: &Policy) -> usize {
    policy
        .spec
        .services
        .iter()
        .map(|service| match service {
            ServiceRef::Named(name) => registry
                .get_service(name)
                .map(|s| s.spec.protocols.len())
                .unwrap_or(0),
            ServiceRef::Inline(_) => 1,
        })
        .sum()
}

/// `"<description> - <ticket>"`, or just the ticket without a description
pub fn audit_description(policy: &ResolvedPolicy) -> String {
    if policy.description.trim().is_empty() {
        policy.ticket.clone()
    } else {
        format!("{} - {}", policy.description, policy.ticket)
    }
}

/// Every protocol of every service with its `(service, protocol)` position
pub fn protocol_rules(policy: &ResolvedPolicy) -> impl Iterator<Item = (usize, usize, &ProtocolDef)> {
    policy.services.iter().enumerate().flat_map(|(i, service)| {
        service
            .protocols
            .iter()
            .enumerate()
            .map(move |(j, protocol)| (i, j, protocol))
    })
}
