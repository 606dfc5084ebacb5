//! GCP VPC firewall rules (`hashicorp/google`)

use std::{collections::BTreeMap, sync::Arc};

use serde::Deserialize;

use crate::{
    adapter::{
        AdapterConfig, PlatformAdapter, audit_description, endpoint_ranges, group_mapping,
        require_addresses, select_strategy, service_mapping, validate_mappings,
    },
    error::{ObjectKind, Result},
    hcl::{Block, tf_list},
    model::{Action, Platform, Policy, ReferenceKind, ResolvedGroup, ResolvedPolicy, ResolvedService},
    registry::Registry,
};

/// Adapter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GcpSettings {
    /// VPC network per scope (project)
    pub networks: BTreeMap<String, String>,
    /// VPC network for scopes not listed above
    pub default_network: String,
    /// Rule priority
    pub priority: u16,
}

impl Default for GcpSettings {
    fn default() -> Self {
        GcpSettings {
            networks: BTreeMap::new(),
            default_network: "default".to_string(),
            priority: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Strategy {
    #[default]
    CidrOnly,
    NetworkTagPreferred,
    ServiceAccountPreferred,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NetworkTagMapping {
    tag: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServiceAccountMapping {
    email: Option<String>,
}

/// Adapter for GCP firewall rules
pub struct GcpAdapter {
    registry: Arc<Registry>,
    settings: GcpSettings,
}

impl GcpAdapter {
    /// Create the adapter over a shared registry
    pub fn new(registry: Arc<Registry>, config: &AdapterConfig) -> Result<Self> {
        Ok(GcpAdapter {
            registry,
            settings: config.parse(Platform::Gcp)?,
        })
    }

    fn network(&self, scope: &str) -> &str {
        self.settings
            .networks
            .get(scope)
            .map_or(self.settings.default_network.as_str(), String::as_str)
    }

    fn group_strategy(&self, group_name: &str) -> Option<Strategy> {
        let group = self.registry.get_group(group_name).ok()?;
        let mapping = group.mapping(Platform::Gcp)?;
        select_strategy(Platform::Gcp, mapping, ObjectKind::Group, group_name).ok()
    }
}

impl PlatformAdapter for GcpAdapter {
    fn platform(&self) -> Platform {
        Platform::Gcp
    }

    fn display_name(&self) -> &'static str {
        "Google Cloud Platform"
    }

    fn terraform_provider(&self) -> &'static str {
        "hashicorp/google"
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn validate(&self, policy: &Policy) -> Vec<String> {
        let mut errors = validate_mappings(&self.registry, Platform::Gcp, policy);

        let strategies: Vec<Strategy> = policy
            .referenced_groups()
            .iter()
            .filter_map(|name| self.group_strategy(name))
            .collect();
        if strategies.contains(&Strategy::NetworkTagPreferred)
            && strategies.contains(&Strategy::ServiceAccountPreferred)
        {
            errors.push(
                "GCP firewall rules cannot mix network tags and service accounts".to_string(),
            );
        }

        errors
    }

    fn resolve_group(&self, group_name: &str, scope: &str) -> Result<ResolvedGroup> {
        let (group, mapping) = group_mapping(&self.registry, Platform::Gcp, group_name)?;
        let strategy: Strategy =
            select_strategy(Platform::Gcp, &mapping, ObjectKind::Group, group_name)?;
        let members = self.registry.resolve_group_members(&group)?;

        let (reference, kind) = match strategy {
            Strategy::CidrOnly => ("cidr".to_string(), ReferenceKind::Cidr),
            Strategy::NetworkTagPreferred => {
                let tag: NetworkTagMapping = mapping.section("network-tag")?;
                (
                    tag.tag.unwrap_or_else(|| group_name.to_string()),
                    ReferenceKind::NetworkTag,
                )
            }
            Strategy::ServiceAccountPreferred => {
                let account: ServiceAccountMapping = mapping.section("service-account")?;
                (
                    account
                        .email
                        .unwrap_or_else(|| format!("{group_name}@{scope}.iam.gserviceaccount.com")),
                    ReferenceKind::ServiceAccount,
                )
            }
        };

        let resolved = ResolvedGroup {
            name: group_name.to_string(),
            reference,
            kind,
            members,
            supporting_config: String::new(),
        };
        if kind == ReferenceKind::Cidr {
            require_addresses(Platform::Gcp, &resolved)?;
        }
        Ok(resolved)
    }

    fn resolve_service(&self, service_name: &str, _scope: &str) -> Result<ResolvedService> {
        let (service, _) = service_mapping(&self.registry, Platform::Gcp, service_name)?;
        Ok(ResolvedService::from_service(&service))
    }

    fn generate_terraform(&self, policy: &ResolvedPolicy, scope: &str) -> String {
        // Protocols sharing a name collapse into one allow/deny block
        let mut protocols: Vec<(String, Vec<String>, bool)> = Vec::new();
        for service in &policy.services {
            for proto in &service.protocols {
                let name = proto.protocol.to_ascii_lowercase();
                let index = match protocols.iter().position(|(p, ..)| *p == name) {
                    Some(index) => index,
                    None => {
                        protocols.push((name, Vec::new(), false));
                        protocols.len() - 1
                    }
                };
                let entry = &mut protocols[index];
                match proto.port {
                    Some(port) => {
                        let port = port.to_string();
                        if !entry.1.contains(&port) {
                            entry.1.push(port);
                        }
                    }
                    None => entry.2 = true,
                }
            }
        }

        let rule_kind = match policy.action {
            Action::Allow => "allow",
            Action::Deny => "deny",
        };

        let mut rule = Block::resource("google_compute_firewall", &policy.name)
            .string("name", &policy.name)
            .string("network", self.network(scope))
            .string("project", scope)
            .string("description", &audit_description(policy))
            .string("direction", "INGRESS")
            .attr("priority", self.settings.priority.to_string())
            .blank();

        match policy.source.kind {
            ReferenceKind::NetworkTag => {
                rule.push_attr("source_tags", tf_list([&policy.source.reference]))
            }
            ReferenceKind::ServiceAccount => {
                rule.push_attr("source_service_accounts", tf_list([&policy.source.reference]))
            }
            _ => {
                let (ipv4, ipv6) = endpoint_ranges(&policy.source);
                rule.push_attr("source_ranges", tf_list(ipv4.into_iter().chain(ipv6)));
            }
        }
        match policy.destination.kind {
            ReferenceKind::NetworkTag => {
                rule.push_attr("target_tags", tf_list([&policy.destination.reference]))
            }
            ReferenceKind::ServiceAccount => rule.push_attr(
                "target_service_accounts",
                tf_list([&policy.destination.reference]),
            ),
            ReferenceKind::Cidr | ReferenceKind::Host => rule.push_attr(
                "destination_ranges",
                tf_list(policy.destination.members.all_addresses()),
            ),
            _ => {}
        }

        for (protocol, ports, unrestricted) in protocols {
            let mut block = Block::new(rule_kind).string("protocol", &protocol);
            if !unrestricted && !ports.is_empty() {
                block.push_attr("ports", tf_list(&ports));
            }
            rule.push(block);
        }

        if policy.logging {
            rule.push(Block::new("log_config").string("metadata", "INCLUDE_ALL_METADATA"));
        }

        rule.render()
    }
}
