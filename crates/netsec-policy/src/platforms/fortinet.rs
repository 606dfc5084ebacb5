//! Fortinet FortiGate / FortiManager (`fortinetdev/fortios`)

use std::{collections::BTreeMap, sync::Arc};

use serde::Deserialize;

use crate::{
    adapter::{
        AdapterConfig, PlatformAdapter, audit_description, group_mapping, select_strategy,
        service_mapping,
    },
    error::{ObjectKind, PolicyError, Result},
    hcl::{Block, join_blocks, tf_name},
    model::{
        Action, Platform, ReferenceKind, ResolvedGroup, ResolvedMembers, ResolvedPolicy,
        ResolvedService,
    },
    registry::Registry,
};

const MANAGED: &str = "Managed by policy-as-code";

/// Interfaces a policy binds to within one scope
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InterfaceSettings {
    /// Ingress interfaces
    pub source: Vec<String>,
    /// Egress interfaces
    pub destination: Vec<String>,
}

impl Default for InterfaceSettings {
    fn default() -> Self {
        InterfaceSettings {
            source: vec!["any".to_string()],
            destination: vec!["any".to_string()],
        }
    }
}

/// Adapter settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FortinetSettings {
    /// Interfaces per scope (device or VDOM)
    pub interfaces: BTreeMap<String, InterfaceSettings>,
    /// Interfaces for scopes not listed above
    pub default_interfaces: InterfaceSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Strategy {
    #[default]
    AddressGroup,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AddressGroupSection {
    name: Option<String>,
}

/// Adapter for Fortinet firewalls
pub struct FortinetAdapter {
    registry: Arc<Registry>,
    settings: FortinetSettings,
}

impl FortinetAdapter {
    /// Create the adapter over a shared registry
    pub fn new(registry: Arc<Registry>, config: &AdapterConfig) -> Result<Self> {
        Ok(FortinetAdapter {
            registry,
            settings: config.parse(Platform::Fortinet)?,
        })
    }

    fn interfaces(&self, scope: &str) -> &InterfaceSettings {
        self.settings
            .interfaces
            .get(scope)
            .unwrap_or(&self.settings.default_interfaces)
    }
}

fn ipmask(name: &str, subnet: &str, comment: &str) -> Block {
    Block::resource("fortios_firewall_address", name)
        .string("name", name)
        .string("type", "ipmask")
        .string("subnet", subnet)
        .string("comment", comment)
}

fn with_prefix(address: &str) -> String {
    if address.contains('/') {
        address.to_string()
    } else {
        format!("{address}/32")
    }
}

/// Address objects for networks, host addresses and host FQDNs
fn address_objects(owner: &str, members: &ResolvedMembers) -> Vec<(String, Block)> {
    let mut objects: Vec<(String, Block)> = Vec::new();

    for (i, network) in members.networks.iter().enumerate() {
        let name = format!("net-{owner}-{i}");
        let block = ipmask(&name, &with_prefix(network), &format!("Network for {owner} - {MANAGED}"));
        objects.push((name, block));
    }

    for host in &members.hosts {
        for (k, ip) in host.spec.addresses.ipv4.iter().enumerate() {
            let name = if k == 0 {
                format!("host-{}", host.name())
            } else {
                format!("host-{}-{k}", host.name())
            };
            if objects.iter().any(|(n, _)| *n == name) {
                continue;
            }
            let block = ipmask(&name, &with_prefix(ip), &format!("Host {} - {MANAGED}", host.name()));
            objects.push((name, block));
        }
        for (k, fqdn) in host.spec.addresses.fqdn.iter().enumerate() {
            let name = if k == 0 {
                format!("fqdn-{}", host.name())
            } else {
                format!("fqdn-{}-{k}", host.name())
            };
            if objects.iter().any(|(n, _)| *n == name) {
                continue;
            }
            let block = Block::resource("fortios_firewall_address", &name)
                .string("name", &name)
                .string("type", "fqdn")
                .string("fqdn", fqdn)
                .string("comment", &format!("FQDN for {} - {MANAGED}", host.name()));
            objects.push((name, block));
        }
    }

    objects
}

/// Owner label for literal endpoints, usable in object names
fn literal_owner(group: &ResolvedGroup) -> String {
    group.name.replace(['/', ':'], "-")
}

/// Address names a rule side refers to
fn rule_addresses(group: &ResolvedGroup) -> Vec<String> {
    match group.kind {
        ReferenceKind::Any => vec!["all".to_string()],
        ReferenceKind::Cidr | ReferenceKind::Host => {
            address_objects(&literal_owner(group), &group.members)
                .into_iter()
                .map(|(name, _)| name)
                .collect()
        }
        _ => vec![group.reference.clone()],
    }
}

/// Custom service objects for port-based services without a predefined name
fn custom_services(policy: &ResolvedPolicy) -> BTreeMap<String, (String, String)> {
    let mut services = BTreeMap::new();
    for service in policy.services.iter().filter(|s| s.service_reference.is_none()) {
        for proto in &service.protocols {
            let protocol = proto.protocol.to_ascii_lowercase();
            if let (Some(port), "tcp" | "udp") = (proto.port, protocol.as_str()) {
                let range = port.to_string();
                services.insert(
                    format!("{}_{range}", protocol.to_ascii_uppercase()),
                    (protocol, range),
                );
            }
        }
    }
    services
}

/// Service names a policy matches, in declaration order
fn service_names(policy: &ResolvedPolicy) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !names.contains(&name) {
            names.push(name);
        }
    };

    for service in &policy.services {
        if let Some(reference) = &service.service_reference {
            push(reference.clone());
            continue;
        }
        for proto in &service.protocols {
            let protocol = proto.protocol.to_ascii_lowercase();
            match (protocol.as_str(), proto.port) {
                ("tcp" | "udp", Some(port)) => {
                    push(format!("{}_{port}", protocol.to_ascii_uppercase()))
                }
                ("tcp", None) => push("ALL_TCP".to_string()),
                ("udp", None) => push("ALL_UDP".to_string()),
                ("icmp", _) => push("ALL_ICMP".to_string()),
                _ => push("ALL".to_string()),
            }
        }
    }

    if names.is_empty() {
        names.push("ALL".to_string());
    }
    names
}

fn name_blocks(kind: &str, names: &[String]) -> Vec<Block> {
    names
        .iter()
        .map(|name| Block::new(kind).string("name", name))
        .collect()
}

impl PlatformAdapter for FortinetAdapter {
    fn platform(&self) -> Platform {
        Platform::Fortinet
    }

    fn display_name(&self) -> &'static str {
        "Fortinet"
    }

    fn terraform_provider(&self) -> &'static str {
        "fortinetdev/fortios"
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn resolve_group(&self, group_name: &str, _scope: &str) -> Result<ResolvedGroup> {
        let (group, mapping) = group_mapping(&self.registry, Platform::Fortinet, group_name)?;
        let Strategy::AddressGroup =
            select_strategy(Platform::Fortinet, &mapping, ObjectKind::Group, group_name)?;
        let members = self.registry.resolve_group_members(&group)?;

        let section: AddressGroupSection = mapping.section("address-group")?;
        let group_object = section.name.unwrap_or_else(|| format!("grp-{group_name}"));

        let objects = address_objects(group_name, &members);
        let mut blocks: Vec<Block> = Vec::with_capacity(objects.len() + 1);
        let mut member_names = Vec::with_capacity(objects.len());
        for (name, block) in objects {
            member_names.push(name);
            blocks.push(block);
        }
        // IPv6 members have no `fortios_firewall_address` form
        if member_names.is_empty() {
            return Err(PolicyError::EmptyEndpoint {
                platform: Platform::Fortinet.to_string(),
                kind: ObjectKind::Group,
                name: group_name.to_string(),
            });
        }
        let members_block = member_names.iter().map(|name| {
            Block::new("member")
                .attr("name", format!("fortios_firewall_address.{}.name", tf_name(name)))
        });
        blocks.push(
            Block::resource("fortios_firewall_addrgrp", &group_object)
                .string("name", &group_object)
                .string("comment", &format!("Address Group: {group_name} - {MANAGED}"))
                .children(members_block),
        );

        Ok(ResolvedGroup {
            name: group_name.to_string(),
            reference: group_object,
            kind: ReferenceKind::AddressGroup,
            members,
            supporting_config: join_blocks(blocks),
        })
    }

    fn resolve_service(&self, service_name: &str, _scope: &str) -> Result<ResolvedService> {
        let (service, mapping) = service_mapping(&self.registry, Platform::Fortinet, service_name)?;
        let mut resolved = ResolvedService::from_service(&service);
        resolved.service_reference = mapping.section("service-name")?;
        Ok(resolved)
    }

    fn get_supporting_resources(&self, policy: &ResolvedPolicy, _scope: &str) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut literal_names: Vec<String> = Vec::new();

        for group in [&policy.source, &policy.destination] {
            if matches!(group.kind, ReferenceKind::Cidr | ReferenceKind::Host) {
                let owner = literal_owner(group);
                let blocks = address_objects(&owner, &group.members)
                    .into_iter()
                    .filter(|(name, _)| {
                        let fresh = !literal_names.contains(name);
                        if fresh {
                            literal_names.push(name.clone());
                        }
                        fresh
                    })
                    .map(|(_, block)| block);
                let text = join_blocks(blocks);
                if !text.is_empty() {
                    parts.push(text);
                }
            } else if !group.supporting_config.trim().is_empty()
                && !parts.contains(&group.supporting_config)
            {
                parts.push(group.supporting_config.clone());
            }
        }

        let services = custom_services(policy)
            .into_iter()
            .map(|(name, (protocol, range))| {
                Block::resource("fortios_firewallservice_custom", &name)
                    .string("name", &name)
                    .string("protocol", "TCP/UDP/SCTP")
                    .string(&format!("{protocol}_portrange"), &range)
                    .string("comment", MANAGED)
            })
            .collect::<Vec<_>>();
        if !services.is_empty() {
            parts.push(join_blocks(services));
        }

        parts.join("\n")
    }

    fn generate_terraform(&self, policy: &ResolvedPolicy, scope: &str) -> String {
        let interfaces = self.interfaces(scope);
        let action = match policy.action {
            Action::Allow => "accept",
            Action::Deny => "deny",
        };
        let logtraffic = if policy.logging { "all" } else { "disable" };

        Block::resource("fortios_firewall_policy", &policy.name)
            .string("name", &policy.name)
            .string("action", action)
            .string("schedule", "always")
            .children(name_blocks("srcintf", &interfaces.source))
            .children(name_blocks("dstintf", &interfaces.destination))
            .children(name_blocks("srcaddr", &rule_addresses(&policy.source)))
            .children(name_blocks("dstaddr", &rule_addresses(&policy.destination)))
            .children(name_blocks("service", &service_names(policy)))
            .blank()
            .string("logtraffic", logtraffic)
            .string("comments", &audit_description(policy))
            .string("nat", "disable")
            .render()
    }
}
