//! Illumio Policy Compute Engine (`illumio/illumio-core`)

use std::{collections::BTreeMap, net::Ipv4Addr, sync::Arc};

use serde::Deserialize;

use crate::{
    adapter::{
        AdapterConfig, PlatformAdapter, audit_description, group_mapping, require_addresses,
        select_strategy, service_mapping, validate_mappings,
    },
    error::{ObjectKind, Result},
    hcl::{Block, join_blocks, protocol_number, tf_name},
    model::{
        Platform, Policy, ReferenceKind, ResolvedGroup, ResolvedMembers, ResolvedPolicy,
        ResolvedService, ServiceRef,
    },
    registry::Registry,
};

/// A label key/value pair
#[derive(Debug, Clone, Deserialize)]
pub struct LabelSpec {
    /// Label key (`app`, `env`, `role`, `loc`)
    #[serde(default = "default_label_key")]
    pub key: String,
    /// Label value; defaults to the group name
    #[serde(default)]
    pub value: Option<String>,
}

fn default_label_key() -> String {
    "app".to_string()
}

/// Adapter settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IllumioSettings {
    /// Labels scoping the rule set, per scope (PCE org or app boundary)
    pub scope_labels: BTreeMap<String, Vec<LabelSpec>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Strategy {
    #[default]
    LabelBased,
    IpList,
    Hybrid,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IpListSection {
    name: Option<String>,
}

/// Adapter for Illumio PCE rule sets
pub struct IllumioAdapter {
    registry: Arc<Registry>,
    settings: IllumioSettings,
}

impl IllumioAdapter {
    /// Create the adapter over a shared registry
    pub fn new(registry: Arc<Registry>, config: &AdapterConfig) -> Result<Self> {
        Ok(IllumioAdapter {
            registry,
            settings: config.parse(Platform::Illumio)?,
        })
    }
}

/// Label lookups and their hrefs
fn label_lookups(owner: &str, labels: &[LabelSpec]) -> (Vec<Block>, Vec<String>) {
    labels
        .iter()
        .map(|label| {
            let value = label.value.clone().unwrap_or_else(|| owner.to_string());
            let data_name = format!("label_{}_{}", tf_name(owner), tf_name(&label.key));
            let block = Block::data("illumio-core_labels", &data_name)
                .string("key", &label.key)
                .string("value", &value);
            let href = format!("data.illumio-core_labels.{}.items[0].href", tf_name(&data_name));
            (block, href)
        })
        .unzip()
}

/// IPv4 network and broadcast addresses of a CIDR
fn ipv4_bounds(cidr: &str) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let (addr, prefix) = cidr.split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix: u32 = prefix.parse().ok()?;
    if prefix > 32 {
        return None;
    }
    let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
    let network = u32::from(addr) & mask;
    Some((Ipv4Addr::from(network), Ipv4Addr::from(network | !mask)))
}

fn ip_list(name: &str, owner: &str, members: &ResolvedMembers) -> Block {
    let ranges = members.all_addresses().into_iter().map(|address| {
        let range = Block::new("ip_ranges");
        match ipv4_bounds(&address) {
            Some((from, to)) => range
                .string("from_ip", &from.to_string())
                .string("to_ip", &to.to_string()),
            None => range.string("from_ip", &address),
        }
    });
    Block::resource("illumio-core_ip_list", name)
        .string("name", name)
        .string("description", &format!("IP List for {owner} - Managed by policy-as-code"))
        .children(ranges)
}

fn ip_list_href(name: &str) -> String {
    format!("illumio-core_ip_list.{}.href", tf_name(name))
}

/// Name of the IP list generated for a literal endpoint
fn literal_ip_list(group: &ResolvedGroup) -> String {
    format!("ipl-{}", group.name.replace(['/', ':'], "-"))
}

/// Actor blocks (`providers` or `consumers`) for one rule side
fn actors(kind: &str, group: &ResolvedGroup) -> Vec<Block> {
    let labels = |reference: &str| -> Vec<Block> {
        reference
            .split(',')
            .filter(|href| !href.is_empty() && !href.starts_with("illumio-core_ip_list."))
            .map(|href| Block::new(kind).child(Block::new("label").attr("href", href)))
            .collect()
    };
    let ip_lists = |reference: &str| -> Vec<Block> {
        reference
            .split(',')
            .filter(|href| href.starts_with("illumio-core_ip_list."))
            .map(|href| Block::new(kind).child(Block::new("ip_list").attr("href", href)))
            .collect()
    };

    match group.kind {
        ReferenceKind::Label => labels(&group.reference),
        ReferenceKind::IpList => ip_lists(&group.reference),
        ReferenceKind::Hybrid => {
            let mut blocks = labels(&group.reference);
            blocks.extend(ip_lists(&group.reference));
            blocks
        }
        ReferenceKind::Cidr | ReferenceKind::Host => vec![
            Block::new(kind)
                .child(Block::new("ip_list").attr("href", ip_list_href(&literal_ip_list(group)))),
        ],
        _ => vec![Block::new(kind).string("actors", "ams")],
    }
}

impl PlatformAdapter for IllumioAdapter {
    fn platform(&self) -> Platform {
        Platform::Illumio
    }

    fn display_name(&self) -> &'static str {
        "Illumio"
    }

    fn terraform_provider(&self) -> &'static str {
        "illumio/illumio-core"
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn validate(&self, policy: &Policy) -> Vec<String> {
        let mut errors = validate_mappings(&self.registry, Platform::Illumio, policy);

        let mut protocols: Vec<String> = Vec::new();
        for service in &policy.spec.services {
            match service {
                ServiceRef::Named(name) => {
                    if let Ok(service) = self.registry.get_service(name) {
                        protocols.extend(service.spec.protocols.iter().map(|p| p.protocol.clone()));
                    }
                }
                ServiceRef::Inline(inline) => protocols.push(inline.protocol.clone()),
            }
        }
        for protocol in protocols {
            if protocol_number(&protocol).is_none() {
                errors.push(format!("Illumio rules do not support protocol '{protocol}'"));
            }
        }

        errors
    }

    fn resolve_group(&self, group_name: &str, _scope: &str) -> Result<ResolvedGroup> {
        let (group, mapping) = group_mapping(&self.registry, Platform::Illumio, group_name)?;
        let strategy: Strategy =
            select_strategy(Platform::Illumio, &mapping, ObjectKind::Group, group_name)?;
        let members = self.registry.resolve_group_members(&group)?;

        let mut labels: Vec<LabelSpec> = mapping.section("labels")?;
        if labels.is_empty() {
            labels.push(LabelSpec {
                key: default_label_key(),
                value: None,
            });
        }
        let section: IpListSection = mapping.section("ip-list")?;
        let list_name = section.name.unwrap_or_else(|| format!("ipl-{group_name}"));

        let (reference, kind, blocks) = match strategy {
            Strategy::LabelBased => {
                let (blocks, hrefs) = label_lookups(group_name, &labels);
                (hrefs.join(","), ReferenceKind::Label, blocks)
            }
            Strategy::IpList => (
                ip_list_href(&list_name),
                ReferenceKind::IpList,
                vec![ip_list(&list_name, group_name, &members)],
            ),
            Strategy::Hybrid => {
                let (mut blocks, mut hrefs) = label_lookups(group_name, &labels);
                blocks.push(ip_list(&list_name, group_name, &members));
                hrefs.push(ip_list_href(&list_name));
                (hrefs.join(","), ReferenceKind::Hybrid, blocks)
            }
        };

        let resolved = ResolvedGroup {
            name: group_name.to_string(),
            reference,
            kind,
            members,
            supporting_config: join_blocks(blocks),
        };
        if kind == ReferenceKind::IpList {
            require_addresses(Platform::Illumio, &resolved)?;
        }
        Ok(resolved)
    }

    fn resolve_service(&self, service_name: &str, _scope: &str) -> Result<ResolvedService> {
        let (service, _) = service_mapping(&self.registry, Platform::Illumio, service_name)?;
        Ok(ResolvedService::from_service(&service))
    }

    fn get_supporting_resources(&self, policy: &ResolvedPolicy, _scope: &str) -> String {
        let mut parts: Vec<String> = Vec::new();
        for group in [&policy.source, &policy.destination] {
            let text = if matches!(group.kind, ReferenceKind::Cidr | ReferenceKind::Host) {
                ip_list(&literal_ip_list(group), &group.name, &group.members).render()
            } else {
                group.supporting_config.clone()
            };
            if !text.trim().is_empty() && !parts.contains(&text) {
                parts.push(text);
            }
        }
        parts.join("\n")
    }

    fn generate_terraform(&self, policy: &ResolvedPolicy, scope: &str) -> String {
        let mut scope_lookups = Vec::new();
        let mut scopes = Block::new("scopes");
        if let Some(labels) = self.settings.scope_labels.get(scope) {
            let (blocks, hrefs) = label_lookups(&format!("scope-{scope}"), labels);
            scope_lookups = blocks;
            for href in hrefs {
                scopes.push(Block::new("label").attr("href", href));
            }
        }

        let services = policy.services.iter().flat_map(|service| {
            service.protocols.iter().map(|proto| {
                let number = protocol_number(&proto.protocol).unwrap_or(6);
                let mut block = Block::new("ingress_services").attr("proto", number.to_string());
                if let Some(port) = proto.port {
                    block.push_attr("port", port.from_port().to_string());
                    if port.to_port() != port.from_port() {
                        block.push_attr("to_port", port.to_port().to_string());
                    }
                }
                block
            })
        });

        let rule = Block::new("rule")
            .attr("enabled", "true")
            .string("description", &policy.description)
            .attr("resolve_labels_as_workloads", "true")
            .children(actors("providers", &policy.destination))
            .children(actors("consumers", &policy.source))
            .children(services);

        let rule_set = Block::resource("illumio-core_rule_set", &policy.name)
            .string("name", &policy.name)
            .string("description", &audit_description(policy))
            .attr("enabled", "true")
            .child(scopes)
            .child(rule);

        scope_lookups.push(rule_set);
        join_blocks(scope_lookups)
    }
}
