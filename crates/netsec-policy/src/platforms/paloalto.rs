//! Palo Alto Networks Panorama (`PaloAltoNetworks/panos`)
//!
//! Groups become static address groups, dynamic address groups (DAGs) or a
//! combined group holding both. Services are either port-based service
//! objects or App-ID applications.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::Deserialize;

use crate::{
    adapter::{
        AdapterConfig, PlatformAdapter, group_mapping, require_addresses, select_strategy,
        service_mapping, validate_mappings,
    },
    error::{ObjectKind, Result},
    hcl::{Block, join_blocks, quote, tf_list, tf_name, tf_ref_list},
    model::{
        Action, Platform, Policy, ReferenceKind, ResolvedGroup, ResolvedMembers, ResolvedPolicy,
        ResolvedService, ServiceRef,
    },
    registry::Registry,
};

const MANAGED_TAG: &str = "policy-as-code";

/// Zones a rule applies to within one device group
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ZoneSettings {
    /// Source zones
    pub source: Vec<String>,
    /// Destination zones
    pub destination: Vec<String>,
}

impl Default for ZoneSettings {
    fn default() -> Self {
        ZoneSettings {
            source: vec!["any".to_string()],
            destination: vec!["any".to_string()],
        }
    }
}

/// Adapter settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PaloAltoSettings {
    /// Zones per scope (device group)
    pub zones: BTreeMap<String, ZoneSettings>,
    /// Zones for device groups not listed above
    pub default_zones: ZoneSettings,
    /// Log forwarding profile attached to logged rules
    pub log_setting: String,
}

impl Default for PaloAltoSettings {
    fn default() -> Self {
        PaloAltoSettings {
            zones: BTreeMap::new(),
            default_zones: ZoneSettings::default(),
            log_setting: "default-logging".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Strategy {
    #[default]
    StaticOnly,
    DagOnly,
    Hybrid,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct NamedSection {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct DagSection {
    name: Option<String>,
    match_criteria: Vec<String>,
}

/// Adapter for Palo Alto Panorama
pub struct PaloAltoAdapter {
    registry: Arc<Registry>,
    settings: PaloAltoSettings,
}

impl PaloAltoAdapter {
    /// Create the adapter over a shared registry
    pub fn new(registry: Arc<Registry>, config: &AdapterConfig) -> Result<Self> {
        Ok(PaloAltoAdapter {
            registry,
            settings: config.parse(Platform::Paloalto)?,
        })
    }

    fn zones(&self, scope: &str) -> &ZoneSettings {
        self.settings
            .zones
            .get(scope)
            .unwrap_or(&self.settings.default_zones)
    }
}

fn dynamic_group(
    group_name: &str,
    dag: &DagSection,
    dag_name: &str,
    scope: &str,
    description: &str,
) -> Block {
    let expression = if dag.match_criteria.is_empty() {
        format!("'{group_name}'")
    } else {
        dag.match_criteria.join(" or ")
    };
    Block::resource("panos_panorama_dynamic_address_group", dag_name)
        .string("device_group", scope)
        .string("name", dag_name)
        .string("description", description)
        .string("match", &expression)
        .blank()
        .list("tags", [MANAGED_TAG, "dynamic"])
        .create_before_destroy()
}

/// Address objects for every network and host address, plus the group holding them
fn static_group(
    group_name: &str,
    members: &ResolvedMembers,
    address_group: &str,
    scope: &str,
    tags: &[&str],
) -> (Vec<Block>, bool) {
    let mut blocks = Vec::new();
    let mut objects: Vec<String> = Vec::new();

    for (i, network) in members.networks.iter().enumerate() {
        let name = format!("net-{group_name}-{i}");
        blocks.push(address_object(
            &name,
            network,
            &format!("Network for {group_name} - Managed by {MANAGED_TAG}"),
            scope,
        ));
        objects.push(name);
    }

    for host in &members.hosts {
        let addresses = &host.spec.addresses;
        for (k, ip) in addresses.ipv4.iter().chain(&addresses.ipv6).enumerate() {
            let name = if k == 0 {
                format!("host-{}", host.name())
            } else {
                format!("host-{}-{k}", host.name())
            };
            if objects.contains(&name) {
                continue;
            }
            blocks.push(address_object(
                &name,
                ip,
                &format!("Host {} - Managed by {MANAGED_TAG}", host.name()),
                scope,
            ));
            objects.push(name);
        }
    }

    if objects.is_empty() {
        return (blocks, false);
    }

    let refs = objects
        .iter()
        .map(|name| format!("panos_panorama_address_object.{}.name", tf_name(name)));
    blocks.push(
        Block::resource("panos_panorama_address_group", address_group)
            .string("device_group", scope)
            .string("name", address_group)
            .string("description", &format!("Address Group: {group_name} - Managed by {MANAGED_TAG}"))
            .blank()
            .attr("static_addresses", tf_ref_list(refs))
            .list("tags", tags)
            .create_before_destroy(),
    );
    (blocks, true)
}

fn address_object(name: &str, value: &str, description: &str, scope: &str) -> Block {
    Block::resource("panos_panorama_address_object", name)
        .string("device_group", scope)
        .string("name", name)
        .string("description", description)
        .string("value", value)
        .blank()
        .list("tags", [MANAGED_TAG])
        .create_before_destroy()
}

fn service_object_name(protocol: &str, port: &str) -> String {
    format!("svc-{protocol}-{port}")
}

/// Addresses a rule side refers to
fn rule_addresses(group: &ResolvedGroup) -> Vec<String> {
    match group.kind {
        ReferenceKind::Any => vec!["any".to_string()],
        ReferenceKind::Cidr | ReferenceKind::Host => group.members.all_addresses(),
        _ => vec![group.reference.clone()],
    }
}

/// Port-based service objects a policy needs, keyed by object name
fn port_services(policy: &ResolvedPolicy) -> BTreeMap<String, (String, String)> {
    let mut objects = BTreeMap::new();
    for service in policy.services.iter().filter(|s| s.service_reference.is_none()) {
        for proto in &service.protocols {
            let protocol = proto.protocol.to_ascii_lowercase();
            if let (Some(port), "tcp" | "udp") = (proto.port, protocol.as_str()) {
                let port = port.to_string();
                objects.insert(service_object_name(&protocol, &port), (protocol, port));
            }
        }
    }
    objects
}

impl PlatformAdapter for PaloAltoAdapter {
    fn platform(&self) -> Platform {
        Platform::Paloalto
    }

    fn display_name(&self) -> &'static str {
        "Palo Alto Networks"
    }

    fn terraform_provider(&self) -> &'static str {
        "PaloAltoNetworks/panos"
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn validate(&self, policy: &Policy) -> Vec<String> {
        let mut errors = validate_mappings(&self.registry, Platform::Paloalto, policy);

        for service in &policy.spec.services {
            let ServiceRef::Named(name) = service else {
                continue;
            };
            let Ok((_, mapping)) = service_mapping(&self.registry, Platform::Paloalto, name) else {
                continue;
            };
            if mapping.flag("use-app-id") {
                let applications: Vec<String> = mapping.section("applications").unwrap_or_default();
                if applications.is_empty() {
                    errors.push(format!(
                        "Service '{name}' uses App-ID but lists no applications"
                    ));
                }
            }
        }

        errors
    }

    fn resolve_group(&self, group_name: &str, scope: &str) -> Result<ResolvedGroup> {
        let (group, mapping) = group_mapping(&self.registry, Platform::Paloalto, group_name)?;
        let strategy: Strategy =
            select_strategy(Platform::Paloalto, &mapping, ObjectKind::Group, group_name)?;

        match strategy {
            Strategy::DagOnly => {
                let dag: DagSection = mapping.section("dag")?;
                let dag_name = dag.name.clone().unwrap_or_else(|| format!("dag-{group_name}"));
                let block = dynamic_group(
                    group_name,
                    &dag,
                    &dag_name,
                    scope,
                    &format!("Dynamic Address Group: {group_name} - Managed by {MANAGED_TAG}"),
                );
                let members = ResolvedMembers {
                    platform_reference: Some(dag_name.clone()),
                    ..Default::default()
                };
                Ok(ResolvedGroup {
                    name: group_name.to_string(),
                    reference: dag_name,
                    kind: ReferenceKind::DynamicAddressGroup,
                    members,
                    supporting_config: block.render(),
                })
            }
            Strategy::StaticOnly => {
                let members = self.registry.resolve_group_members(&group)?;
                let section: NamedSection = mapping.section("static")?;
                let name = section.name.unwrap_or_else(|| format!("grp-{group_name}"));
                let (blocks, _) = static_group(group_name, &members, &name, scope, &[MANAGED_TAG]);
                let resolved = ResolvedGroup {
                    name: group_name.to_string(),
                    reference: name,
                    kind: ReferenceKind::AddressGroup,
                    members,
                    supporting_config: join_blocks(blocks),
                };
                require_addresses(Platform::Paloalto, &resolved)?;
                Ok(resolved)
            }
            Strategy::Hybrid => {
                let members = self.registry.resolve_group_members(&group)?;
                let dag: DagSection = mapping.section("dag")?;
                let static_section: NamedSection = mapping.section("static")?;
                let combined: NamedSection = mapping.section("combined")?;

                let dag_name = dag.name.clone().unwrap_or_else(|| format!("dag-{group_name}"));
                let static_name = static_section
                    .name
                    .unwrap_or_else(|| format!("grp-{group_name}-static"));
                let combined_name = combined.name.unwrap_or_else(|| format!("grp-{group_name}"));

                let mut blocks = vec![dynamic_group(
                    group_name,
                    &dag,
                    &dag_name,
                    scope,
                    &format!("Dynamic portion of {group_name} - Managed by {MANAGED_TAG}"),
                )];
                let (static_blocks, has_static) = static_group(
                    group_name,
                    &members,
                    &static_name,
                    scope,
                    &[MANAGED_TAG, "static"],
                );
                blocks.extend(static_blocks);

                let mut parts = vec![format!(
                    "panos_panorama_dynamic_address_group.{}.name",
                    tf_name(&dag_name)
                )];
                if has_static {
                    parts.push(format!(
                        "panos_panorama_address_group.{}.name",
                        tf_name(&static_name)
                    ));
                }
                blocks.push(
                    Block::resource("panos_panorama_address_group", &combined_name)
                        .string("device_group", scope)
                        .string("name", &combined_name)
                        .string(
                            "description",
                            &format!("Combined group: {group_name} (DAG + Static) - Managed by {MANAGED_TAG}"),
                        )
                        .blank()
                        .attr("static_addresses", tf_ref_list(parts))
                        .list("tags", [MANAGED_TAG, "combined"])
                        .create_before_destroy(),
                );

                let mut members = members;
                members.platform_reference = Some(dag_name);
                Ok(ResolvedGroup {
                    name: group_name.to_string(),
                    reference: combined_name,
                    kind: ReferenceKind::Hybrid,
                    members,
                    supporting_config: join_blocks(blocks),
                })
            }
        }
    }

    fn resolve_service(&self, service_name: &str, _scope: &str) -> Result<ResolvedService> {
        let (service, mapping) = service_mapping(&self.registry, Platform::Paloalto, service_name)?;
        let mut resolved = ResolvedService::from_service(&service);

        if mapping.flag("use-app-id") {
            resolved.applications = mapping.section("applications")?;
            let reference: Option<String> = mapping.section("service")?;
            resolved.service_reference =
                Some(reference.unwrap_or_else(|| "application-default".to_string()));
        } else {
            resolved.applications = vec!["any".to_string()];
        }

        Ok(resolved)
    }

    fn get_supporting_resources(&self, policy: &ResolvedPolicy, scope: &str) -> String {
        let mut parts: Vec<String> = Vec::new();
        for group in [&policy.source, &policy.destination] {
            let text = &group.supporting_config;
            if !text.trim().is_empty() && !parts.contains(text) {
                parts.push(group.supporting_config.clone());
            }
        }

        let services = port_services(policy)
            .into_iter()
            .map(|(name, (protocol, port))| {
                Block::resource("panos_panorama_service_object", &name)
                    .string("device_group", scope)
                    .string("name", &name)
                    .string("protocol", &protocol)
                    .string("destination_port", &port)
                    .blank()
                    .list("tags", [MANAGED_TAG])
                    .create_before_destroy()
            })
            .collect::<Vec<_>>();
        if !services.is_empty() {
            parts.push(join_blocks(services));
        }

        parts.join("\n")
    }

    fn generate_terraform(&self, policy: &ResolvedPolicy, scope: &str) -> String {
        let applications: BTreeSet<&str> = policy
            .services
            .iter()
            .flat_map(|service| service.applications.iter().map(String::as_str))
            .collect();
        let applications: Vec<&str> = if applications.len() > 1 {
            applications.into_iter().filter(|app| *app != "any").collect()
        } else {
            applications.into_iter().collect()
        };

        let mut services: Vec<String> = Vec::new();
        for service in &policy.services {
            if let Some(reference) = &service.service_reference
                && !services.contains(reference)
            {
                services.push(reference.clone());
            }
        }
        let port_objects = port_services(policy);
        let mut service_exprs: Vec<String> = services.iter().map(|s| quote(s)).collect();
        service_exprs.extend(
            port_objects
                .keys()
                .map(|name| format!("panos_panorama_service_object.{}.name", tf_name(name))),
        );
        if service_exprs.is_empty() {
            service_exprs.push(quote("application-default"));
        }

        let zones = self.zones(scope);
        let action = match policy.action {
            Action::Allow => "allow",
            Action::Deny => "deny",
        };

        let mut rule = Block::new("rule")
            .string("name", &policy.name)
            .string("description", &policy.description)
            .list("source_zones", &zones.source)
            .list("source_addresses", rule_addresses(&policy.source))
            .list("source_users", ["any"])
            .list("destination_zones", &zones.destination)
            .list("destination_addresses", rule_addresses(&policy.destination))
            .list("applications", &applications)
            .attr("services", tf_ref_list(service_exprs))
            .list("categories", ["any"])
            .string("action", action);
        if policy.logging {
            rule.push_attr("log_setting", quote(&self.settings.log_setting));
        }
        let rule = rule.blank().attr("tags", tf_list([MANAGED_TAG, policy.ticket.as_str()]));

        Block::resource("panos_panorama_security_policy", &policy.name)
            .string("device_group", scope)
            .child(rule)
            .create_before_destroy()
            .render()
    }
}
