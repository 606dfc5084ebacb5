//! Azure network security group rules (`hashicorp/azurerm`)

use std::{collections::BTreeMap, sync::Arc};

use serde::Deserialize;

use crate::{
    adapter::{
        AdapterConfig, PlatformAdapter, audit_description, group_mapping, protocol_rules,
        require_addresses, rule_count, select_strategy, service_mapping, validate_mappings,
    },
    error::{ObjectKind, Result},
    hcl::{Block, join_blocks, quote, tf_list, tf_name},
    model::{Action, Platform, Policy, ReferenceKind, ResolvedGroup, ResolvedPolicy, ResolvedService},
    registry::Registry,
};

/// Priority of the first rule of a policy
pub const PRIORITY_START: u32 = 100;
/// Gap between consecutive rule priorities
pub const PRIORITY_STEP: u32 = 10;
/// Highest priority Azure accepts for user rules
pub const PRIORITY_MAX: u32 = 4096;

/// Resource group and NSG that receive rules for one scope
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AzureScope {
    /// Resource group name
    pub resource_group: Option<String>,
    /// Network security group name
    pub network_security_group: Option<String>,
}

/// Adapter settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AzureSettings {
    /// Per-scope (subscription) placement
    pub scopes: BTreeMap<String, AzureScope>,
    /// Placement for scopes not listed above
    pub default: AzureScope,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Strategy {
    #[default]
    CidrOnly,
    AsgPreferred,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct AsgMapping {
    name: Option<String>,
    resource_group: Option<String>,
}

/// Adapter for Azure network security groups
pub struct AzureAdapter {
    registry: Arc<Registry>,
    settings: AzureSettings,
}

impl AzureAdapter {
    /// Create the adapter over a shared registry
    pub fn new(registry: Arc<Registry>, config: &AdapterConfig) -> Result<Self> {
        Ok(AzureAdapter {
            registry,
            settings: config.parse(Platform::Azure)?,
        })
    }

    fn placement(&self, scope: &str) -> (String, String) {
        let scoped = self.settings.scopes.get(scope);
        let default = &self.settings.default;

        let resource_group = scoped
            .and_then(|s| s.resource_group.as_ref())
            .or(default.resource_group.as_ref());
        let nsg = scoped
            .and_then(|s| s.network_security_group.as_ref())
            .or(default.network_security_group.as_ref());

        (
            expr_or_var(resource_group, "resource_group_name"),
            expr_or_var(nsg, "network_security_group_name"),
        )
    }
}

fn expr_or_var(value: Option<&String>, var: &str) -> String {
    value.map_or_else(|| format!("var.{var}"), |name| quote(name))
}

/// Azure spells protocols in title case
fn azure_protocol(protocol: &str) -> String {
    match protocol.to_ascii_lowercase().as_str() {
        "tcp" => "Tcp".to_string(),
        "udp" => "Udp".to_string(),
        "icmp" => "Icmp".to_string(),
        "all" | "any" | "*" => "*".to_string(),
        other => other.to_string(),
    }
}

fn push_endpoint(rule: &mut Block, side: &str, group: &ResolvedGroup) {
    if group.kind == ReferenceKind::ApplicationSecurityGroup {
        rule.push_attr(
            &format!("{side}_application_security_group_ids"),
            format!("[{}]", group.reference),
        );
        return;
    }
    let addresses = group.members.all_addresses();
    if group.kind == ReferenceKind::Any {
        rule.push_attr(&format!("{side}_address_prefix"), quote("*"));
    } else {
        rule.push_attr(&format!("{side}_address_prefixes"), tf_list(addresses));
    }
}

impl PlatformAdapter for AzureAdapter {
    fn platform(&self) -> Platform {
        Platform::Azure
    }

    fn display_name(&self) -> &'static str {
        "Microsoft Azure"
    }

    fn terraform_provider(&self) -> &'static str {
        "hashicorp/azurerm"
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn validate(&self, policy: &Policy) -> Vec<String> {
        let mut errors = validate_mappings(&self.registry, Platform::Azure, policy);
        let rules = rule_count(&self.registry, policy) as u32;
        let last = PRIORITY_START + rules.saturating_sub(1) * PRIORITY_STEP;
        if rules > 0 && last > PRIORITY_MAX {
            errors.push(format!(
                "Policy expands to {rules} rules, exceeding the Azure priority range ({PRIORITY_START}-{PRIORITY_MAX})"
            ));
        }
        errors
    }

    fn resolve_group(&self, group_name: &str, _scope: &str) -> Result<ResolvedGroup> {
        let (group, mapping) = group_mapping(&self.registry, Platform::Azure, group_name)?;
        let strategy: Strategy =
            select_strategy(Platform::Azure, &mapping, ObjectKind::Group, group_name)?;
        let members = self.registry.resolve_group_members(&group)?;

        Ok(match strategy {
            Strategy::CidrOnly => {
                let resolved = ResolvedGroup {
                    name: group_name.to_string(),
                    reference: "cidr".to_string(),
                    kind: ReferenceKind::Cidr,
                    members,
                    supporting_config: String::new(),
                };
                require_addresses(Platform::Azure, &resolved)?;
                resolved
            }
            Strategy::AsgPreferred => {
                let asg: AsgMapping = mapping.section("asg")?;
                let name = asg.name.unwrap_or_else(|| format!("asg-{group_name}"));
                let resource_group = asg
                    .resource_group
                    .unwrap_or_else(|| "rg-network-security".to_string());
                let lookup = Block::data("azurerm_application_security_group", group_name)
                    .string("name", &name)
                    .string("resource_group_name", &resource_group);
                ResolvedGroup {
                    name: group_name.to_string(),
                    reference: format!(
                        "data.azurerm_application_security_group.{}.id",
                        tf_name(group_name)
                    ),
                    kind: ReferenceKind::ApplicationSecurityGroup,
                    members,
                    supporting_config: lookup.render(),
                }
            }
        })
    }

    fn resolve_service(&self, service_name: &str, _scope: &str) -> Result<ResolvedService> {
        let (service, _) = service_mapping(&self.registry, Platform::Azure, service_name)?;
        Ok(ResolvedService::from_service(&service))
    }

    fn generate_terraform(&self, policy: &ResolvedPolicy, scope: &str) -> String {
        let description = audit_description(policy);
        let (resource_group, nsg) = self.placement(scope);
        let access = match policy.action {
            Action::Allow => "Allow",
            Action::Deny => "Deny",
        };

        let rules = protocol_rules(policy).enumerate().map(|(n, (i, j, proto))| {
            let rule_name = format!("{}-{i}-{j}", policy.name);
            let priority = PRIORITY_START + n as u32 * PRIORITY_STEP;
            let port_range = proto.port.map_or_else(|| "*".to_string(), |p| p.to_string());

            let mut rule = Block::resource("azurerm_network_security_rule", &rule_name)
                .string("name", &rule_name)
                .attr("priority", priority.to_string())
                .string("direction", "Inbound")
                .string("access", access)
                .string("protocol", &azure_protocol(&proto.protocol))
                .string("source_port_range", "*")
                .string("destination_port_range", &port_range);
            push_endpoint(&mut rule, "source", &policy.source);
            push_endpoint(&mut rule, "destination", &policy.destination);
            rule.attr("resource_group_name", resource_group.clone())
                .attr("network_security_group_name", nsg.clone())
                .blank()
                .string("description", &description)
        });

        join_blocks(rules)
    }
}
