//! AWS security group rules (`hashicorp/aws`)

use std::{collections::BTreeMap, sync::Arc};

use serde::Deserialize;

use crate::{
    adapter::{
        AdapterConfig, PlatformAdapter, audit_description, endpoint_ranges, group_mapping,
        protocol_rules, require_addresses, rule_count, select_strategy, service_mapping,
        validate_mappings,
    },
    error::{ObjectKind, Result},
    hcl::{Block, join_blocks, quote, tf_list, tf_name},
    model::{Action, Platform, Policy, ReferenceKind, ResolvedGroup, ResolvedPolicy, ResolvedService},
    registry::Registry,
};

/// Rules per security group AWS accepts by default
pub const MAX_RULES_PER_GROUP: usize = 60;

/// Adapter settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AwsSettings {
    /// Security group receiving the rules, per scope (account)
    pub security_groups: BTreeMap<String, String>,
    /// Security group used for scopes not listed above
    pub default_security_group: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Strategy {
    #[default]
    CidrOnly,
    SecurityGroupPreferred,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct SecurityGroupMapping {
    tag_key: Option<String>,
    tag_value: Option<String>,
}

/// Adapter for AWS security groups
pub struct AwsAdapter {
    registry: Arc<Registry>,
    settings: AwsSettings,
}

impl AwsAdapter {
    /// Create the adapter over a shared registry
    pub fn new(registry: Arc<Registry>, config: &AdapterConfig) -> Result<Self> {
        Ok(AwsAdapter {
            registry,
            settings: config.parse(Platform::Aws)?,
        })
    }

    fn destination_security_group(&self, destination: &ResolvedGroup, scope: &str) -> String {
        if destination.kind == ReferenceKind::SecurityGroup {
            return destination.reference.clone();
        }
        match self
            .settings
            .security_groups
            .get(scope)
            .or(self.settings.default_security_group.as_ref())
        {
            Some(id) => quote(id),
            None => "var.security_group_id".to_string(),
        }
    }
}

impl PlatformAdapter for AwsAdapter {
    fn platform(&self) -> Platform {
        Platform::Aws
    }

    fn display_name(&self) -> &'static str {
        "Amazon Web Services"
    }

    fn terraform_provider(&self) -> &'static str {
        "hashicorp/aws"
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn validate(&self, policy: &Policy) -> Vec<String> {
        let mut errors = validate_mappings(&self.registry, Platform::Aws, policy);
        if policy.spec.action == Action::Deny {
            errors.push("AWS security groups only support allow rules".to_string());
        }
        let rules = rule_count(&self.registry, policy);
        if rules > MAX_RULES_PER_GROUP {
            errors.push(format!(
                "Policy expands to {rules} security group rules, AWS allows {MAX_RULES_PER_GROUP}"
            ));
        }
        errors
    }

    fn resolve_group(&self, group_name: &str, _scope: &str) -> Result<ResolvedGroup> {
        let (group, mapping) = group_mapping(&self.registry, Platform::Aws, group_name)?;
        let strategy: Strategy =
            select_strategy(Platform::Aws, &mapping, ObjectKind::Group, group_name)?;
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
                require_addresses(Platform::Aws, &resolved)?;
                resolved
            }
            Strategy::SecurityGroupPreferred => {
                let sg: SecurityGroupMapping = mapping.section("security-group")?;
                let tag_key = sg.tag_key.unwrap_or_else(|| "netsec:group".to_string());
                let tag_value = sg.tag_value.unwrap_or_else(|| group_name.to_string());
                let lookup = Block::data("aws_security_group", group_name).attr(
                    "tags",
                    format!("{{ {} = {} }}", quote(&tag_key), quote(&tag_value)),
                );
                ResolvedGroup {
                    name: group_name.to_string(),
                    reference: format!("data.aws_security_group.{}.id", tf_name(group_name)),
                    kind: ReferenceKind::SecurityGroup,
                    members,
                    supporting_config: lookup.render(),
                }
            }
        })
    }

    fn resolve_service(&self, service_name: &str, _scope: &str) -> Result<ResolvedService> {
        let (service, _) = service_mapping(&self.registry, Platform::Aws, service_name)?;
        Ok(ResolvedService::from_service(&service))
    }

    fn generate_terraform(&self, policy: &ResolvedPolicy, scope: &str) -> String {
        let description = audit_description(policy);
        let security_group = self.destination_security_group(&policy.destination, scope);

        let rules = protocol_rules(policy).map(|(i, j, proto)| {
            let protocol = proto.protocol.to_ascii_lowercase();
            let (protocol, from_port, to_port) = match protocol.as_str() {
                "icmp" => (protocol.clone(), -1, -1),
                "all" | "-1" => ("-1".to_string(), 0, 0),
                _ => {
                    let (from, to) = proto
                        .port
                        .map_or((0, 65535), |p| (p.from_port(), p.to_port()));
                    (protocol.clone(), i32::from(from), i32::from(to))
                }
            };

            let rule_name = format!("{}-{i}-{j}", policy.name);
            let mut rule = Block::resource("aws_security_group_rule", &rule_name)
                .string("type", "ingress")
                .attr("from_port", from_port.to_string())
                .attr("to_port", to_port.to_string())
                .string("protocol", &protocol);
            if policy.source.kind == ReferenceKind::SecurityGroup {
                rule.push_attr("source_security_group_id", policy.source.reference.clone());
            } else {
                let (ipv4, ipv6) = endpoint_ranges(&policy.source);
                if !ipv4.is_empty() {
                    rule.push_attr("cidr_blocks", tf_list(ipv4));
                }
                if !ipv6.is_empty() {
                    rule.push_attr("ipv6_cidr_blocks", tf_list(ipv6));
                }
            }
            rule.attr("security_group_id", security_group.clone())
                .blank()
                .string("description", &description)
        });

        join_blocks(rules)
    }
}
