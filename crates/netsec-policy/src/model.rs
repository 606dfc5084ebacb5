//! Canonical documents: hosts, groups, services and policies

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    net::IpAddr,
    path::Path,
    str::FromStr,
    sync::Arc,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{ObjectKind, PolicyError, Result};

/// API version carried by every canonical document
pub const API_VERSION: &str = "netsec/v1";

/// Enforcement platforms with an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// AWS security groups
    Aws,
    /// GCP VPC firewall rules
    Gcp,
    /// Azure network security groups
    Azure,
    /// Palo Alto Networks Panorama
    Paloalto,
    /// Fortinet FortiGate / FortiManager
    Fortinet,
    /// Illumio Policy Compute Engine
    Illumio,
}

impl Platform {
    /// Every supported platform, in registration order
    pub const ALL: [Platform; 6] = [
        Platform::Aws,
        Platform::Gcp,
        Platform::Azure,
        Platform::Paloalto,
        Platform::Fortinet,
        Platform::Illumio,
    ];

    /// Key used in documents and output paths
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Aws => "aws",
            Platform::Gcp => "gcp",
            Platform::Azure => "azure",
            Platform::Paloalto => "paloalto",
            Platform::Fortinet => "fortinet",
            Platform::Illumio => "illumio",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PolicyError::UnknownPlatform(s.to_string()))
    }
}

/// Rule action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Permit matching traffic
    Allow,
    /// Drop matching traffic
    Deny,
}

impl Action {
    /// Lowercase keyword
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
        }
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production
    Production,
    /// Staging
    Staging,
    /// Development
    Development,
}

impl Environment {
    /// Lowercase keyword
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
        }
    }
}

// ============================================================================
// Hosts
// ============================================================================

/// A single addressable machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    /// Document API version
    pub api_version: String,
    /// Document kind, `Host`
    #[serde(default = "kind_host")]
    pub kind: String,
    /// Identity and ownership
    pub metadata: HostMetadata,
    /// Addresses and labels
    pub spec: HostSpec,
}

/// Host identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostMetadata {
    /// Unique host name
    pub name: String,
    /// Owning team or person
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Identifier in the configuration management database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmdb_id: Option<String>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Host body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HostSpec {
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Deployment environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    /// Physical or logical location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Network addresses
    #[serde(default)]
    pub addresses: HostAddresses,
    /// Opaque per-platform references (instance ids, workload hrefs)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub platform_refs: BTreeMap<String, serde_yaml::Value>,
    /// Labels used by dynamic group membership
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Addresses of a host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostAddresses {
    /// IPv4 addresses
    #[serde(default)]
    pub ipv4: Vec<String>,
    /// IPv6 addresses
    #[serde(default)]
    pub ipv6: Vec<String>,
    /// Fully qualified domain names
    #[serde(default)]
    pub fqdn: Vec<String>,
}

impl Host {
    /// Host name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Labels of this host
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.spec.labels
    }
}

// ============================================================================
// Groups
// ============================================================================

/// A named set of hosts and networks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Document API version
    pub api_version: String,
    /// Document kind, `Group`
    #[serde(default = "kind_group")]
    pub kind: String,
    /// Identity and labels
    pub metadata: GroupMetadata,
    /// Membership and platform mappings
    pub spec: GroupSpec,
}

/// Group identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    /// Unique group name
    pub name: String,
    /// Owning team or person
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Group labels (e.g. `environment`)
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Group body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupSpec {
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// How members are selected
    #[serde(default)]
    pub membership: Membership,
    /// Platform name to resolution strategy and parameters
    #[serde(default)]
    pub platform_mapping: BTreeMap<String, PlatformMapping>,
}

/// Membership specification of a group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    /// Host names referenced directly
    #[serde(default, rename = "static")]
    pub static_hosts: Vec<String>,
    /// Label selector over the whole host table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicMembership>,
    /// Literal CIDRs
    #[serde(default)]
    pub networks: Vec<String>,
    /// Nested group names
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Label selector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DynamicMembership {
    /// Every pair must be present and equal in a host's labels
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl DynamicMembership {
    /// True iff every required pair is present and equal in `labels`.
    ///
    /// An empty selector matches nothing.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        !self.match_labels.is_empty()
            && self
                .match_labels
                .iter()
                .all(|(key, value)| labels.get(key) == Some(value))
    }
}

impl Group {
    /// Group name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// True if the dynamic clause of this group selects `labels`
    pub fn matches_labels(&self, labels: &BTreeMap<String, String>) -> bool {
        self.spec
            .membership
            .dynamic
            .as_ref()
            .is_some_and(|dynamic| dynamic.matches(labels))
    }

    /// Mapping for `platform`, if declared
    pub fn mapping(&self, platform: Platform) -> Option<&PlatformMapping> {
        self.spec.platform_mapping.get(platform.as_str())
    }
}

// ============================================================================
// Services
// ============================================================================

/// A named set of protocol/port definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Document API version
    pub api_version: String,
    /// Document kind, `Service`
    #[serde(default = "kind_service")]
    pub kind: String,
    /// Identity
    pub metadata: ServiceMetadata,
    /// Protocols and platform mappings
    pub spec: ServiceSpec,
}

/// Service identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    /// Unique service name
    pub name: String,
    /// Owning team or person
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Service body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceSpec {
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered protocol definitions
    pub protocols: Vec<ProtocolDef>,
    /// Platform name to platform-native service parameters
    #[serde(default)]
    pub platform_mapping: BTreeMap<String, PlatformMapping>,
}

impl Service {
    /// Service name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Mapping for `platform`, if declared
    pub fn mapping(&self, platform: Platform) -> Option<&PlatformMapping> {
        self.spec.platform_mapping.get(platform.as_str())
    }
}

/// One protocol, optionally restricted to a port or range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolDef {
    /// Protocol name (`tcp`, `udp`, `icmp`, ...)
    pub protocol: String,
    /// Port or port range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSpec>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A single port or an inclusive range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPort", into = "RawPort")]
pub enum PortSpec {
    /// One port
    Single(u16),
    /// Inclusive range `from-to`
    Range(u16, u16),
}

impl PortSpec {
    /// Lower bound
    pub fn from_port(&self) -> u16 {
        match *self {
            PortSpec::Single(port) => port,
            PortSpec::Range(from, _) => from,
        }
    }

    /// Upper bound
    pub fn to_port(&self) -> u16 {
        match *self {
            PortSpec::Single(port) => port,
            PortSpec::Range(_, to) => to,
        }
    }

    /// True if `port` falls inside this spec
    pub fn contains(&self, port: u16) -> bool {
        (self.from_port()..=self.to_port()).contains(&port)
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Single(port) => write!(f, "{port}"),
            PortSpec::Range(from, to) => write!(f, "{from}-{to}"),
        }
    }
}

impl FromStr for PortSpec {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u16>()
                .map_err(|_| PolicyError::InvalidFormat(format!("Invalid port: {s}")))
        };
        match s.split_once('-') {
            Some((from, to)) => {
                let (from, to) = (parse(from)?, parse(to)?);
                if from > to {
                    return Err(PolicyError::InvalidFormat(format!(
                        "Port range start exceeds end: {s}"
                    )));
                }
                Ok(PortSpec::Range(from, to))
            }
            None => Ok(PortSpec::Single(parse(s)?)),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u16),
    Text(String),
}

impl TryFrom<RawPort> for PortSpec {
    type Error = PolicyError;

    fn try_from(raw: RawPort) -> Result<Self> {
        match raw {
            RawPort::Number(port) => Ok(PortSpec::Single(port)),
            RawPort::Text(text) => text.parse(),
        }
    }
}

impl From<PortSpec> for RawPort {
    fn from(port: PortSpec) -> Self {
        match port {
            PortSpec::Single(port) => RawPort::Number(port),
            range => RawPort::Text(range.to_string()),
        }
    }
}

// ============================================================================
// Platform mappings
// ============================================================================

/// Free-form per-platform configuration of a group or service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformMapping {
    /// Named resolution strategy; adapters fall back to their default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// Platform-specific parameters
    #[serde(flatten)]
    pub params: BTreeMap<String, serde_yaml::Value>,
}

impl PlatformMapping {
    /// Raw parameter value
    pub fn param(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.params.get(key)
    }

    /// Deserialize the parameter section `key` into `T`, or `T::default()` when absent
    pub fn section<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        match self.params.get(key) {
            Some(value) => serde_yaml::from_value(value.clone()).map_err(|e| {
                PolicyError::InvalidFormat(format!("Invalid '{key}' mapping section: {e}"))
            }),
            None => Ok(T::default()),
        }
    }

    /// Boolean flag parameter, `false` when absent
    pub fn flag(&self, key: &str) -> bool {
        self.params
            .get(key)
            .and_then(serde_yaml::Value::as_bool)
            .unwrap_or(false)
    }
}

// ============================================================================
// Policies
// ============================================================================

/// A platform-agnostic network access declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Document API version
    pub api_version: String,
    /// Document kind, `NetworkPolicy`
    #[serde(default = "kind_policy")]
    pub kind: String,
    /// Audit metadata
    pub metadata: PolicyMetadata,
    /// The rule itself
    pub spec: PolicySpec,
}

/// Audit metadata of a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyMetadata {
    /// Unique policy name, also the output file stem
    pub name: String,
    /// Who asked for the access
    pub requestor: String,
    /// Change ticket
    pub ticket: String,
    /// Deployment environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    /// Expiration date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
    /// Free-form labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Policy body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Free-form description, carried into generated comments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Traffic origin
    pub source: Endpoint,
    /// Traffic destination
    pub destination: Endpoint,
    /// Ordered service references
    pub services: Vec<ServiceRef>,
    /// Allow or deny
    pub action: Action,
    /// Whether matching traffic is logged
    #[serde(default = "default_logging")]
    pub logging: bool,
    /// Platforms and scopes to generate for
    pub targets: Vec<Target>,
    /// Guardrail overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardrails: Option<GuardrailOverrides>,
}

/// One side of a policy: exactly one reference kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEndpoint", into = "RawEndpoint")]
pub enum Endpoint {
    /// Named group
    Group(String),
    /// Named host
    Host(String),
    /// Literal network
    Cidr(String),
    /// Any address
    Any,
}

impl Endpoint {
    /// Kind of reference
    pub fn type_name(&self) -> &'static str {
        match self {
            Endpoint::Group(_) => "group",
            Endpoint::Host(_) => "host",
            Endpoint::Cidr(_) => "cidr",
            Endpoint::Any => "any",
        }
    }

    /// The referenced name, literal, or `any`
    pub fn reference(&self) -> &str {
        match self {
            Endpoint::Group(name) | Endpoint::Host(name) | Endpoint::Cidr(name) => name,
            Endpoint::Any => "any",
        }
    }

    /// Group name when this endpoint is a group reference
    pub fn group(&self) -> Option<&str> {
        match self {
            Endpoint::Group(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cidr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    any: Option<bool>,
}

impl TryFrom<RawEndpoint> for Endpoint {
    type Error = PolicyError;

    fn try_from(raw: RawEndpoint) -> Result<Self> {
        let mut kinds = Vec::with_capacity(1);
        if let Some(group) = raw.group {
            kinds.push(Endpoint::Group(group));
        }
        if let Some(host) = raw.host {
            kinds.push(Endpoint::Host(host));
        }
        if let Some(cidr) = raw.cidr {
            validate_cidr(&cidr)?;
            kinds.push(Endpoint::Cidr(cidr));
        }
        if raw.any == Some(true) {
            kinds.push(Endpoint::Any);
        }

        match kinds.len() {
            1 => Ok(kinds.remove(0)),
            0 => Err(PolicyError::InvalidFormat(
                "Endpoint must specify one of group, host, cidr or any".to_string(),
            )),
            _ => Err(PolicyError::InvalidFormat(format!(
                "Endpoint must specify exactly one reference, found: {}",
                kinds
                    .iter()
                    .map(Endpoint::type_name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

impl From<Endpoint> for RawEndpoint {
    fn from(endpoint: Endpoint) -> Self {
        match endpoint {
            Endpoint::Group(group) => RawEndpoint {
                group: Some(group),
                ..Default::default()
            },
            Endpoint::Host(host) => RawEndpoint {
                host: Some(host),
                ..Default::default()
            },
            Endpoint::Cidr(cidr) => RawEndpoint {
                cidr: Some(cidr),
                ..Default::default()
            },
            Endpoint::Any => RawEndpoint {
                any: Some(true),
                ..Default::default()
            },
        }
    }
}

/// Check that `cidr` is an address with an in-range prefix length
pub fn validate_cidr(cidr: &str) -> Result<()> {
    let invalid = || PolicyError::InvalidFormat(format!("Invalid CIDR: {cidr}"));
    let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(invalid());
    }
    Ok(())
}

fn is_ipv6(address: &str) -> bool {
    address.contains(':')
}

/// A service entry: a registry name or an inline definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceRef {
    /// Registry service name
    Named(String),
    /// Inline protocol/port pair
    Inline(InlineService),
}

/// Inline service definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineService {
    /// Protocol name
    pub protocol: String,
    /// Port or range
    pub port: PortSpec,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Platform and scopes to generate for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Enforcement platform
    pub platform: Platform,
    /// Platform-specific deployment boundaries
    pub scope: Vec<String>,
}

/// Per-policy guardrail overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GuardrailOverrides {
    /// Request that review-level guardrails be waived
    #[serde(default)]
    pub skip_review: bool,
    /// Reason for the waiver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

impl Policy {
    /// Load a policy from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| PolicyError::parse(format!("policy: {e}")))
    }

    /// Load a policy from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| PolicyError::parse(format!("{}: {e}", path.display())))
    }

    /// Policy name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Structural checks the typed parse cannot express; returns every violation
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.api_version != API_VERSION {
            errors.push(format!(
                "Unsupported apiVersion: {} (expected {API_VERSION})",
                self.api_version
            ));
        }
        if self.kind != ObjectKind::Policy.as_str() {
            errors.push(format!(
                "Unexpected kind: {} (expected {})",
                self.kind,
                ObjectKind::Policy.as_str()
            ));
        }
        if self.metadata.name.trim().is_empty() {
            errors.push("Policy name cannot be empty".to_string());
        } else if !is_safe_identifier(&self.metadata.name) {
            errors.push(format!(
                "Policy name '{}' may only contain letters, digits, '.', '_' and '-'",
                self.metadata.name
            ));
        }
        if self.metadata.requestor.trim().is_empty() {
            errors.push("Policy requestor cannot be empty".to_string());
        }
        if self.metadata.ticket.trim().is_empty() {
            errors.push("Policy ticket cannot be empty".to_string());
        }
        if self.spec.services.is_empty() {
            errors.push("Policy must reference at least one service".to_string());
        }
        if self.spec.targets.is_empty() {
            errors.push("Policy must declare at least one target".to_string());
        }
        for target in &self.spec.targets {
            if target.scope.is_empty() {
                errors.push(format!("Target {} has no scopes", target.platform));
            }
            if target.scope.iter().any(|scope| scope.trim().is_empty()) {
                errors.push(format!("Target {} has an empty scope", target.platform));
            }
            for scope in &target.scope {
                if !scope.trim().is_empty() && !is_safe_identifier(scope) {
                    errors.push(format!(
                        "Target {} scope '{scope}' may only contain letters, digits, '.', '_' and '-'",
                        target.platform
                    ));
                }
            }
        }

        errors
    }

    /// Group names referenced by source or destination
    pub fn referenced_groups(&self) -> BTreeSet<String> {
        [&self.spec.source, &self.spec.destination]
            .into_iter()
            .filter_map(|endpoint| endpoint.group().map(str::to_string))
            .collect()
    }

    /// Host names referenced by source or destination
    pub fn referenced_hosts(&self) -> BTreeSet<String> {
        [&self.spec.source, &self.spec.destination]
            .into_iter()
            .filter_map(|endpoint| match endpoint {
                Endpoint::Host(name) => Some(strip_host_prefix(name).to_string()),
                _ => None,
            })
            .collect()
    }

    /// Registry service names referenced by the policy
    pub fn referenced_services(&self) -> BTreeSet<String> {
        self.spec
            .services
            .iter()
            .filter_map(|service| match service {
                ServiceRef::Named(name) => Some(name.clone()),
                ServiceRef::Inline(_) => None,
            })
            .collect()
    }

    /// True if any target names `platform`
    pub fn targets_platform(&self, platform: Platform) -> bool {
        self.spec.targets.iter().any(|t| t.platform == platform)
    }

    /// Keep only targets whose platform is in `platforms`
    pub fn retain_platforms(&mut self, platforms: &[Platform]) {
        self.spec
            .targets
            .retain(|target| platforms.contains(&target.platform));
    }
}

/// Policy names and scopes become path components of generated files:
/// only `[A-Za-z0-9._-]`, never `.` alone or any `..` sequence
pub fn is_safe_identifier(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Host references may be written `host/<name>`
pub fn strip_host_prefix(name: &str) -> &str {
    name.strip_prefix("host/").unwrap_or(name)
}

/// Parse a canonical registry document and check its header
pub(crate) fn parse_document<T: DeserializeOwned>(
    contents: &str,
    kind: ObjectKind,
    header: impl Fn(&T) -> (&str, &str),
) -> Result<T> {
    let document: T = serde_yaml::from_str(contents)?;
    let (api_version, found_kind) = header(&document);
    if api_version != API_VERSION {
        return Err(PolicyError::InvalidFormat(format!(
            "Unsupported apiVersion: {api_version} (expected {API_VERSION})"
        )));
    }
    if found_kind != kind.as_str() {
        return Err(PolicyError::InvalidFormat(format!(
            "Unexpected kind: {found_kind} (expected {})",
            kind.as_str()
        )));
    }
    Ok(document)
}

fn default_logging() -> bool {
    true
}

fn kind_host() -> String {
    ObjectKind::Host.as_str().to_string()
}

fn kind_group() -> String {
    ObjectKind::Group.as_str().to_string()
}

fn kind_service() -> String {
    ObjectKind::Service.as_str().to_string()
}

fn kind_policy() -> String {
    ObjectKind::Policy.as_str().to_string()
}

// ============================================================================
// Resolved values
// ============================================================================

/// Concrete members of a group after flattening
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedMembers {
    /// Hosts, deduplicated by name in first-seen order
    pub hosts: Vec<Arc<Host>>,
    /// Literal networks, deduplicated by value
    pub networks: Vec<String>,
    /// Platform-native reference such as a DAG or label name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_reference: Option<String>,
}

impl ResolvedMembers {
    /// Add a host unless one with the same name is present
    pub fn add_host(&mut self, host: Arc<Host>) {
        if !self.hosts.iter().any(|h| h.name() == host.name()) {
            self.hosts.push(host);
        }
    }

    /// Add a network unless already present
    pub fn add_network(&mut self, network: impl Into<String>) {
        let network = network.into();
        if !self.networks.contains(&network) {
            self.networks.push(network);
        }
    }

    /// Union `other` into `self`, keeping first-seen order
    pub fn merge(&mut self, other: ResolvedMembers) {
        for host in other.hosts {
            self.add_host(host);
        }
        for network in other.networks {
            self.add_network(network);
        }
        if self.platform_reference.is_none() {
            self.platform_reference = other.platform_reference;
        }
    }

    /// Host IPv4 addresses followed by IPv4 networks
    pub fn all_ipv4(&self) -> Vec<String> {
        self.hosts
            .iter()
            .flat_map(|host| host.spec.addresses.ipv4.iter().cloned())
            .chain(self.networks.iter().filter(|n| !is_ipv6(n)).cloned())
            .collect()
    }

    /// Host IPv6 addresses followed by IPv6 networks
    pub fn all_ipv6(&self) -> Vec<String> {
        self.hosts
            .iter()
            .flat_map(|host| host.spec.addresses.ipv6.iter().cloned())
            .chain(self.networks.iter().filter(|n| is_ipv6(n)).cloned())
            .collect()
    }

    /// IPv4 then IPv6 addresses and networks
    pub fn all_addresses(&self) -> Vec<String> {
        let mut addresses = self.all_ipv4();
        addresses.extend(self.all_ipv6());
        addresses
    }

    /// True when at least one IP address or network was resolved
    pub fn has_addresses(&self) -> bool {
        !self.networks.is_empty()
            || self
                .hosts
                .iter()
                .any(|h| !h.spec.addresses.ipv4.is_empty() || !h.spec.addresses.ipv6.is_empty())
    }

    /// Host FQDNs
    pub fn all_fqdn(&self) -> Vec<String> {
        self.hosts
            .iter()
            .flat_map(|host| host.spec.addresses.fqdn.iter().cloned())
            .collect()
    }

    /// True when no host or network was resolved
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.networks.is_empty()
    }
}

/// What a resolved reference points at; selects the templating branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Any address
    Any,
    /// Literal addresses or networks
    Cidr,
    /// A single registry host
    Host,
    /// AWS security group id
    SecurityGroup,
    /// GCP network tag
    NetworkTag,
    /// GCP service account
    ServiceAccount,
    /// Azure application security group
    ApplicationSecurityGroup,
    /// Static address group
    AddressGroup,
    /// Tag-matched dynamic address group
    DynamicAddressGroup,
    /// Label set
    Label,
    /// IP list
    IpList,
    /// Combination of labels and IP lists, or static and dynamic objects
    Hybrid,
}

impl ReferenceKind {
    /// Snake-case tag
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Any => "any",
            ReferenceKind::Cidr => "cidr",
            ReferenceKind::Host => "host",
            ReferenceKind::SecurityGroup => "security_group",
            ReferenceKind::NetworkTag => "network_tag",
            ReferenceKind::ServiceAccount => "service_account",
            ReferenceKind::ApplicationSecurityGroup => "application_security_group",
            ReferenceKind::AddressGroup => "address_group",
            ReferenceKind::DynamicAddressGroup => "dynamic_address_group",
            ReferenceKind::Label => "label",
            ReferenceKind::IpList => "ip_list",
            ReferenceKind::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A group expressed in one platform's terms
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedGroup {
    /// Registry name, or the literal for `any`/`cidr`
    pub name: String,
    /// What rules should reference
    pub reference: String,
    /// Kind of reference
    pub kind: ReferenceKind,
    /// Flattened members
    pub members: ResolvedMembers,
    /// HCL for objects the reference depends on
    pub supporting_config: String,
}

impl ResolvedGroup {
    /// The `any` endpoint
    pub fn any() -> Self {
        ResolvedGroup {
            name: "any".to_string(),
            reference: "any".to_string(),
            kind: ReferenceKind::Any,
            members: ResolvedMembers::default(),
            supporting_config: String::new(),
        }
    }

    /// A literal network endpoint
    pub fn cidr(cidr: &str) -> Self {
        let mut members = ResolvedMembers::default();
        members.add_network(cidr);
        ResolvedGroup {
            name: cidr.to_string(),
            reference: cidr.to_string(),
            kind: ReferenceKind::Cidr,
            members,
            supporting_config: String::new(),
        }
    }

    /// A single registry host as a literal group of its addresses
    pub fn host(host: Arc<Host>) -> Self {
        let name = host.name().to_string();
        let mut members = ResolvedMembers::default();
        members.add_host(host);
        ResolvedGroup {
            reference: name.clone(),
            name,
            kind: ReferenceKind::Host,
            members,
            supporting_config: String::new(),
        }
    }

    /// True for literal endpoints that adapters render as addresses
    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            ReferenceKind::Any | ReferenceKind::Cidr | ReferenceKind::Host
        )
    }
}

/// A service expressed in one platform's terms
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedService {
    /// Service name, or `protocol-port` for inline services
    pub name: String,
    /// Protocol definitions
    pub protocols: Vec<ProtocolDef>,
    /// Application identifiers for App-ID platforms
    pub applications: Vec<String>,
    /// Platform-native service object name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_reference: Option<String>,
}

impl ResolvedService {
    /// Wrap an inline definition without consulting an adapter
    pub fn inline(service: &InlineService) -> Self {
        ResolvedService {
            name: format!("{}-{}", service.protocol, service.port),
            protocols: vec![ProtocolDef {
                protocol: service.protocol.clone(),
                port: Some(service.port),
                description: service.description.clone(),
            }],
            applications: Vec::new(),
            service_reference: None,
        }
    }

    /// Build from a registry service without platform specifics
    pub fn from_service(service: &Service) -> Self {
        ResolvedService {
            name: service.name().to_string(),
            protocols: service.spec.protocols.clone(),
            applications: Vec::new(),
            service_reference: None,
        }
    }
}

/// A policy whose endpoints and services are resolved for one platform and scope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPolicy {
    /// Policy name
    pub name: String,
    /// Description, empty when absent
    pub description: String,
    /// Change ticket
    pub ticket: String,
    /// Resolved source
    pub source: ResolvedGroup,
    /// Resolved destination
    pub destination: ResolvedGroup,
    /// Resolved services, in declaration order
    pub services: Vec<ResolvedService>,
    /// Allow or deny
    pub action: Action,
    /// Traffic logging
    pub logging: bool,
}
