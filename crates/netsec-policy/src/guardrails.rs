//! Guardrail evaluation: auto-approve, require review, or deny a policy

use std::{fmt, path::Path, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{PolicyError, Result},
    model::{Endpoint, Policy, ServiceRef},
    registry::Registry,
};

/// Outcome of a guardrail evaluation, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    /// No rule matched
    AutoApprove,
    /// A human must approve the change
    RequireReview,
    /// The change must not be applied
    Deny,
}

impl Decision {
    /// Kebab-case keyword
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::AutoApprove => "auto-approve",
            Decision::RequireReview => "require-review",
            Decision::Deny => "deny",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action a matching rule imposes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleAction {
    /// Flag for review
    #[default]
    RequireReview,
    /// Reject
    Deny,
}

impl From<RuleAction> for Decision {
    fn from(action: RuleAction) -> Self {
        match action {
            RuleAction::RequireReview => Decision::RequireReview,
            RuleAction::Deny => Decision::Deny,
        }
    }
}

/// Which side of a policy a condition inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// `source`
    Source,
    /// `destination`
    Destination,
}

impl Side {
    fn endpoint<'a>(&self, policy: &'a Policy) -> &'a Endpoint {
        match self {
            Side::Source => &policy.spec.source,
            Side::Destination => &policy.spec.destination,
        }
    }
}

/// A guardrail condition, parsed when the rules file is loaded
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Condition {
    /// `<side>.type == any`
    AnyEndpoint(Side),
    /// `<side>.type == internet`: a `0.0.0.0/0` or `::/0` literal
    InternetEndpoint(Side),
    /// `source.environment != destination.environment`
    CrossEnvironment,
    /// `services.port not in [p, ...]`
    PortNotIn(Vec<u16>),
}

impl FromStr for Condition {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase();
        let condition = match normalized.as_str() {
            "source.type == any" => Condition::AnyEndpoint(Side::Source),
            "destination.type == any" => Condition::AnyEndpoint(Side::Destination),
            "source.type == internet" => Condition::InternetEndpoint(Side::Source),
            "destination.type == internet" => Condition::InternetEndpoint(Side::Destination),
            "source.environment != destination.environment"
            | "destination.environment != source.environment" => Condition::CrossEnvironment,
            other => {
                let list = other
                    .strip_prefix("services.port not in")
                    .map(str::trim)
                    .and_then(|rest| rest.strip_prefix('['))
                    .and_then(|rest| rest.strip_suffix(']'))
                    .ok_or_else(|| {
                        PolicyError::InvalidFormat(format!("Unknown guardrail condition: {s}"))
                    })?;
                let ports = list
                    .split(',')
                    .map(str::trim)
                    .filter(|port| !port.is_empty())
                    .map(|port| {
                        port.parse::<u16>().map_err(|_| {
                            PolicyError::InvalidFormat(format!(
                                "Invalid port '{port}' in guardrail condition: {s}"
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Condition::PortNotIn(ports)
            }
        };
        Ok(condition)
    }
}

impl TryFrom<String> for Condition {
    type Error = PolicyError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// One guardrail rule
#[derive(Debug, Clone, Deserialize)]
pub struct GuardrailRule {
    /// Rule name
    #[serde(default = "unnamed")]
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// What a match imposes
    #[serde(default)]
    pub action: RuleAction,
    /// Reason reported on a match
    #[serde(default)]
    pub message: Option<String>,
    /// The rule matches when any condition holds
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

fn unnamed() -> String {
    "unnamed".to_string()
}

impl GuardrailRule {
    fn reason(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("Matched rule: {}", self.name))
    }
}

/// Contents of a guardrail rules file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuardrailRules {
    /// Rules, evaluated in order
    #[serde(default)]
    pub rules: Vec<GuardrailRule>,
}

impl GuardrailRules {
    /// Parse rules from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(GuardrailRules::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| PolicyError::parse(format!("guardrail rules: {e}")))
    }

    /// Load rules from a file; a missing file means no rules
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No guardrail rules at {}", path.display());
            return Ok(GuardrailRules::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}

/// A rule that matched a policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedRule {
    /// Rule name
    pub name: String,
    /// Rule message
    pub reason: String,
}

/// Evaluation of one policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    /// Final decision
    pub action: Decision,
    /// Every matching rule
    pub matched_rules: Vec<MatchedRule>,
    /// A justified `skip-review` lowered the decision to auto-approve
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub review_waived: bool,
}

/// Evaluates policies against a rule set using registry metadata
pub struct GuardrailEngine {
    registry: Arc<Registry>,
    rules: GuardrailRules,
}

impl GuardrailEngine {
    /// Create an evaluator
    pub fn new(registry: Arc<Registry>, rules: GuardrailRules) -> Self {
        GuardrailEngine { registry, rules }
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[GuardrailRule] {
        &self.rules.rules
    }

    /// Evaluate one policy. `deny` beats `require-review` beats `auto-approve`.
    pub fn evaluate(&self, policy: &Policy) -> Evaluation {
        let mut action = Decision::AutoApprove;
        let mut matched_rules = Vec::new();

        for rule in &self.rules.rules {
            if rule.conditions.iter().any(|c| self.check(policy, c)) {
                matched_rules.push(MatchedRule {
                    name: rule.name.clone(),
                    reason: rule.reason(),
                });
                action = action.max(rule.action.into());
            }
        }

        let justified = policy.spec.guardrails.as_ref().is_some_and(|overrides| {
            overrides.skip_review
                && overrides
                    .justification
                    .as_deref()
                    .is_some_and(|text| !text.trim().is_empty())
        });
        let review_waived = justified && action == Decision::RequireReview;
        if review_waived {
            debug!("Review waived for policy {}", policy.name());
            action = Decision::AutoApprove;
        }

        Evaluation {
            action,
            matched_rules,
            review_waived,
        }
    }

    /// True if `condition` holds for `policy`
    pub fn check(&self, policy: &Policy, condition: &Condition) -> bool {
        match condition {
            Condition::AnyEndpoint(side) => *side.endpoint(policy) == Endpoint::Any,
            Condition::InternetEndpoint(side) => matches!(
                side.endpoint(policy),
                Endpoint::Cidr(cidr) if cidr == "0.0.0.0/0" || cidr == "::/0"
            ),
            Condition::CrossEnvironment => {
                match (
                    self.environment(&policy.spec.source),
                    self.environment(&policy.spec.destination),
                ) {
                    (Some(source), Some(destination)) => source != destination,
                    _ => false,
                }
            }
            Condition::PortNotIn(allowed) => self.ports(policy).iter().any(|(from, to)| {
                from != to || !allowed.contains(from)
            }),
        }
    }

    /// Environment of an endpoint: the group `environment` label, or the host's
    fn environment(&self, endpoint: &Endpoint) -> Option<String> {
        match endpoint {
            Endpoint::Group(name) => {
                let group = self.registry.get_group(name).ok()?;
                group.metadata.labels.get("environment").cloned()
            }
            Endpoint::Host(name) => {
                let host = self.registry.get_host(name).ok()?;
                host.spec
                    .environment
                    .map(|env| env.as_str().to_string())
                    .or_else(|| host.labels().get("environment").cloned())
            }
            _ => None,
        }
    }

    /// Port bounds of every protocol the policy allows; no port means every port
    fn ports(&self, policy: &Policy) -> Vec<(u16, u16)> {
        let mut ports = Vec::new();
        for service in &policy.spec.services {
            match service {
                ServiceRef::Named(name) => {
                    if let Ok(service) = self.registry.get_service(name) {
                        ports.extend(
                            service
                                .spec
                                .protocols
                                .iter()
                                .map(|proto| match proto.port {
                                    Some(port) => (port.from_port(), port.to_port()),
                                    None => (0, u16::MAX),
                                }),
                        );
                    }
                }
                ServiceRef::Inline(inline) => {
                    ports.push((inline.port.from_port(), inline.port.to_port()))
                }
            }
        }
        ports
    }
}

/// A policy listed as flagged or denied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlaggedPolicy {
    /// Policy name
    pub name: String,
    /// Matched rule reasons, comma separated
    pub reason: String,
}

/// Evaluation of one policy file in a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyEvaluation {
    /// Policy name
    pub name: String,
    /// Source file
    pub file: String,
    /// Decision
    pub action: Decision,
    /// Matched rules
    pub matched_rules: Vec<MatchedRule>,
}

/// Summary over a batch of policies
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardrailReport {
    /// No policy was flagged or denied
    pub auto_approve: bool,
    /// At least one policy needs review
    pub require_review: bool,
    /// At least one policy is denied
    pub denied: bool,
    /// Every evaluation
    pub policies: Vec<PolicyEvaluation>,
    /// Policies needing review
    pub flagged_policies: Vec<FlaggedPolicy>,
    /// Denied policies
    pub denied_policies: Vec<FlaggedPolicy>,
}

impl Default for GuardrailReport {
    fn default() -> Self {
        GuardrailReport {
            auto_approve: true,
            require_review: false,
            denied: false,
            policies: Vec::new(),
            flagged_policies: Vec::new(),
            denied_policies: Vec::new(),
        }
    }
}

impl GuardrailReport {
    /// Empty report that auto-approves
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one evaluation into the summary
    pub fn record(&mut self, policy: &Policy, file: &str, evaluation: Evaluation) {
        let reason = evaluation
            .matched_rules
            .iter()
            .map(|rule| rule.reason.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let flagged = FlaggedPolicy {
            name: policy.name().to_string(),
            reason,
        };

        match evaluation.action {
            Decision::Deny => {
                self.denied = true;
                self.auto_approve = false;
                self.denied_policies.push(flagged);
            }
            Decision::RequireReview => {
                self.require_review = true;
                self.auto_approve = false;
                self.flagged_policies.push(flagged);
            }
            Decision::AutoApprove => {}
        }

        self.policies.push(PolicyEvaluation {
            name: policy.name().to_string(),
            file: file.to_string(),
            action: evaluation.action,
            matched_rules: evaluation.matched_rules,
        });
    }

    /// Most severe decision across the batch
    pub fn decision(&self) -> Decision {
        self.policies
            .iter()
            .map(|p| p.action)
            .max()
            .unwrap_or(Decision::AutoApprove)
    }

    /// Write the report as pretty JSON
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
