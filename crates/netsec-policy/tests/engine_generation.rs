//! End-to-end generation through the adapter engine

mod common;

use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use netsec_policy::{
    AdapterEngine, EngineOptions, Platform, Policy, PolicyError, Registry, deployment_unit,
    model::{ResolvedGroup, ResolvedPolicy, ResolvedService},
    PlatformAdapter,
};

use common::{policy, repository, write};

fn engine(root: &std::path::Path) -> AdapterEngine {
    let registry = Arc::new(Registry::load(root.join("registry")).unwrap());
    AdapterEngine::with_default_adapters(registry, EngineOptions::default(), &BTreeMap::new())
        .unwrap()
}

const AWS_S1: &str = "    - platform: aws\n      scope: [\"s1\"]";

/// Adapter that records how often group resolution is requested
struct CountingAdapter {
    registry: Arc<Registry>,
    calls: Arc<AtomicUsize>,
}

impl PlatformAdapter for CountingAdapter {
    fn platform(&self) -> Platform {
        Platform::Aws
    }

    fn display_name(&self) -> &'static str {
        "Counting"
    }

    fn terraform_provider(&self) -> &'static str {
        "test/counting"
    }

    fn registry(&self) -> &Registry {
        &self.registry
    }

    fn resolve_group(&self, _group_name: &str, _scope: &str) -> netsec_policy::Result<ResolvedGroup> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResolvedGroup::any())
    }

    fn resolve_service(
        &self,
        service_name: &str,
        _scope: &str,
    ) -> netsec_policy::Result<ResolvedService> {
        let service = self.registry.get_service(service_name)?;
        Ok(ResolvedService::from_service(&service))
    }

    fn generate_terraform(&self, policy: &ResolvedPolicy, scope: &str) -> String {
        format!(
            "# {} -> {} in {scope}\n",
            policy.source.reference, policy.destination.reference
        )
    }
}

/// Test a single group-to-group policy on one platform and scope
#[test]
fn test_single_target_output() {
    let repo = repository();
    let engine = engine(repo.path());
    let mut yaml = policy("web-to-web", AWS_S1);
    yaml = yaml
        .replace("group: db-servers", "group: web-servers")
        .replace("- postgres", "- https");
    let policy = Policy::from_yaml(&yaml).unwrap();

    let output = engine.process_policy(&policy);
    assert!(output.is_success());
    assert_eq!(output.platforms.len(), 1);

    let scopes = output.platforms[&Platform::Aws].as_ref().unwrap();
    assert_eq!(scopes.keys().collect::<Vec<_>>(), vec!["s1"]);

    let text = &scopes["s1"];
    assert!(text.contains("# Ticket: CHG-2001"));
    assert!(text.contains("# Scope: s1"));
    assert!(text.contains("data \"aws_security_group\" \"web_servers\""));
    assert!(text.contains("source_security_group_id = data.aws_security_group.web_servers.id"));
    assert!(text.contains("security_group_id        = data.aws_security_group.web_servers.id"));
    assert!(text.contains("from_port                = 443"));
    // One lookup even though the group is on both sides
    assert_eq!(text.matches("data \"aws_security_group\"").count(), 1);
}

/// Test that `any` to `any` never asks the adapter to resolve a group
#[test]
fn test_any_to_any_skips_group_resolution() {
    let repo = repository();
    let registry = Arc::new(Registry::load(repo.path().join("registry")).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut engine = AdapterEngine::new(Arc::clone(&registry), EngineOptions::default());
    engine.register_adapter(Box::new(CountingAdapter {
        registry,
        calls: Arc::clone(&calls),
    }));

    let yaml = policy("open", AWS_S1)
        .replace("group: web-servers", "any: true")
        .replace("group: db-servers", "any: true");
    let policy = Policy::from_yaml(&yaml).unwrap();

    let output = engine.process_policy(&policy);
    let scopes = output.platforms[&Platform::Aws].as_ref().unwrap();
    assert!(scopes["s1"].contains("# any -> any in s1"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Test every built-in adapter renders its rule resource
#[test]
fn test_all_platforms_generate() {
    let repo = repository();
    let engine = engine(repo.path());
    let targets = Platform::ALL
        .iter()
        .map(|p| format!("    - platform: {p}\n      scope: [\"main\"]"))
        .collect::<Vec<_>>()
        .join("\n");
    let policy = Policy::from_yaml(&policy("web-to-db", &targets)).unwrap();

    let output = engine.process_policy(&policy);
    for (platform, result) in &output.platforms {
        assert!(result.is_ok(), "{platform}: {:?}", result.as_ref().err());
    }

    let expected = [
        (Platform::Aws, "resource \"aws_security_group_rule\""),
        (Platform::Gcp, "resource \"google_compute_firewall\""),
        (Platform::Azure, "resource \"azurerm_network_security_rule\""),
        (Platform::Paloalto, "resource \"panos_panorama_security_policy\""),
        (Platform::Fortinet, "resource \"fortios_firewall_policy\""),
        (Platform::Illumio, "resource \"illumio-core_rule_set\""),
    ];
    for (platform, resource) in expected {
        let text = &output.platforms[&platform].as_ref().unwrap()["main"];
        assert!(text.contains(resource), "{platform} output:\n{text}");
        assert!(text.contains("CHG-2001"), "{platform} output:\n{text}");
    }

    let gcp = &output.platforms[&Platform::Gcp].as_ref().unwrap()["main"];
    assert!(gcp.contains("source_tags"));
    assert!(gcp.contains("\"10.0.2.10\""));

    let paloalto = &output.platforms[&Platform::Paloalto].as_ref().unwrap()["main"];
    assert!(paloalto.contains("panos_panorama_dynamic_address_group"));
}

/// Test that one failing platform leaves the others intact
#[test]
fn test_platform_failures_are_isolated() {
    let repo = repository();
    write(
        repo.path(),
        "registry/groups/aws-only.yaml",
        r#"
apiVersion: netsec/v1
kind: Group
metadata:
  name: aws-only
spec:
  membership:
    networks: ["172.16.0.0/16"]
  platform-mapping:
    aws: {}
"#,
    );
    let engine = engine(repo.path());
    let targets = "    - platform: aws\n      scope: [\"a\"]\n    - platform: gcp\n      scope: [\"p\"]";
    let yaml = policy("partial", targets).replace("group: web-servers", "group: aws-only");
    let policy = Policy::from_yaml(&yaml).unwrap();

    let output = engine.process_policy(&policy);
    assert!(!output.is_success());
    assert!(output.platforms[&Platform::Aws].is_ok());
    match &output.platforms[&Platform::Gcp] {
        Err(PolicyError::ValidationError { errors, .. }) => {
            assert_eq!(errors, &vec!["Group 'aws-only' has no gcp platform mapping".to_string()]);
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
}

/// Test that a deny policy is rejected for AWS
#[test]
fn test_aws_rejects_deny() {
    let repo = repository();
    let engine = engine(repo.path());
    let yaml = policy("blocked", AWS_S1).replace("action: allow", "action: deny");
    let policy = Policy::from_yaml(&yaml).unwrap();

    let output = engine.process_policy(&policy);
    let err = output.platforms[&Platform::Aws].as_ref().unwrap_err();
    assert!(err.to_string().contains("only support allow rules"), "{err}");
}

/// Test that a platform without an adapter is reported per platform
#[test]
fn test_unregistered_platform() {
    let repo = repository();
    let registry = Arc::new(Registry::load(repo.path().join("registry")).unwrap());
    let engine = AdapterEngine::new(registry, EngineOptions::default());
    let policy = Policy::from_yaml(&policy("lonely", AWS_S1)).unwrap();

    let output = engine.process_policy(&policy);
    assert!(matches!(
        output.platforms[&Platform::Aws],
        Err(PolicyError::UnknownPlatform(_))
    ));
}

/// Test targets on one platform merge and scopes deduplicate
#[test]
fn test_targets_merge_per_platform() {
    let repo = repository();
    let engine = engine(repo.path());
    let targets = "    - platform: aws\n      scope: [\"a\", \"b\"]\n    - platform: aws\n      scope: [\"b\", \"c\"]";
    let policy = Policy::from_yaml(&policy("merged", targets)).unwrap();

    let output = engine.process_policy(&policy);
    let scopes = output.platforms[&Platform::Aws].as_ref().unwrap();
    assert_eq!(scopes.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
}

fn policy_files(root: &std::path::Path) -> Vec<PathBuf> {
    write(root, "policies/a.yaml", &policy("alpha", AWS_S1));
    write(
        root,
        "policies/b.yaml",
        &policy("beta", "    - platform: gcp\n      scope: [\"proj\"]\n    - platform: aws\n      scope: [\"s1\"]"),
    );
    write(root, "policies/broken.yaml", "apiVersion: netsec/v1\nkind: NetworkPolicy\n");
    write(
        root,
        "policies/fortinet.yaml",
        &policy("gamma", "    - platform: fortinet\n      scope: [\"fw1\"]"),
    );
    netsec_policy::registry::collect_documents(root.join("policies")).unwrap()
}

/// Test batch processing with a platform filter and a broken file
#[test]
fn test_process_policies_batch() {
    let repo = repository();
    let engine = engine(repo.path());
    let files = policy_files(repo.path());

    let batch = engine.process_policies(&files, Some(&[Platform::Aws, Platform::Gcp]));
    assert_eq!(batch.results.keys().collect::<Vec<_>>(), vec!["alpha", "beta"]);
    assert_eq!(batch.results["beta"].len(), 2);
    assert_eq!(batch.failures.len(), 1);
    assert!(batch.failures[0].policy.ends_with("broken.yaml"));
    assert!(batch.failures[0].platform.is_none());
}

/// Test that two files declaring one policy name are reported
#[test]
fn test_duplicate_policy_names() {
    let repo = repository();
    let engine = engine(repo.path());
    write(repo.path(), "policies/one.yaml", &policy("same", AWS_S1));
    write(repo.path(), "policies/two.yaml", &policy("same", AWS_S1));
    let files = netsec_policy::registry::collect_documents(repo.path().join("policies")).unwrap();

    let batch = engine.process_policies(&files, None);
    assert_eq!(batch.results.len(), 1);
    assert_eq!(batch.failures.len(), 1);
    assert!(batch.failures[0].error.to_string().contains("Duplicate policy name"));
}

/// Test the concurrent fold matches the sequential one
#[tokio::test]
async fn test_concurrent_matches_sequential() {
    let repo = repository();
    let engine = Arc::new(engine(repo.path()));
    let files = policy_files(repo.path());

    let sequential = engine.process_policies(&files, None);
    let concurrent = engine.process_policies_concurrent(files.clone(), None).await;

    assert_eq!(sequential.results, concurrent.results);
    assert_eq!(sequential.failures.len(), concurrent.failures.len());
    assert_eq!(concurrent.results.len(), 3);
}

/// Test writing files and deriving deployment units
#[test]
fn test_write_terraform_and_manifest() {
    let repo = repository();
    let engine = engine(repo.path());
    let files = policy_files(repo.path());
    let batch = engine.process_policies(&files, None);

    let out = repo.path().join("generated");
    let manifest = engine.write_terraform(&batch.results, &out).unwrap();

    assert!(out.join("aws/s1/alpha.tf").is_file());
    assert!(out.join("aws/s1/beta.tf").is_file());
    assert!(out.join("gcp/proj/beta.tf").is_file());
    assert!(out.join("fortinet/fw1/gamma.tf").is_file());
    assert_eq!(
        manifest.workspaces(),
        vec!["netsec-aws-s1", "netsec-gcp-proj", "netsec-fortinet-fw1"]
    );

    let manifest_file = repo.path().join("out/workspaces.json");
    manifest.write_json(&manifest_file).unwrap();
    let listed: Vec<String> =
        serde_json::from_str(&fs::read_to_string(manifest_file).unwrap()).unwrap();
    assert_eq!(listed, manifest.workspaces());

    let text = fs::read_to_string(out.join("aws/s1/alpha.tf")).unwrap();
    assert!(text.starts_with("# ====="));
    assert!(text.contains("# Policy: alpha"));
    assert!(text.contains("# Policy Resources"));
}

/// Test deployment-unit naming
#[test]
fn test_deployment_unit() {
    assert_eq!(deployment_unit("netsec", Platform::Azure, "sub-1"), "netsec-azure-sub-1");
    assert_eq!(deployment_unit("corp", Platform::Illumio, "pce"), "corp-illumio-pce");
}

const ADMINS: &str = r#"
apiVersion: netsec/v1
kind: Group
metadata:
  name: admins
spec:
  membership:
    static: ["decommissioned-host"]
  platform-mapping:
    aws: {}
    gcp: {}
    azure: {}
    paloalto: {}
    fortinet: {}
    illumio:
      strategy: ip-list
"#;

const V6_HOST: &str = r#"
apiVersion: netsec/v1
kind: Host
metadata:
  name: v6
spec:
  addresses:
    ipv6: ["2001:db8::1"]
"#;

fn assert_empty_endpoint(result: &netsec_policy::Result<impl std::fmt::Debug>, expected: &str) {
    match result {
        Err(PolicyError::EmptyEndpoint { name, .. }) => assert_eq!(name, expected),
        other => panic!("expected an empty-endpoint error, got {other:?}"),
    }
}

/// Test that a group whose members all vanished fails instead of opening to the world
#[test]
fn test_empty_group_never_widens_to_any() {
    let repo = repository();
    write(repo.path(), "registry/groups/admins.yaml", ADMINS);
    let engine = engine(repo.path());
    let targets = Platform::ALL
        .iter()
        .map(|p| format!("    - platform: {p}\n      scope: [\"main\"]"))
        .collect::<Vec<_>>()
        .join("\n");
    let yaml = policy("admin-access", &targets).replace("group: web-servers", "group: admins");
    let policy = Policy::from_yaml(&yaml).unwrap();

    let output = engine.process_policy(&policy);
    assert_eq!(output.platforms.len(), Platform::ALL.len());
    for result in output.platforms.values() {
        assert_empty_endpoint(result, "admins");
    }
}

/// Test that a dynamic selector matching no host fails on address-based strategies
#[test]
fn test_dynamic_group_without_matches() {
    let repo = repository();
    write(
        repo.path(),
        "registry/groups/cache.yaml",
        r#"
apiVersion: netsec/v1
kind: Group
metadata:
  name: cache
spec:
  membership:
    dynamic:
      match-labels:
        tier: cache
  platform-mapping:
    aws: {}
"#,
    );
    let engine = engine(repo.path());
    let yaml = policy("to-cache", AWS_S1).replace("group: db-servers", "group: cache");
    let policy = Policy::from_yaml(&yaml).unwrap();

    let output = engine.process_policy(&policy);
    assert_empty_endpoint(&output.platforms[&Platform::Aws], "cache");
}

/// Test that PaloAlto static groups never reference an address group that was not emitted
#[test]
fn test_paloalto_static_group_without_addresses() {
    let repo = repository();
    write(repo.path(), "registry/groups/admins.yaml", ADMINS);
    let engine = engine(repo.path());
    let adapter = engine.adapter(Platform::Paloalto).unwrap();

    assert_empty_endpoint(&adapter.resolve_group("admins", "main"), "admins");

    let resolved = adapter.resolve_group("db-servers", "main").unwrap();
    assert_eq!(resolved.reference, "grp-db-servers");
    assert!(resolved.supporting_config.contains("panos_panorama_address_group"));
}

/// Test that an IPv6-only host renders IPv6 ranges and never `0.0.0.0/0`
#[test]
fn test_ipv6_host_source() {
    let repo = repository();
    write(repo.path(), "registry/hosts/v6.yaml", V6_HOST);
    let engine = engine(repo.path());
    let targets = "    - platform: aws\n      scope: [\"s1\"]\n    - platform: gcp\n      scope: [\"proj\"]";
    let yaml = policy("from-v6", targets).replace("group: web-servers", "host: v6");
    let policy = Policy::from_yaml(&yaml).unwrap();

    let output = engine.process_policy(&policy);
    assert!(output.is_success(), "{:?}", output.platforms);

    let aws = &output.platforms[&Platform::Aws].as_ref().unwrap()["s1"];
    assert!(aws.contains("ipv6_cidr_blocks"), "{aws}");
    assert!(aws.contains("[\"2001:db8::1\"]"), "{aws}");
    assert!(!aws.lines().any(|line| line.trim_start().starts_with("cidr_blocks")), "{aws}");
    assert!(!aws.contains("0.0.0.0/0"), "{aws}");

    let gcp = &output.platforms[&Platform::Gcp].as_ref().unwrap()["proj"];
    let ranges = gcp
        .lines()
        .find(|line| line.trim_start().starts_with("source_ranges"))
        .unwrap();
    assert!(ranges.contains("\"2001:db8::1\""), "{gcp}");
    assert!(!gcp.contains("0.0.0.0/0"), "{gcp}");
}

/// Test that a host with only a domain name cannot be rendered as a literal endpoint
#[test]
fn test_host_without_addresses() {
    let repo = repository();
    write(
        repo.path(),
        "registry/hosts/named-only.yaml",
        r#"
apiVersion: netsec/v1
kind: Host
metadata:
  name: named-only
spec:
  addresses:
    fqdn: ["named-only.example.com"]
"#,
    );
    let engine = engine(repo.path());
    let yaml = policy("from-name", AWS_S1).replace("group: web-servers", "host: named-only");
    let policy = Policy::from_yaml(&yaml).unwrap();

    let output = engine.process_policy(&policy);
    match &output.platforms[&Platform::Aws] {
        Err(PolicyError::EmptyEndpoint { kind, name, .. }) => {
            assert_eq!(*kind, netsec_policy::ObjectKind::Host);
            assert_eq!(name, "named-only");
        }
        other => panic!("expected an empty-endpoint error, got {other:?}"),
    }
}

/// Test that only `any` renders as `0.0.0.0/0`
#[test]
fn test_any_source_renders_open_range() {
    let repo = repository();
    let engine = engine(repo.path());
    let yaml = policy("from-anywhere", AWS_S1).replace("group: web-servers", "any: true");
    let policy = Policy::from_yaml(&yaml).unwrap();

    let output = engine.process_policy(&policy);
    let aws = &output.platforms[&Platform::Aws].as_ref().unwrap()["s1"];
    let blocks = aws
        .lines()
        .find(|line| line.trim_start().starts_with("cidr_blocks"))
        .unwrap();
    assert!(blocks.contains("[\"0.0.0.0/0\"]"), "{aws}");
    assert!(!aws.contains("ipv6_cidr_blocks"), "{aws}");
}

/// Test that an unknown strategy fails on its platform and leaves others intact
#[test]
fn test_unknown_strategy_fails_loudly() {
    let repo = repository();
    write(
        repo.path(),
        "registry/groups/odd.yaml",
        r#"
apiVersion: netsec/v1
kind: Group
metadata:
  name: odd
spec:
  membership:
    networks: ["10.9.0.0/16"]
  platform-mapping:
    aws:
      strategy: nonsense
    gcp: {}
"#,
    );
    let engine = engine(repo.path());
    let targets = "    - platform: aws\n      scope: [\"a\"]\n    - platform: gcp\n      scope: [\"p\"]";
    let yaml = policy("odd-source", targets).replace("group: web-servers", "group: odd");
    let policy = Policy::from_yaml(&yaml).unwrap();

    let output = engine.process_policy(&policy);
    match &output.platforms[&Platform::Aws] {
        Err(PolicyError::StrategyNotImplemented { platform, strategy, name, .. }) => {
            assert_eq!(platform, "aws");
            assert_eq!(strategy, "nonsense");
            assert_eq!(name, "odd");
        }
        other => panic!("expected an unimplemented strategy, got {other:?}"),
    }
    let gcp = &output.platforms[&Platform::Gcp].as_ref().unwrap()["p"];
    assert!(gcp.contains("\"10.9.0.0/16\""), "{gcp}");
}

/// Test that resolving a group directly without a platform mapping is an error
#[test]
fn test_resolve_group_without_mapping() {
    let repo = repository();
    let engine = engine(repo.path());
    let adapter = engine.adapter(Platform::Azure).unwrap();

    match adapter.resolve_group("app-tier", "main") {
        Err(PolicyError::MissingPlatformMapping { platform, kind, name }) => {
            assert_eq!(platform, "azure");
            assert_eq!(kind, netsec_policy::ObjectKind::Group);
            assert_eq!(name, "app-tier");
        }
        other => panic!("expected a missing mapping, got {other:?}"),
    }
}

/// Test that names and scopes cannot steer output outside the output root
#[test]
fn test_write_terraform_rejects_traversal() {
    let repo = repository();
    let engine = engine(repo.path());
    let out = repo.path().join("generated").join("nested");

    let mut by_name: netsec_policy::GenerationResults = BTreeMap::new();
    by_name
        .entry("../../escaped".to_string())
        .or_default()
        .insert(Platform::Aws, BTreeMap::from([("s1".to_string(), "# x\n".to_string())]));
    assert!(engine.write_terraform(&by_name, &out).is_err());

    let mut by_scope: netsec_policy::GenerationResults = BTreeMap::new();
    by_scope.entry("fine".to_string()).or_default().insert(
        Platform::Aws,
        BTreeMap::from([("../../../escaped-scope".to_string(), "# x\n".to_string())]),
    );
    assert!(engine.write_terraform(&by_scope, &out).is_err());

    assert!(!repo.path().join("generated/escaped.tf").exists());
    assert!(!repo.path().join("escaped-scope").exists());
    assert!(!repo.path().join("generated/escaped-scope").exists());
}

/// Test that a policy file with a traversal name is rejected before generation
#[test]
fn test_traversal_policy_rejected_in_batch() {
    let repo = repository();
    let engine = engine(repo.path());
    write(
        repo.path(),
        "policies/escape.yaml",
        &policy("../../escaped", "    - platform: aws\n      scope: [\"../../../escaped-scope\"]"),
    );
    let files = netsec_policy::registry::collect_documents(repo.path().join("policies")).unwrap();

    let batch = engine.process_policies(&files, None);
    assert!(batch.results.is_empty());
    assert_eq!(batch.failures.len(), 1);
    match &batch.failures[0].error {
        PolicyError::ValidationError { errors, .. } => assert_eq!(errors.len(), 2, "{errors:?}"),
        other => panic!("expected a validation error, got {other:?}"),
    }
}
