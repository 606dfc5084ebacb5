//! Group resolution and generation benchmarks over a synthetic registry

use std::{collections::BTreeMap, sync::Arc};

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use netsec_policy::{
    AdapterEngine, EngineOptions, Group, Host, Policy, Registry, Service,
};

/// A registry with `hosts` labelled hosts, one group per tier and a chain of
/// `depth` groups nesting each other
fn build_registry(hosts: usize, depth: usize) -> Registry {
    let tiers = ["web", "app", "db", "cache"];

    let host_docs = (0..hosts).map(|i| {
        serde_yaml::from_str::<Host>(&format!(
            r#"
apiVersion: netsec/v1
metadata:
  name: host-{i:05}
spec:
  addresses:
    ipv4: ["10.{}.{}.{}"]
  labels:
    tier: {}
"#,
            i / 65536,
            (i / 256) % 256,
            i % 256,
            tiers[i % tiers.len()]
        ))
        .expect("host document")
    });

    let mut group_docs: Vec<Group> = tiers
        .iter()
        .map(|tier| {
            serde_yaml::from_str(&format!(
                r#"
apiVersion: netsec/v1
metadata:
  name: {tier}
spec:
  membership:
    dynamic:
      match-labels:
        tier: {tier}
    networks: ["172.16.0.0/16"]
  platform-mapping:
    aws: {{}}
"#
            ))
            .expect("group document")
        })
        .collect();

    for level in 0..depth {
        let nested = if level == 0 {
            "web".to_string()
        } else {
            format!("chain-{}", level - 1)
        };
        group_docs.push(
            serde_yaml::from_str(&format!(
                r#"
apiVersion: netsec/v1
metadata:
  name: chain-{level}
spec:
  membership:
    groups: ["{nested}", "db"]
  platform-mapping:
    aws: {{}}
"#
            ))
            .expect("group document"),
        );
    }

    let https: Service = serde_yaml::from_str(
        r#"
apiVersion: netsec/v1
metadata:
  name: https
spec:
  protocols:
    - protocol: tcp
      port: 443
"#,
    )
    .expect("service document");

    Registry::from_objects(host_docs, group_docs, [https]).expect("registry")
}

fn bench_dynamic_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("dynamic_resolution");
    for hosts in [100, 1_000, 10_000] {
        let registry = build_registry(hosts, 0);
        let web = registry.get_group("web").expect("web group");
        group.bench_with_input(BenchmarkId::from_parameter(hosts), &hosts, |b, _| {
            b.iter(|| black_box(registry.resolve_group_members(&web)))
        });
    }
    group.finish();
}

fn bench_nested_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("nested_resolution");
    for depth in [1, 8, 32] {
        let registry = build_registry(1_000, depth);
        let top = registry
            .get_group(&format!("chain-{}", depth - 1))
            .expect("chain group");
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| black_box(registry.resolve_group_members(&top)))
        });
    }
    group.finish();
}

fn bench_generate_aws(c: &mut Criterion) {
    let registry = Arc::new(build_registry(1_000, 4));
    let engine =
        AdapterEngine::with_default_adapters(registry, EngineOptions::default(), &BTreeMap::new())
            .expect("engine");
    let policy = Policy::from_yaml(
        r#"
apiVersion: netsec/v1
kind: NetworkPolicy
metadata:
  name: web-to-db
  requestor: bench
  ticket: BENCH-1
spec:
  source:
    group: chain-3
  destination:
    group: db
  services: [https]
  action: allow
  targets:
    - platform: aws
      scope: ["bench"]
"#,
    )
    .expect("policy document");

    c.bench_function("generate_aws_policy", |b| {
        b.iter(|| black_box(engine.process_policy(&policy)))
    });
}

criterion_group!(
    benches,
    bench_dynamic_resolution,
    bench_nested_resolution,
    bench_generate_aws
);
criterion_main!(benches);
