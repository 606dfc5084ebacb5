//! On-disk policy repository fixtures shared by the integration tests

#![allow(dead_code)]

use std::{fs, path::Path};

use tempfile::TempDir;

pub const WEB_01: &str = r#"
apiVersion: netsec/v1
kind: Host
metadata:
  name: web-01
  owner: web-team
spec:
  environment: production
  addresses:
    ipv4: ["10.0.1.10"]
    fqdn: ["web-01.example.com"]
  labels:
    tier: web
    environment: production
"#;

pub const WEB_02: &str = r#"
apiVersion: netsec/v1
kind: Host
metadata:
  name: web-02
spec:
  addresses:
    ipv4: ["10.0.1.11"]
  labels:
    tier: web
"#;

pub const DB_01: &str = r#"
apiVersion: netsec/v1
kind: Host
metadata:
  name: db-01
spec:
  addresses:
    ipv4: ["10.0.2.10"]
  labels:
    tier: db
"#;

pub const WEB_SERVERS: &str = r#"
apiVersion: netsec/v1
kind: Group
metadata:
  name: web-servers
  labels:
    environment: production
spec:
  membership:
    dynamic:
      match-labels:
        tier: web
    networks: ["10.0.1.0/24"]
  platform-mapping:
    aws:
      strategy: security-group-preferred
    gcp:
      strategy: network-tag-preferred
      network-tag:
        tag: web
    azure:
      strategy: asg-preferred
    paloalto:
      strategy: dag-only
    fortinet:
      strategy: address-group
    illumio:
      strategy: label-based
      labels:
        - key: app
          value: web
"#;

pub const DB_SERVERS: &str = r#"
apiVersion: netsec/v1
kind: Group
metadata:
  name: db-servers
  labels:
    environment: production
spec:
  membership:
    static: ["db-01"]
  platform-mapping:
    aws: {}
    gcp: {}
    azure: {}
    paloalto: {}
    fortinet: {}
    illumio:
      strategy: ip-list
"#;

pub const APP_TIER: &str = r#"
apiVersion: netsec/v1
kind: Group
metadata:
  name: app-tier
spec:
  membership:
    groups: ["web-servers", "db-servers"]
  platform-mapping:
    aws: {}
"#;

pub const HTTPS: &str = r#"
apiVersion: netsec/v1
kind: Service
metadata:
  name: https
spec:
  protocols:
    - protocol: tcp
      port: 443
"#;

pub const POSTGRES: &str = r#"
apiVersion: netsec/v1
kind: Service
metadata:
  name: postgres
spec:
  protocols:
    - protocol: tcp
      port: 5432
"#;

pub fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// A repository with `registry/` populated and an empty `policies/`
pub fn repository() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "registry/hosts/web-01.yaml", WEB_01);
    write(root, "registry/hosts/web-02.yaml", WEB_02);
    write(root, "registry/hosts/db-01.yaml", DB_01);
    write(root, "registry/groups/web-servers.yaml", WEB_SERVERS);
    write(root, "registry/groups/db-servers.yaml", DB_SERVERS);
    write(root, "registry/groups/app-tier.yaml", APP_TIER);
    write(root, "registry/services/https.yaml", HTTPS);
    write(root, "registry/services/postgres.yaml", POSTGRES);
    fs::create_dir_all(root.join("policies")).unwrap();
    dir
}

/// A policy document from `web-servers` to `db-servers` on postgres
pub fn policy(name: &str, targets: &str) -> String {
    format!(
        r#"apiVersion: netsec/v1
kind: NetworkPolicy
metadata:
  name: {name}
  requestor: alice@example.com
  ticket: CHG-2001
spec:
  description: Web tier reaches the database
  source:
    group: web-servers
  destination:
    group: db-servers
  services:
    - postgres
  action: allow
  targets:
{targets}
"#
    )
}
