//! Registry loading and group resolution against on-disk documents

mod common;

use netsec_policy::{PolicyError, Registry};

use common::{repository, write};

/// Test loading every category from a directory tree
#[test]
fn test_load_registry_from_directory() {
    let repo = repository();
    let registry = Registry::load(repo.path().join("registry")).unwrap();

    assert_eq!(registry.hosts().count(), 3);
    assert_eq!(registry.groups().count(), 3);
    assert_eq!(registry.services().count(), 2);
    assert!(registry.contains_group("web-servers"));
    assert!(registry.get_host("host/web-01").is_ok());
    assert!(registry.validate_references().is_empty());
}

/// Test that a missing registry root is an error
#[test]
fn test_missing_registry_root() {
    let repo = repository();
    let err = Registry::load(repo.path().join("nowhere")).unwrap_err();
    assert!(matches!(err, PolicyError::RegistryError { .. }));
}

/// Test that a missing category directory is an empty category
#[test]
fn test_missing_category_is_empty() {
    let repo = repository();
    std::fs::remove_dir_all(repo.path().join("registry/services")).unwrap();
    let registry = Registry::load(repo.path().join("registry")).unwrap();
    assert_eq!(registry.services().count(), 0);
}

/// Test that a malformed document fails the load and names the file
#[test]
fn test_malformed_document_names_file() {
    let repo = repository();
    write(
        repo.path(),
        "registry/hosts/broken.yaml",
        "apiVersion: netsec/v1\nkind: Host\nmetadata: [",
    );
    let err = Registry::load(repo.path().join("registry")).unwrap_err();
    assert!(err.to_string().contains("broken.yaml"), "{err}");
}

/// Test that two documents declaring the same name fail the load
#[test]
fn test_duplicate_document_names() {
    let repo = repository();
    write(repo.path(), "registry/hosts/nested/copy.yaml", common::WEB_01);
    let err = Registry::load(repo.path().join("registry")).unwrap_err();
    assert!(err.to_string().contains("web-01"), "{err}");
}

/// Test dynamic membership plus literal networks
#[test]
fn test_dynamic_group_resolution() {
    let repo = repository();
    let registry = Registry::load(repo.path().join("registry")).unwrap();

    let group = registry.get_group("web-servers").unwrap();
    let members = registry.resolve_group_members(&group).unwrap();
    let hosts: Vec<_> = members.hosts.iter().map(|h| h.name()).collect();
    assert_eq!(hosts, vec!["web-01", "web-02"]);
    assert_eq!(members.networks, vec!["10.0.1.0/24"]);
    assert_eq!(members.all_fqdn(), vec!["web-01.example.com"]);
}

/// Test nested groups flatten into one member set
#[test]
fn test_nested_group_resolution() {
    let repo = repository();
    let registry = Registry::load(repo.path().join("registry")).unwrap();

    let group = registry.get_group("app-tier").unwrap();
    let members = registry.resolve_group_members(&group).unwrap();
    let hosts: Vec<_> = members.hosts.iter().map(|h| h.name()).collect();
    assert_eq!(hosts, vec!["web-01", "web-02", "db-01"]);
    assert_eq!(
        members.all_ipv4(),
        vec!["10.0.1.10", "10.0.1.11", "10.0.2.10", "10.0.1.0/24"]
    );
}

/// Test that a nesting cycle is reported by group validation
#[test]
fn test_cycle_reported_by_validation() {
    let repo = repository();
    write(
        repo.path(),
        "registry/groups/loop-a.yaml",
        r#"
apiVersion: netsec/v1
kind: Group
metadata:
  name: loop-a
spec:
  membership:
    groups: ["loop-b"]
"#,
    );
    write(
        repo.path(),
        "registry/groups/loop-b.yaml",
        r#"
apiVersion: netsec/v1
kind: Group
metadata:
  name: loop-b
spec:
  membership:
    groups: ["loop-a"]
"#,
    );
    let registry = Registry::load(repo.path().join("registry")).unwrap();

    let errors = registry.validate_references();
    assert_eq!(errors.len(), 2);
    assert!(errors["loop-a"][0].contains("loop-a -> loop-b -> loop-a"));

    let group = registry.get_group("loop-b").unwrap();
    assert!(matches!(
        registry.resolve_group_members(&group),
        Err(PolicyError::CyclicMembership { .. })
    ));
}

/// Test that dangling references are listed per group
#[test]
fn test_dangling_group_references() {
    let repo = repository();
    write(
        repo.path(),
        "registry/groups/stale.yaml",
        r#"
apiVersion: netsec/v1
kind: Group
metadata:
  name: stale
spec:
  membership:
    static: ["decommissioned-01"]
    groups: ["retired"]
"#,
    );
    let registry = Registry::load(repo.path().join("registry")).unwrap();

    let errors = registry.validate_references();
    assert_eq!(
        errors["stale"],
        vec![
            "Group stale references unknown host: decommissioned-01".to_string(),
            "Group stale references unknown group: retired".to_string(),
        ]
    );
}
