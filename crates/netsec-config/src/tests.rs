#[cfg(test)]
mod tests {
    use std::{collections::HashMap, fs, path::PathBuf};

    use netsec_policy::Platform;
    use tempfile::TempDir;

    use crate::*;

    fn loader_with_env(vars: &[(&str, &str)]) -> ConfigLoader {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut loader = ConfigLoader::without_search_paths();
        loader.set_env(move |key| vars.get(key).cloned());
        loader
    }

    #[test]
    fn test_minimal_config() {
        let config = Config::from_yaml("version: \"1.0\"\n").unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.registry, PathBuf::from("registry"));
        assert_eq!(config.paths.policies, PathBuf::from("policies"));
        assert_eq!(config.generation.workspace_prefix, "netsec");
        assert_eq!(config.generation.file_extension, "tf");
        assert!(config.generation.concurrent);
        assert!(config.adapters.is_empty());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
version: "1.2"
metadata:
  name: corp-network
  owner: netops
paths:
  registry: objects
  policies: rules
  output: out
generation:
  workspace_prefix: corp-net
  platforms: [aws, paloalto]
  concurrent: false
log_level: debug
adapters:
  aws:
    vpc_id: vpc-0abc
  paloalto:
    device_group: branch
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.paths.registry, PathBuf::from("objects"));
        assert_eq!(config.paths.output, PathBuf::from("out"));
        assert_eq!(
            config.paths.guardrails,
            PathBuf::from("guardrails/rules.yaml")
        );
        assert_eq!(config.generation.workspace_prefix, "corp-net");
        assert_eq!(config.generation.file_extension, "tf");
        assert_eq!(
            config.generation.platforms,
            Some(vec![Platform::Aws, Platform::Paloalto])
        );
        assert!(!config.generation.concurrent);
        assert_eq!(
            config.metadata.as_ref().and_then(|m| m.owner.as_deref()),
            Some("netops")
        );

        let adapters = config.adapter_configs().unwrap();
        assert_eq!(adapters.len(), 2);
        assert!(adapters.contains_key(&Platform::Aws));
        assert!(adapters.contains_key(&Platform::Paloalto));

        let options = config.engine_options();
        assert_eq!(options.workspace_prefix, "corp-net");
        assert_eq!(options.file_extension, "tf");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.version, "1.0");
        assert!(config.log_level.is_none());
        assert!(config.generation.platforms.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.log_level = Some("info".to_string());

        let other = Config::from_yaml(
            r#"
version: "1.1"
generation:
  workspace_prefix: merged
adapters:
  gcp:
    project: shared
"#,
        )
        .unwrap();
        base.merge(other).unwrap();

        assert_eq!(base.version, "1.1");
        assert_eq!(base.generation.workspace_prefix, "merged");
        assert_eq!(base.log_level.as_deref(), Some("info"));
        assert!(base.adapters.contains_key("gcp"));
    }

    #[test]
    fn test_version_mismatch() {
        let mut config1 = Config::default();
        let mut config2 = Config::default();
        config2.version = "2.0".to_string();

        let result = config1.merge(config2);
        if let Err(ConfigError::VersionMismatch { expected, found }) = result {
            assert_eq!(expected, "1.0");
            assert_eq!(found, "2.0");
        } else {
            panic!("Expected version mismatch error");
        }
    }

    #[test]
    fn test_validation_unsupported_version() {
        assert!(Config::from_yaml("version: \"2.0\"\n").is_err());
    }

    #[test]
    fn test_validation_bad_workspace_prefix() {
        let yaml = r#"
version: "1.0"
generation:
  workspace_prefix: "Net Sec"
"#;
        match Config::from_yaml(yaml) {
            Err(ConfigError::InvalidValue { field, value }) => {
                assert_eq!(field, "generation.workspace_prefix");
                assert_eq!(value, "Net Sec");
            }
            other => panic!("Expected invalid value, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_bad_file_extension() {
        let yaml = r#"
version: "1.0"
generation:
  file_extension: ".tf"
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validation_empty_platform_list() {
        let yaml = r#"
version: "1.0"
generation:
  platforms: []
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validation_unknown_platform() {
        let yaml = r#"
version: "1.0"
generation:
  platforms: [aws, openstack]
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let yaml = r#"
version: "1.0"
log_level: verbose
"#;
        assert!(Config::from_yaml(yaml).is_err());
        assert!(validation::validate_log_level("warn").is_ok());
    }

    #[test]
    fn test_validation_adapters() {
        let unknown = r#"
version: "1.0"
adapters:
  openstack:
    region: east
"#;
        assert!(matches!(
            Config::from_yaml(unknown),
            Err(ConfigError::PolicyError(_))
        ));

        let scalar = r#"
version: "1.0"
adapters:
  aws: vpc-0abc
"#;
        assert!(matches!(
            Config::from_yaml(scalar),
            Err(ConfigError::ValidationError(_))
        ));

        let empty = r#"
version: "1.0"
adapters:
  illumio:
"#;
        let config = Config::from_yaml(empty).unwrap();
        assert!(config.adapter_configs().unwrap().contains_key(&Platform::Illumio));
    }

    #[test]
    fn test_loader_from_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("netsec.yaml"),
            "version: \"1.0\"\npaths:\n  registry: shared/registry\n",
        )
        .unwrap();

        let mut loader = loader_with_env(&[]);
        loader.add_search_path(temp_dir.path());

        let config = loader.load().unwrap();
        assert_eq!(config.paths.registry, PathBuf::from("shared/registry"));
    }

    #[test]
    fn test_loader_hidden_json_file() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(".netsec.json"),
            r#"{"version": "1.0", "generation": {"workspace_prefix": "hidden"}}"#,
        )
        .unwrap();

        let mut loader = loader_with_env(&[]);
        loader.add_search_path(temp_dir.path());

        let config = loader.load().unwrap();
        assert_eq!(config.generation.workspace_prefix, "hidden");
    }

    #[test]
    fn test_loader_search_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(
            first.path().join("netsec.yml"),
            "version: \"1.0\"\nlog_level: warn\n",
        )
        .unwrap();
        fs::write(
            second.path().join("netsec.yaml"),
            "version: \"1.0\"\nlog_level: trace\n",
        )
        .unwrap();

        let mut loader = loader_with_env(&[]);
        loader
            .add_search_path(first.path())
            .add_search_path(second.path());

        assert_eq!(loader.search_paths().len(), 2);
        assert_eq!(loader.load().unwrap().log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn test_loader_without_file_uses_defaults() {
        let loader = loader_with_env(&[]);
        assert_eq!(loader.load().unwrap(), Config::default());
    }

    #[test]
    fn test_env_overrides() {
        let loader = loader_with_env(&[
            ("NETSEC_REGISTRY", "/srv/registry"),
            ("NETSEC_POLICIES", "/srv/policies"),
            ("NETSEC_OUTPUT", "/srv/out"),
            ("NETSEC_WORKSPACE_PREFIX", "edge"),
            ("NETSEC_LOG_LEVEL", "DEBUG"),
        ]);

        let config = loader.load().unwrap();
        assert_eq!(config.paths.registry, PathBuf::from("/srv/registry"));
        assert_eq!(config.paths.policies, PathBuf::from("/srv/policies"));
        assert_eq!(config.paths.output, PathBuf::from("/srv/out"));
        assert_eq!(config.generation.workspace_prefix, "edge");
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_env_override_is_validated() {
        let loader = loader_with_env(&[("NETSEC_WORKSPACE_PREFIX", "Bad_Prefix")]);
        assert!(loader.load().is_err());
    }

    #[test]
    fn test_custom_env_prefix() {
        let mut loader = loader_with_env(&[("CORP_OUTPUT", "build")]);
        loader.set_env_prefix("CORP");
        assert_eq!(loader.load().unwrap().paths.output, PathBuf::from("build"));
    }

    #[test]
    fn test_load_path_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("custom.yaml");
        fs::write(&path, "version: \"1.0\"\npaths:\n  output: from-file\n").unwrap();

        let loader = loader_with_env(&[("NETSEC_OUTPUT", "from-env")]);
        let config = loader.load_path(&path).unwrap();
        assert_eq!(config.paths.output, PathBuf::from("from-env"));
    }

    #[test]
    fn test_load_missing_file() {
        let loader = loader_with_env(&[]);
        let result = loader.load_from_specific_file("/nonexistent/netsec.yaml");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_unsupported_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("netsec.toml");
        fs::write(&path, "version = \"1.0\"").unwrap();

        let loader = loader_with_env(&[]);
        assert!(matches!(
            loader.load_from_specific_file(&path),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.generation.platforms = Some(vec![Platform::Fortinet]);
        config.log_level = Some("error".to_string());

        let yaml_path = temp_dir.path().join("netsec.yaml");
        config.to_yaml_file(&yaml_path).unwrap();
        assert_eq!(Config::from_yaml_file(&yaml_path).unwrap(), config);

        let json_path = temp_dir.path().join("netsec.json");
        config.to_json_file(&json_path).unwrap();
        assert_eq!(Config::from_json_file(&json_path).unwrap(), config);
    }
}
