use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use netsec_config::Config;
use netsec_policy::Policy;

use super::{collect_policy_files, or_config};

#[derive(Args)]
pub struct ValidateArgs {
    /// Registry root (defaults to paths.registry)
    #[arg(short, long)]
    registry: Option<PathBuf>,

    /// Policy directory, file, or JSON list of files (defaults to paths.policies)
    #[arg(short, long)]
    policies: Option<String>,

    /// Only check document structure, skip registry references
    #[arg(long)]
    schema_only: bool,

    /// Show every checked file
    #[arg(short, long)]
    verbose: bool,
}

pub async fn execute(args: ValidateArgs, config: &Config) -> Result<()> {
    let registry_path = or_config(args.registry, &config.paths.registry);
    let policies = args
        .policies
        .unwrap_or_else(|| config.paths.policies.display().to_string());

    let mut all_errors: BTreeMap<String, Vec<String>> = BTreeMap::new();

    println!("{}", "Validating registry...".blue().bold());
    let registry = match netsec_policy::Registry::load(&registry_path) {
        Ok(registry) => {
            println!(
                "  {} {} hosts, {} groups, {} services",
                "✓".green(),
                registry.hosts().count(),
                registry.groups().count(),
                registry.services().count()
            );
            if !args.schema_only {
                for (group, errors) in registry.validate_references() {
                    all_errors.insert(format!("group {group}"), errors);
                }
            }
            Some(registry)
        }
        Err(e) => {
            all_errors
                .entry(registry_path.display().to_string())
                .or_default()
                .push(e.to_string());
            None
        }
    };

    println!("{}", "Validating policies...".blue().bold());
    let files = collect_policy_files(&policies)?;
    for file in &files {
        let key = file.display().to_string();
        let policy = match Policy::from_yaml_file(file) {
            Ok(policy) => policy,
            Err(e) => {
                all_errors.entry(key).or_default().push(e.to_string());
                continue;
            }
        };

        let mut errors = policy.validate();
        if !args.schema_only
            && let Some(registry) = &registry
        {
            errors.extend(registry.validate_policy_references(&policy));
        }

        if errors.is_empty() {
            if args.verbose {
                println!("  {} {}", "✓".green(), key);
            }
        } else {
            all_errors.entry(key).or_default().extend(errors);
        }
    }
    println!("  Checked {} policy file(s)", files.len());

    if !all_errors.is_empty() {
        let count: usize = all_errors.values().map(Vec::len).sum();
        println!("\n{}", "Validation errors found:".red().bold());
        for (path, errors) in &all_errors {
            println!("\n{}:", path);
            for error in errors {
                println!("  - {}", error);
            }
        }
        bail!("Validation failed with {} error(s)", count);
    }

    println!("\n{}", "All validations passed!".green().bold());
    Ok(())
}
