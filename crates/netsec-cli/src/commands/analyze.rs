use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use netsec_config::Config;
use netsec_policy::{RepoLayout, analyze_changes};

use super::{load_registry, or_config};

#[derive(Args)]
pub struct AnalyzeArgs {
    /// Changed files, as separate values or one whitespace-separated list
    #[arg(long, required = true, num_args = 1..)]
    changed_files: Vec<String>,

    /// Registry root (defaults to paths.registry)
    #[arg(short, long)]
    registry: Option<PathBuf>,

    /// Policy directory (defaults to paths.policies)
    #[arg(short, long)]
    policies: Option<PathBuf>,

    /// Write the JSON analysis here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

pub async fn execute(args: AnalyzeArgs, config: &Config) -> Result<()> {
    let registry_path = or_config(args.registry, &config.paths.registry);
    let policies_path = or_config(args.policies, &config.paths.policies);

    let changed_files: Vec<String> = args
        .changed_files
        .iter()
        .flat_map(|arg| arg.split_whitespace())
        .map(str::to_string)
        .collect();

    let layout = RepoLayout {
        policies: policies_path.display().to_string(),
        registry: registry_path.display().to_string(),
    };
    let registry = load_registry(&registry_path)?;
    let analysis = analyze_changes(&changed_files, &registry, &policies_path, &layout)
        .context("Change analysis failed")?;

    match &args.output {
        Some(path) => {
            analysis
                .write_json(path)
                .with_context(|| format!("Failed to write analysis: {}", path.display()))?;
            println!(
                "Direct policy changes: {}",
                analysis.direct_policy_changes.len()
            );
            println!("Registry changes: {}", analysis.registry_changes.len());
            println!("Affected groups: {}", analysis.affected_groups.join(", "));
            println!(
                "Affected services: {}",
                analysis.affected_services.join(", ")
            );
            println!(
                "Policies to regenerate: {}",
                analysis.affected_policies.len()
            );
            println!("Regeneration needed: {}", analysis.regeneration_needed);
        }
        None => println!("{}", serde_json::to_string_pretty(&analysis)?),
    }

    Ok(())
}
