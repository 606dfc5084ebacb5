use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use netsec_config::Config;
use netsec_policy::{AdapterEngine, BatchOutput, Platform};

use super::{collect_policy_files, load_registry, or_config};

#[derive(Args)]
pub struct GenerateArgs {
    /// Registry root (defaults to paths.registry)
    #[arg(short, long)]
    registry: Option<PathBuf>,

    /// Policy directory, file, or JSON list of files (defaults to paths.policies)
    #[arg(short, long)]
    policies: Option<String>,

    /// Limit generation to these platforms
    #[arg(short = 't', long = "platform", value_delimiter = ',')]
    platforms: Vec<Platform>,

    /// Output root for generated Terraform (defaults to paths.output)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print generated Terraform instead of writing files
    #[arg(long)]
    dry_run: bool,

    /// Write the touched deployment units to this JSON file
    #[arg(long)]
    workspace_manifest: Option<PathBuf>,

    /// Process policies one at a time
    #[arg(long)]
    sequential: bool,
}

pub async fn execute(args: GenerateArgs, config: &Config) -> Result<()> {
    let registry_path = or_config(args.registry, &config.paths.registry);
    let output = or_config(args.output, &config.paths.output);
    let policies = args
        .policies
        .unwrap_or_else(|| config.paths.policies.display().to_string());

    let filter = if args.platforms.is_empty() {
        config.generation.platforms.clone()
    } else {
        Some(args.platforms)
    };

    let files = collect_policy_files(&policies)?;
    if files.is_empty() {
        println!("{}", "No policy files found".yellow());
        return Ok(());
    }

    let registry = Arc::new(load_registry(&registry_path)?);
    let adapter_configs = config.adapter_configs()?;
    let engine = Arc::new(
        AdapterEngine::with_default_adapters(registry, config.engine_options(), &adapter_configs)
            .context("Failed to initialize platform adapters")?,
    );

    println!(
        "{}",
        format!("Processing {} policy file(s)...", files.len())
            .blue()
            .bold()
    );

    let progress = ProgressBar::new_spinner();
    progress.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress.set_message("Generating Terraform...");

    let batch = if config.generation.concurrent && !args.sequential {
        engine.process_policies_concurrent(files, filter).await
    } else {
        engine.process_policies(&files, filter.as_deref())
    };

    progress.finish_with_message(format!(
        "✓ Generated {} policy output(s)",
        batch.results.len()
    ));

    if args.dry_run {
        print_dry_run(&batch, &config.generation.file_extension);
    } else {
        let manifest = engine
            .write_terraform(&batch.results, &output)
            .with_context(|| format!("Failed to write Terraform to {}", output.display()))?;

        println!(
            "\n{}",
            format!("Generated Terraform to {}", output.display()).green()
        );
        for (platform, units) in &manifest.platforms {
            println!("  {}: {} workspace(s)", platform, units.len());
        }

        if let Some(path) = &args.workspace_manifest {
            manifest
                .write_json(path)
                .with_context(|| format!("Failed to write manifest: {}", path.display()))?;
            println!("Wrote workspace manifest to {}", path.display());
        }
    }

    if !batch.is_success() {
        println!("\n{}", "Generation failures:".red().bold());
        for failure in &batch.failures {
            match failure.platform {
                Some(platform) => {
                    println!("  - {} [{}]: {}", failure.policy, platform, failure.error)
                }
                None => println!("  - {}: {}", failure.policy, failure.error),
            }
        }
        bail!("{} generation failure(s)", batch.failures.len());
    }

    Ok(())
}

fn print_dry_run(batch: &BatchOutput, extension: &str) {
    println!("\n{}", "Dry run - would generate:".cyan().bold());
    for (policy, platforms) in &batch.results {
        for (platform, scopes) in platforms {
            for (scope, text) in scopes {
                println!("\n--- {}/{}/{}.{} ---", platform, scope, policy, extension);
                println!("{}", text);
            }
        }
    }
}
