use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use netsec_config::Config;
use netsec_policy::{Decision, GuardrailEngine, GuardrailReport, GuardrailRules, Policy};

use super::{collect_policy_files, load_registry, or_config};

#[derive(Args)]
pub struct GuardrailsArgs {
    /// Policy directory, file, or JSON list of files (defaults to paths.policies)
    #[arg(short, long)]
    policies: Option<String>,

    /// Guardrail rules file (defaults to paths.guardrails)
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Registry root (defaults to paths.registry)
    #[arg(short, long)]
    registry: Option<PathBuf>,

    /// Write the JSON report here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Exit nonzero when any policy is denied
    #[arg(long)]
    fail_on_deny: bool,
}

pub async fn execute(args: GuardrailsArgs, config: &Config) -> Result<()> {
    let registry_path = or_config(args.registry, &config.paths.registry);
    let rules_path = or_config(args.rules, &config.paths.guardrails);
    let policies = args
        .policies
        .unwrap_or_else(|| config.paths.policies.display().to_string());

    let rules = GuardrailRules::from_yaml_file(&rules_path)
        .with_context(|| format!("Failed to load rules: {}", rules_path.display()))?;
    let registry = Arc::new(load_registry(&registry_path)?);
    let engine = GuardrailEngine::new(registry, rules);

    let mut report = GuardrailReport::new();
    for file in collect_policy_files(&policies)? {
        let policy = Policy::from_yaml_file(&file)
            .with_context(|| format!("Failed to load policy: {}", file.display()))?;
        let evaluation = engine.evaluate(&policy);
        report.record(&policy, &file.display().to_string(), evaluation);
    }

    match &args.output {
        Some(path) => {
            report
                .write_json(path)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            let decision = report.decision();
            let label = match decision {
                Decision::AutoApprove => decision.as_str().green(),
                Decision::RequireReview => decision.as_str().yellow(),
                Decision::Deny => decision.as_str().red(),
            };
            println!(
                "Evaluated {} policies against {} rule(s): {}",
                report.policies.len(),
                engine.rules().len(),
                label.bold()
            );
            for flagged in &report.flagged_policies {
                println!("  {} {}: {}", "review".yellow(), flagged.name, flagged.reason);
            }
            for denied in &report.denied_policies {
                println!("  {} {}: {}", "deny".red(), denied.name, denied.reason);
            }
            println!("Guardrail evaluation complete: {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if args.fail_on_deny && report.denied {
        bail!("{} policy(ies) denied by guardrails", report.denied_policies.len());
    }

    Ok(())
}
