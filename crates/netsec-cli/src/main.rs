use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{analyze, generate, guardrails, validate};

#[derive(Parser)]
#[command(name = "netsec")]
#[command(version)]
#[command(about = "Compile network security policies into Terraform", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a netsec.yaml / netsec.json configuration file
    #[arg(short, long, global = true, env = "NETSEC_CONFIG")]
    config: Option<PathBuf>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, env = "NETSEC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate registry objects and policies
    Validate(validate::ValidateArgs),

    /// Generate Terraform from policies
    Generate(generate::GenerateArgs),

    /// Evaluate policies against guardrail rules
    Guardrails(guardrails::GuardrailsArgs),

    /// Work out which policies a change set requires regenerating
    Analyze(analyze::AnalyzeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    colored::control::set_override(!cli.no_color);

    let config = commands::load_config(cli.config.as_deref())?;

    let level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate(args) => validate::execute(args, &config).await,
        Commands::Generate(args) => generate::execute(args, &config).await,
        Commands::Guardrails(args) => guardrails::execute(args, &config).await,
        Commands::Analyze(args) => analyze::execute(args, &config).await,
    }
}
