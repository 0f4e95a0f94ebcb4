mod batch;
mod logging;
mod settings;

use std::path::PathBuf;

use anyhow::{Context, Result};
use atelier_contracts::configs::ConfigResolver;
use atelier_engine::{ArtistKind, BrainKind};
use clap::{Parser, Subcommand};

use crate::batch::{exit_code, resolver_for, run_batch, RunOptions};
use crate::logging::init_logging;
use crate::settings::{PipelineKind, Settings};

#[derive(Debug, Parser)]
#[command(name = "atelier", version, about = "Batch stock-image generation pipeline")]
struct Cli {
    /// Settings file (defaults to ./atelier.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log debug output to the console.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the brain → artist → ledger batch.
    Run(RunArgs),
    /// Expand a wildcard template and print the result.
    Resolve(ResolveArgs),
    /// Print the merged paint configuration for a niche.
    Config(ConfigArgs),
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// Only run these niches (repeatable).
    #[arg(long = "niche")]
    niches: Vec<String>,
    /// Jobs per niche (overrides `images_per_niche`).
    #[arg(long)]
    count: Option<u32>,
    #[arg(long)]
    brain: Option<BrainKind>,
    #[arg(long)]
    artist: Option<ArtistKind>,
    #[arg(long)]
    pipeline: Option<PipelineKind>,
    /// Draw wildcard values in file order instead of at random.
    #[arg(long)]
    ordered: bool,
}

#[derive(Debug, Parser)]
struct ResolveArgs {
    template: String,
    #[arg(long)]
    niche: Option<String>,
    #[arg(long)]
    ordered: bool,
    #[arg(long, default_value_t = 1)]
    times: u32,
}

#[derive(Debug, Parser)]
struct ConfigArgs {
    niche: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("atelier error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    let _log_guard = init_logging(&settings.log_path, cli.verbose)?;

    match cli.command {
        Command::Run(args) => {
            if let Some(brain) = args.brain {
                settings.active_brain = brain;
            }
            if let Some(artist) = args.artist {
                settings.active_artist = artist;
            }
            if let Some(pipeline) = args.pipeline {
                settings.active_pipeline = pipeline;
            }
            let options = RunOptions {
                niches: args.niches,
                count: args.count,
                ordered: args.ordered,
            };
            let summary = run_batch(&settings, &options)?;
            println!(
                "{} of {} jobs succeeded ({} failed)",
                summary.succeeded(),
                summary.total(),
                summary.failed()
            );
            Ok(exit_code(&summary))
        }
        Command::Resolve(args) => {
            let mut resolver = resolver_for(&settings.wildcards_path, args.niche.as_deref())?;
            for _ in 0..args.times.max(1) {
                let resolution = resolver.resolve(&args.template, args.ordered);
                println!("{}", resolution.text);
                for warning in &resolution.warnings {
                    eprintln!("warning: {warning}");
                }
            }
            Ok(0)
        }
        Command::Config(args) => {
            let config = ConfigResolver::new(&settings.niche_configs_path)
                .resolve(&args.niche, &settings.paint)?;
            let text = serde_json::to_string_pretty(&config)
                .context("failed to serialize paint configuration")?;
            println!("{text}");
            Ok(0)
        }
    }
}
