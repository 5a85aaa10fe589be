//! Tributary command-line tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tributary_logging::{init_logging, LogConfig};

mod cli;

use cli::context::CliContext;

#[derive(Parser, Debug)]
#[command(
    name = "tributary",
    version,
    about = "Incremental scraper for remote document trees"
)]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Config file (defaults to $TRIBUTARY_HOME/config.toml)
    #[arg(long, global = true, env = "TRIBUTARY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage scrape configs and settings
    Config {
        #[command(subcommand)]
        command: cli::config::ConfigCommand,
    },

    /// Run a user's scrape configs
    Scrape(cli::scrape::ScrapeArgs),

    /// Show run history for a config
    Runs(cli::runs::RunsArgs),

    /// Inspect provenance records
    Provenance {
        #[command(subcommand)]
        command: cli::provenance::ProvenanceCommand,
    },

    /// List documents that reference a target
    Backlinks(cli::backlinks::BacklinksArgs),

    /// Insert, refresh or strip a signature block
    Sign(cli::sign::SignArgs),

    /// Watch a document directory and keep backlinks current
    Watch(cli::watch::WatchArgs),
}

fn run_command(cli: Cli) -> anyhow::Result<()> {
    let ctx = CliContext::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config { command } => cli::config::run(command, &ctx),
        Commands::Scrape(args) => cli::scrape::run(args, &ctx),
        Commands::Runs(args) => cli::runs::run(args, &ctx),
        Commands::Provenance { command } => cli::provenance::run(command, &ctx),
        Commands::Backlinks(args) => cli::backlinks::run(args, &ctx),
        Commands::Sign(args) => cli::sign::run(args, &ctx),
        Commands::Watch(args) => cli::watch::run(args, &ctx),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "tributary",
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: failed to initialize logging: {}", err);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<cli::error::HelpfulError>() {
                Some(helpful) => eprint!("{}", helpful),
                None => eprintln!("ERROR: {:?}", err),
            }
            ExitCode::from(1)
        }
    }
}
