//! ScriptDeck CLI
//!
//! Browse, search, and run the scripts under your configured roots.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "scriptdeck")]
#[command(author, version, long_about = None)]
#[command(about = "ScriptDeck - discover and run local scripts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to ./scriptdeck.yaml or ~/.scriptdeck)
    #[arg(short, long, global = true, env = "SCRIPTDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan roots and print the script tree
    Scan {
        /// Roots to scan (defaults to the configured roots)
        roots: Vec<PathBuf>,
    },

    /// Search scripts by name, type, or tag
    Search {
        query: String,

        /// Roots to search (defaults to the configured roots)
        roots: Vec<PathBuf>,
    },

    /// Run a script and stream its output
    Run {
        path: PathBuf,

        /// Only print the script's own output
        #[arg(short, long)]
        quiet: bool,
    },

    /// Validate a single script and show its metadata
    Check {
        path: PathBuf,

        /// Print the descriptor as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "scriptdeck=debug,scriptdeck_core=debug"
        } else {
            "scriptdeck=info,scriptdeck_core=warn"
        })
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    info!("Starting ScriptDeck CLI");

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Scan { roots } => commands::scan::run(config, roots).await,
        Commands::Search { query, roots } => commands::search::run(config, &query, roots).await,
        Commands::Run { path, quiet } => match commands::run::execute(config, &path, quiet).await {
            Ok(code) if code != 0 => std::process::exit(code),
            other => other.map(|_| ()),
        },
        Commands::Check { path, json } => commands::check::run(config, &path, json),
    };

    if let Err(ref e) = result {
        error!("Command failed: {}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    result
}
