//! Loom CLI - drive generation jobs from the terminal

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{generate, history, providers};
use loom_gen::logging::init_logging;
use loom_gen::LoomConfig;

#[derive(Parser)]
#[command(name = "loom")]
#[command(about = "AI generation jobs for node graphs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List providers, their status and capabilities
    Providers {
        /// Also print each capability's parameter schema
        #[arg(long)]
        schemas: bool,

        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Run one generation job for a node and wait for it
    Generate(generate::GenerateArgs),

    /// Inspect or edit a node's result history
    #[command(subcommand)]
    History(history::HistoryCommands),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LoomConfig::load()?;
    init_logging(Some(&config.logging))?;

    match cli.command {
        Commands::Providers { schemas, format } => providers::run(&config, schemas, &format),
        Commands::Generate(args) => generate::run(&config, args),
        Commands::History(cmd) => history::run(cmd),
    }
}
