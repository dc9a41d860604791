//! Cadence CLI — the main entry point.
//!
//! Commands:
//! - `config`  — Show, initialize or validate configuration
//! - `memory`  — Administer the SQLite memory database
//! - `tools`   — List the local tool catalog with default risk classes

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::memory::MemoryArgs;

#[derive(Parser)]
#[command(
    name = "cadence",
    about = "Cadence — agent workflow orchestrator",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.cadence/config.toml
    #[arg(short, long, global = true, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Inspect and edit stored memories
    Memory(MemoryArgs),

    /// List the local tools and their default risk classes
    Tools,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.unwrap_or_else(commands::config_cmd::default_path);

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(&config_path).await?,
            ConfigAction::Init { force } => commands::config_cmd::init(&config_path, force).await?,
            ConfigAction::Validate => commands::config_cmd::validate(&config_path).await?,
            ConfigAction::Path => println!("{}", config_path.display()),
        },
        Commands::Memory(args) => commands::memory::run(&config_path, args).await?,
        Commands::Tools => commands::tools::run(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use commands::memory::MemoryAction;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_memory_search_with_scope() {
        let cli = Cli::parse_from([
            "cadence", "memory", "--workflow", "wf-1", "--scope", "general", "search", "units",
            "--limit", "3",
        ]);
        let Commands::Memory(args) = cli.command else {
            panic!("expected memory command");
        };
        assert_eq!(args.workflow.as_deref(), Some("wf-1"));
        match args.action {
            MemoryAction::Search { query, limit, .. } => {
                assert_eq!(query, "units");
                assert_eq!(limit, Some(3));
            }
            _ => panic!("expected search"),
        }
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::parse_from(["cadence", "tools", "-v"]);
        assert!(cli.verbose);
    }
}
