//! Data Saver CLI
//!
//! Tools for inspecting the extension configuration and replaying lifecycle
//! events against in-memory engines.

mod simulate;

use std::fs;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ds_core::SaverConfig;

use crate::simulate::{SimEvent, SimOptions};

#[derive(Parser)]
#[command(name = "ds-cli")]
#[command(about = "Data Saver extension tools")]
struct Cli {
    /// Configuration file (JSON); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay lifecycle events and print the converged state
    Simulate {
        /// Initial stored settings as JSON, e.g. '{"ads": false}'
        #[arg(short, long, default_value = "{}")]
        settings: String,

        /// Events to deliver, in order
        #[arg(short, long, value_enum, required = true)]
        event: Vec<SimEvent>,

        /// Start with a registration left over from a previous session
        #[arg(long)]
        stale: bool,
    },

    /// Print the script registration definition
    Definition,

    /// Print the effective configuration
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Simulate {
            settings,
            event,
            stale,
        } => simulate::run(
            config,
            SimOptions {
                settings,
                events: event,
                stale,
            },
        ),
        Commands::Definition => print_json(&config.script_definition()),
        Commands::Config => print_json(&config),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&str>) -> Result<SaverConfig, String> {
    let Some(path) = path else {
        return Ok(SaverConfig::default());
    };
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    SaverConfig::from_json(&content).map_err(|e| format!("Invalid config '{}': {}", path, e))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}
