use agora::config::{default_config_path, AgoraConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod audit;
pub mod init;
pub mod logging;
pub mod migrate;
pub mod status;

#[derive(Parser)]
#[command(name = "agora")]
#[command(author = "Agora Project")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator CLI for the Agora governance engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a commented default configuration file
    Init {
        /// Path to config file (default: ~/.local/share/agora/agora.toml)
        #[arg(long)]
        config: Option<String>,

        /// SQLite database file referenced by the generated config
        #[arg(long)]
        database: Option<String>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Open the configured store and create its schema
    Migrate {
        /// Path to config file
        #[arg(long)]
        config: Option<String>,
    },

    /// Print organizations with member count and treasury balance as JSON
    Status {
        /// Path to config file
        #[arg(long)]
        config: Option<String>,
    },

    /// Check that every treasury balance equals the sum of its ledger
    Audit {
        /// Path to config file
        #[arg(long)]
        config: Option<String>,

        /// Audit a single organization
        #[arg(long)]
        org: Option<i64>,
    },
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Init {
            config,
            database,
            force,
        } => init::execute(config, database, force),
        Commands::Migrate { config } => {
            let config = load_config(config)?;
            logging::init(&config.logging)?;
            migrate::execute(&config).await
        }
        Commands::Status { config } => {
            let config = load_config(config)?;
            logging::init(&config.logging)?;
            status::execute(&config).await
        }
        Commands::Audit { config, org } => {
            let config = load_config(config)?;
            logging::init(&config.logging)?;
            audit::execute(&config, org).await
        }
    }
}

/// Resolve and load the config file
///
/// Uses `--config` if provided, otherwise the default path under the
/// platform data directory.
pub fn load_config(path: Option<String>) -> Result<AgoraConfig, Box<dyn std::error::Error>> {
    let path = path.map(PathBuf::from).unwrap_or_else(default_config_path);

    if !path.exists() {
        return Err(format!(
            "No config file at '{}'. Run `agora init` to create one.",
            path.display()
        )
        .into());
    }

    Ok(AgoraConfig::load(&path)?)
}
