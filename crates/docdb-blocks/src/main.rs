//! docdb-blocks - Inspect and validate document database blocks
//!
//! # Usage
//!
//! ```bash
//! # Validate a blocks file
//! docdb-blocks validate -c blocks.yaml
//!
//! # Show the config schema of a block type
//! docdb-blocks schema docdb-update --format yaml
//!
//! # List available block types
//! docdb-blocks blocks
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use docdb_blocks::{BlockRegistry, BlocksConfig};

#[derive(Parser)]
#[command(name = "docdb-blocks")]
#[command(version, about = "Delete and update blocks for document database pipelines")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a blocks file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "blocks.yaml")]
        config: PathBuf,
    },
    /// Show the config schema for a block type
    Schema {
        /// Block type (e.g., docdb-delete, docdb-update)
        block: String,
        /// Output format (json, yaml)
        #[arg(long, default_value = "json")]
        format: String,
    },
    /// List available block types
    Blocks,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let registry = BlockRegistry::with_builtin();

    match cli.command {
        Commands::Validate { config } => {
            let blocks = BlocksConfig::from_file(&config)
                .with_context(|| format!("Failed to load config from {}", config.display()))?;
            init_logging(cli.verbose, &blocks.settings.log_level);
            validate_config(&registry, &blocks)
        }
        Commands::Schema { block, format } => {
            init_logging(cli.verbose, "info");
            show_schema(&registry, &block, &format)
        }
        Commands::Blocks => {
            init_logging(cli.verbose, "info");
            list_blocks(&registry);
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, default_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

fn validate_config(registry: &BlockRegistry, config: &BlocksConfig) -> Result<()> {
    config.validate(registry)?;

    info!(
        version = %config.version,
        blocks = config.blocks.len(),
        enabled = config.enabled_blocks().count(),
        "Configuration is valid"
    );
    for (name, entry) in &config.blocks {
        let state = if entry.enabled { "enabled" } else { "disabled" };
        println!("  {} ({}) - {}", name, entry.block, state);
    }
    Ok(())
}

fn show_schema(registry: &BlockRegistry, block: &str, format: &str) -> Result<()> {
    let Some(factory) = registry.get(block) else {
        anyhow::bail!(
            "Unknown block type: '{}'\nUse 'docdb-blocks blocks' to list available types",
            block
        );
    };
    let schema = factory.spec().config_schema;

    match format {
        "yaml" => println!("{}", serde_yaml::to_string(&schema)?),
        _ => println!("{}", serde_json::to_string_pretty(&schema)?),
    }
    Ok(())
}

fn list_blocks(registry: &BlockRegistry) {
    println!("Available blocks:\n");
    for spec in registry.list() {
        println!("  {:<16} {} (v{})", spec.block_type, spec.description, spec.version);
    }
}
