//! Validates a deposit services configuration and prints the effective values.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use custodia_config::{
    ConfigSource, load_from_env, load_from_file,
    loader::to_toml,
    telemetry::init_tracing,
};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "custodia-check",
    about = "Validate the deposit services configuration and print the effective settings"
)]
struct Cli {
    /// Configuration file to check instead of the environment lookup
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "toml")]
    format: Format,
    /// Validate only; print nothing on success
    #[arg(long)]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Toml,
    Json,
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let (config, source) = match cli.config {
        Some(path) => (load_from_file(&path)?, ConfigSource::File(path)),
        None => load_from_env()?,
    };

    info!(
        source = %source,
        repositories = config.repositories.len(),
        workers = config.dispatcher.workers,
        "configuration is valid"
    );

    if !cli.quiet {
        let rendered = match cli.format {
            Format::Toml => to_toml(&config)?,
            Format::Json => serde_json::to_string_pretty(&config)?,
        };
        println!("{rendered}");
    }
    Ok(())
}
