//! Nexus CLI - inspect and exercise the GGUF model lifecycle
//!
//! Provides the `nexus` command for listing model files, loading models
//! through the same cache and coordinator the server uses, and showing the
//! effective settings.

mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{ConfigCommand, ModelsCommand};

/// Nexus CLI - local GGUF model management
#[derive(Parser, Debug)]
#[command(name = "nexus", author, version, about = "Nexus - local GGUF model management")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", global = true)]
    log_level: String,

    /// Settings file (defaults to ./nexus.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect and load models
    #[command(subcommand)]
    Models(ModelsCommand),

    /// Show configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    let config = args.config.as_deref();
    match command {
        Command::Models(cmd) => commands::models::execute(cmd, config).await?,
        Command::Config(cmd) => commands::config::execute(cmd, config)?,
    }

    Ok(())
}
