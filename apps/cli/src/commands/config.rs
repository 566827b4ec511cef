//! Config command implementation.

use super::types::ConfigCommand;
use anyhow::Result;
use std::path::Path;

/// Execute the config command.
pub fn execute(command: ConfigCommand, config: Option<&Path>) -> Result<()> {
    match command {
        ConfigCommand::Show { json } => show(config, json),
    }
}

fn show(config: Option<&Path>, json_output: bool) -> Result<()> {
    let settings = super::load_settings(config)?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&settings)?);
    } else {
        print!("{}", toml::to_string_pretty(&settings)?);
    }
    Ok(())
}
