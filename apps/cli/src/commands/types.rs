//! Command type definitions shared between main.rs and the command modules.

use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum ModelsCommand {
    /// List GGUF files in the model directory
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load a model through the cache, optionally running a prompt
    Load {
        /// Model file name (defaults to the configured default model)
        name: Option<String>,

        /// Prompt to complete once the model is loaded
        #[arg(short, long)]
        prompt: Option<String>,

        /// Maximum tokens to generate
        #[arg(long, default_value_t = 128)]
        max_tokens: u32,

        /// Sampling temperature
        #[arg(long, default_value_t = 0.7)]
        temperature: f32,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Count the tokens of a text with a model's tokenizer
    Tokenize {
        /// Text to tokenize
        text: String,

        /// Model file name (defaults to the configured default model)
        #[arg(short, long)]
        model: Option<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Show the effective settings
    Show {
        /// Output as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}
