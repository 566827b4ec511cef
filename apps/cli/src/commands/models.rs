//! Models command implementation.

use super::types::ModelsCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use nexus_models::{GenerationParams, ModelCatalog, ModelManager, Settings};
use serde_json::json;
use std::path::Path;

/// Execute the models command.
pub async fn execute(command: ModelsCommand, config: Option<&Path>) -> Result<()> {
    let settings = super::load_settings(config)?;

    match command {
        ModelsCommand::List { json } => list_models(&settings, json),
        ModelsCommand::Load { name, prompt, max_tokens, temperature, json } => {
            let params =
                GenerationParams { max_tokens, temperature, ..GenerationParams::default() };
            load_model(settings, name, prompt, params, json).await
        }
        ModelsCommand::Tokenize { text, model } => tokenize(settings, model, text).await,
    }
}

fn format_size(bytes: u64) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    #[allow(clippy::cast_precision_loss)]
    let mb = bytes as f64 / MB;
    if mb >= 1024.0 { format!("{:.1} GB", mb / 1024.0) } else { format!("{mb:.1} MB") }
}

/// List GGUF files in the model directory.
fn list_models(settings: &Settings, json_output: bool) -> Result<()> {
    let catalog = ModelCatalog::new(settings.model_path.clone());
    let models = catalog
        .list()
        .with_context(|| format!("Failed to read model directory {}", catalog.root().display()))?;

    if json_output {
        let data = json!({
            "object": "list",
            "data": models,
            "default_model": settings.default_model,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Available Models ({})", models.len()).bold().cyan());
    println!();

    if models.is_empty() {
        println!("  {}", format!("No GGUF files in {}", catalog.root().display()).dimmed());
        println!();
        return Ok(());
    }

    println!("{:<50} {:>10} {}", "Name", "Size", "");
    println!("{}", "─".repeat(70));
    for model in &models {
        let default_str =
            if model.name == settings.default_model { "(default)".green() } else { "".dimmed() };
        println!("{:<50} {:>10} {}", model.name.cyan(), format_size(model.size_bytes), default_str);
    }
    println!();

    Ok(())
}

fn build_manager(settings: Settings) -> Result<ModelManager> {
    let engine = super::build_engine()?;
    ModelManager::new(settings, engine).context("Failed to create model manager")
}

/// Load a model and optionally complete a prompt with it.
async fn load_model(
    settings: Settings,
    name: Option<String>,
    prompt: Option<String>,
    params: GenerationParams,
    json_output: bool,
) -> Result<()> {
    let manager = build_manager(settings)?;
    let name = name.unwrap_or_else(|| manager.settings().default_model.clone());

    let started = std::time::Instant::now();
    // Generation errors still go through shutdown so the model is released
    let result = async {
        let handle = manager
            .acquire(&name)
            .await
            .with_context(|| format!("Failed to load model '{name}'"))?;
        let load_ms = started.elapsed().as_millis();

        let completion = match prompt {
            Some(prompt) => {
                let outcome =
                    tokio::task::spawn_blocking(move || handle.complete(&prompt, &params)).await?;
                Some(outcome.context("Generation failed")?)
            }
            None => None,
        };
        anyhow::Ok((load_ms, completion))
    }
    .await;

    let stats = manager.stats();
    manager.shutdown().await;
    let (load_ms, completion) = result?;

    if json_output {
        let data = json!({
            "model": name,
            "engine": manager.engine_id(),
            "load_ms": load_ms,
            "completion": completion,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!(
        "{} {} {}",
        "✓".green(),
        format!("Loaded {name}").bold(),
        format!("({} engine, {load_ms} ms)", manager.engine_id()).dimmed()
    );

    if let Some(completion) = completion {
        println!();
        println!("{}", completion.text);
        println!();
        println!(
            "{}",
            format!(
                "{} prompt + {} completion tokens, finish reason: {:?}",
                completion.usage.prompt_tokens,
                completion.usage.completion_tokens,
                completion.finish_reason
            )
            .dimmed()
        );
    }

    Ok(())
}

/// Count tokens in `text` with the given model.
async fn tokenize(settings: Settings, model: Option<String>, text: String) -> Result<()> {
    let manager = build_manager(settings)?;
    let name = model.unwrap_or_else(|| manager.settings().default_model.clone());

    let result = async {
        let handle = manager.acquire(&name).await?;
        let count = handle.count_tokens(&text)?;
        anyhow::Ok(count)
    }
    .await;
    manager.shutdown().await;

    let count = result.with_context(|| format!("Failed to tokenize with '{name}'"))?;
    println!("{}", json!({ "model": name, "token_count": count }));
    Ok(())
}
