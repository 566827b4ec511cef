//! Integration tests for the `nexus models` and `nexus config` commands.
//!
//! These run against the default build, which loads models with the mock
//! engine.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a workspace with a `models/` directory.
fn workspace(models: &[&str]) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let models_dir = temp_dir.path().join("models");
    fs::create_dir_all(&models_dir).unwrap();
    for name in models {
        fs::write(models_dir.join(name), b"GGUF").unwrap();
    }
    temp_dir
}

fn nexus(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("nexus").unwrap();
    cmd.current_dir(temp_dir.path())
        .env("NEXUS_MODEL_PATH", temp_dir.path().join("models"))
        .env_remove("NEXUS_DEFAULT_MODEL")
        .env_remove("NEXUS_MAX_CACHED_MODELS");
    cmd
}

#[test]
fn test_models_list_empty() {
    let temp_dir = workspace(&[]);

    nexus(&temp_dir)
        .args(["models", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No GGUF files"));
}

#[test]
fn test_models_list_json() {
    let temp_dir = workspace(&["beta.gguf", "alpha.gguf", "readme.txt"]);

    let output = nexus(&temp_dir).args(["models", "list", "--json"]).output().unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<&str> =
        value["data"].as_array().unwrap().iter().map(|m| m["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["alpha.gguf", "beta.gguf"]);
    assert_eq!(value["data"][0]["type"], "gguf");
}

#[test]
fn test_models_load_with_prompt() {
    let temp_dir = workspace(&["tiny.gguf"]);

    nexus(&temp_dir)
        .args(["models", "load", "tiny.gguf", "--prompt", "hello world"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded tiny.gguf"))
        .stdout(predicate::str::contains("Mock completion from tiny.gguf"));
}

#[test]
fn test_models_load_json_reports_stats() {
    let temp_dir = workspace(&["tiny.gguf"]);

    let output = nexus(&temp_dir).args(["models", "load", "tiny.gguf", "--json"]).output().unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["model"], "tiny.gguf");
    assert_eq!(value["engine"], "mock");
    assert_eq!(value["stats"]["loads"]["loads"], 1);
    assert!(value["completion"].is_null());
}

#[test]
fn test_models_load_missing_model() {
    let temp_dir = workspace(&[]);

    nexus(&temp_dir)
        .args(["models", "load", "ghost.gguf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Model file not found"));
}

#[test]
fn test_models_load_generation_failure_still_releases_model() {
    let temp_dir = workspace(&["tiny.gguf"]);

    // 5000 new tokens cannot fit the default 2048-token context
    nexus(&temp_dir)
        .args(["--log-level", "debug", "models", "load", "tiny.gguf"])
        .args(["--prompt", "hi", "--max-tokens", "5000"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Generation failed"))
        .stderr(predicate::str::contains("Released model handle"))
        .stderr(predicate::str::contains("Model manager shut down"));
}

#[test]
fn test_models_tokenize() {
    let temp_dir = workspace(&["tiny.gguf"]);

    nexus(&temp_dir)
        .args(["models", "tokenize", "one two three", "--model", "tiny.gguf"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"token_count\":3"));
}

#[test]
fn test_config_show_uses_settings_file() {
    let temp_dir = workspace(&[]);
    fs::write(temp_dir.path().join("nexus.toml"), "max_cached_models = 5\n").unwrap();

    let output = nexus(&temp_dir).args(["config", "show", "--json"]).output().unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["max_cached_models"], 5);
    assert_eq!(value["context_length"], 2048);
}

#[test]
fn test_config_show_rejects_invalid_settings() {
    let temp_dir = workspace(&[]);

    nexus(&temp_dir)
        .env("NEXUS_MAX_CACHED_MODELS", "0")
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_cached_models"));
}
