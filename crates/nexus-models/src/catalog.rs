//! Model file discovery and name resolution.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{ModelError, Result};

/// File extension of loadable models.
pub const MODEL_EXTENSION: &str = "gguf";

/// Information about a model file available on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    /// File name, used as the model name in requests.
    pub name: String,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Model format.
    #[serde(rename = "type")]
    pub format: String,
    /// Last modification time, seconds since the Unix epoch.
    pub created: i64,
}

/// Resolves model names to files under the model directory.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    root: PathBuf,
}

impl ModelCatalog {
    /// Creates a catalog rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The model directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `name` to the model file it refers to.
    ///
    /// Names must be a single path component; anything that could escape the
    /// model directory is treated as not found.
    ///
    /// # Errors
    /// Returns `ModelError::ModelNotFound` if no such file exists.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let path = self.root.join(name);
        let not_found = || ModelError::ModelNotFound { name: name.to_string(), path: path.clone() };

        let mut components = Path::new(name).components();
        let single_normal = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_normal {
            debug!(model = %name, "Rejected model name outside model directory");
            return Err(not_found());
        }

        if !path.is_file() {
            return Err(not_found());
        }

        Ok(path)
    }

    /// Lists every `*.gguf` file in the model directory, sorted by name.
    ///
    /// A missing directory yields an empty list.
    ///
    /// # Errors
    /// Returns an I/O error if the directory exists but cannot be read.
    pub fn list(&self) -> std::io::Result<Vec<ModelInfo>> {
        if !self.root.is_dir() {
            warn!(path = %self.root.display(), "Model directory not found");
            return Ok(Vec::new());
        }

        let root = glob::Pattern::escape(&self.root.to_string_lossy());
        let pattern = format!("{root}/*.{MODEL_EXTENSION}");

        let paths = glob::glob(&pattern)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let mut models = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable model entry");
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };

            let metadata = std::fs::metadata(&path)?;
            let created = metadata.modified().map_or(0, |t| DateTime::<Utc>::from(t).timestamp());
            models.push(ModelInfo {
                name,
                size_bytes: metadata.len(),
                format: MODEL_EXTENSION.to_string(),
                created,
            });
        }

        models.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = models.len(), "Found available models");
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn catalog_with(files: &[(&str, usize)]) -> (TempDir, ModelCatalog) {
        let temp = TempDir::new().unwrap();
        for (name, size) in files {
            std::fs::write(temp.path().join(name), vec![0_u8; *size]).unwrap();
        }
        let catalog = ModelCatalog::new(temp.path());
        (temp, catalog)
    }

    #[test]
    fn test_resolve_existing_model() {
        let (temp, catalog) = catalog_with(&[("tiny.gguf", 4)]);
        let path = catalog.resolve("tiny.gguf").unwrap();
        assert_eq!(path, temp.path().join("tiny.gguf"));
    }

    #[test]
    fn test_resolve_missing_model() {
        let (temp, catalog) = catalog_with(&[]);
        let err = catalog.resolve("absent.gguf").unwrap_err();
        assert_eq!(
            err,
            ModelError::ModelNotFound {
                name: "absent.gguf".to_string(),
                path: temp.path().join("absent.gguf"),
            }
        );
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("models");
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::write(temp.path().join("escape.gguf"), b"x").unwrap();
        std::fs::write(root.join("nested").join("model.gguf"), b"x").unwrap();
        let catalog = ModelCatalog::new(&root);

        assert!(catalog.resolve("../escape.gguf").unwrap_err().is_not_found());
        assert!(catalog.resolve("nested/model.gguf").unwrap_err().is_not_found());
        assert!(catalog.resolve("").unwrap_err().is_not_found());
    }

    #[test]
    fn test_resolve_rejects_directories() {
        let (temp, catalog) = catalog_with(&[]);
        std::fs::create_dir(temp.path().join("dir.gguf")).unwrap();
        assert!(catalog.resolve("dir.gguf").is_err());
    }

    #[test]
    fn test_list_only_gguf_sorted() {
        let (_temp, catalog) =
            catalog_with(&[("zeta.gguf", 10), ("alpha.gguf", 3), ("notes.txt", 1)]);

        let models = catalog.list().unwrap();
        let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.gguf", "zeta.gguf"]);
        assert_eq!(models[0].size_bytes, 3);
        assert_eq!(models[1].size_bytes, 10);
        assert_eq!(models[0].format, "gguf");
        assert!(models[0].created > 0);
    }

    #[test]
    fn test_list_missing_directory_is_empty() {
        let catalog = ModelCatalog::new("/definitely/not/a/model/dir");
        assert!(catalog.list().unwrap().is_empty());
    }

    #[test]
    fn test_model_info_serializes_type_field() {
        let info = ModelInfo {
            name: "a.gguf".to_string(),
            size_bytes: 1,
            format: "gguf".to_string(),
            created: 0,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "gguf");
    }
}
