//! Runtime configuration.
//!
//! Everything is plain serde with defaults, so an empty `{}` JSON file (or no
//! file at all) yields a working setup. A handful of environment variables
//! override the file for secrets and deployment paths.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{embeddings::EMBEDDING_DIM, fallback::FallbackConfig, speed::SpeedMode};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSourceConfig,
    pub embeddings: EmbeddingConfig,
    pub narrator: NarratorConfig,
    pub rewriter: RewriterConfig,
    pub history: HistoryConfig,
}

impl AppConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)
            .with_context(|| format!("Cannot read config: {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Apply `HUGGINGFACE_TOKEN`, `ECHOVERSE_CACHE_DIR` and
    /// `ECHOVERSE_MODEL_REPO` on top of the file values.
    pub fn apply_env(mut self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok());
        self
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(token) = var("HUGGINGFACE_TOKEN") {
            self.rewriter.token = Some(token.clone());
            self.model.token = Some(token);
        }
        if let Some(dir) = var("ECHOVERSE_CACHE_DIR") {
            self.embeddings.cache_path = PathBuf::from(dir).join("speaker_embeddings.npz");
        }
        if let Some(repo) = var("ECHOVERSE_MODEL_REPO") {
            self.model.repo_id = Some(repo);
        }
    }
}

/// Where the ONNX model files come from.
///
/// With `repo_id` set the files are fetched from the HuggingFace Hub (and
/// cached there); otherwise they are read from `local_dir`. Both layouts hold
/// `config.json`, the acoustic and vocoder graphs, and `vocab.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSourceConfig {
    pub repo_id: Option<String>,
    pub local_dir: PathBuf,
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for ModelSourceConfig {
    fn default() -> Self {
        Self {
            repo_id: None,
            local_dir: PathBuf::from("models/speecht5"),
            token: None,
        }
    }
}

/// Embedding store acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub cache_path: PathBuf,
    /// HuggingFace dataset repository of the x-vector archive.
    pub dataset_repo: String,
    /// Archive file name inside `dataset_repo`.
    pub dataset_file: String,
    pub dim: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from(".cache/echoverse/speaker_embeddings.npz"),
            dataset_repo: "Matthijs/cmu-arctic-xvectors".to_string(),
            dataset_file: "spkrec-xvect.zip".to_string(),
            dim: EMBEDDING_DIM,
        }
    }
}

/// Limits and strategies applied by [`crate::Narrator`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NarratorConfig {
    /// Characters of input kept before synthesis; longer text is cut and
    /// marked with `"..."`.
    pub max_chars: usize,
    /// Token budget handed to the tokenizer (includes the end token).
    pub max_tokens: usize,
    pub min_speed: f32,
    pub max_speed: f32,
    pub speed_mode: SpeedMode,
    pub fallback: FallbackConfig,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            max_tokens: 600,
            min_speed: 0.5,
            max_speed: 2.0,
            speed_mode: SpeedMode::TimeStretch,
            fallback: FallbackConfig::default(),
        }
    }
}

/// Hosted text-generation endpoint used for tone rewriting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriterConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model_id: String,
    /// Default `max_new_tokens` for a rewrite.
    pub max_length: usize,
    pub timeout_secs: u64,
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api-inference.huggingface.co".to_string(),
            model_id: "ibm-granite/granite-3.1-8b-instruct".to_string(),
            max_length: 300,
            timeout_secs: 60,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 20 }
    }
}
