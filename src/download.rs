//! HuggingFace Hub downloads: the SpeechT5 model files and the x-vector archive.
//!
//! Files land in the Hub cache (`~/.cache/huggingface/hub` by default), so
//! only the first run touches the network.

use std::path::PathBuf;

use anyhow::{Context, Result};
use hf_hub::api::sync::{Api, ApiBuilder, ApiRepo};
use tracing::info;

use crate::{
    config::{EmbeddingConfig, ModelSourceConfig},
    embeddings::XvectorSource,
    model::{ModelConfig, SpeechT5Onnx},
};

// ─────────────────────────────────────────────────────────────────────────────
// Download helpers
// ─────────────────────────────────────────────────────────────────────────────

fn hub_api(token: Option<&str>) -> Result<Api> {
    ApiBuilder::new()
        .with_token(token.map(str::to_string))
        .build()
        .context("Failed to initialise HuggingFace Hub client")
}

fn hf_download(repo: &ApiRepo, repo_id: &str, filename: &str) -> Result<PathBuf> {
    repo.get(filename)
        .with_context(|| format!("Failed to download '{}' from '{}'", filename, repo_id))
}

// ─────────────────────────────────────────────────────────────────────────────
// Model
// ─────────────────────────────────────────────────────────────────────────────

/// Download `config.json` and the files it names, then load the engine.
pub fn load_from_hub(repo_id: &str, token: Option<&str>, max_tokens: usize) -> Result<SpeechT5Onnx> {
    info!(repo = repo_id, "downloading model config");
    let api = hub_api(token)?;
    let repo = api.model(repo_id.to_string());

    let config_path = hf_download(&repo, repo_id, "config.json")?;
    let config_bytes = std::fs::read(&config_path)
        .with_context(|| format!("Cannot read config: {}", config_path.display()))?;
    let config = ModelConfig::from_slice(&config_bytes)?;

    info!(file = %config.acoustic_model, "downloading acoustic model");
    let acoustic_path = hf_download(&repo, repo_id, &config.acoustic_model)?;

    info!(file = %config.vocoder_model, "downloading vocoder");
    let vocoder_path = hf_download(&repo, repo_id, &config.vocoder_model)?;

    let vocab_path = hf_download(&repo, repo_id, &config.vocab)?;

    info!("loading model");
    Ok(SpeechT5Onnx::load(&acoustic_path, &vocoder_path, &vocab_path, max_tokens)?
        .with_sample_rate(config.sample_rate))
}

/// Load the engine from the Hub if a repository is configured, else from disk.
pub fn load_model(source: &ModelSourceConfig, max_tokens: usize) -> Result<SpeechT5Onnx> {
    match &source.repo_id {
        Some(repo_id) => load_from_hub(repo_id, source.token.as_deref(), max_tokens),
        None => SpeechT5Onnx::from_dir(&source.local_dir, max_tokens),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Speaker x-vectors
// ─────────────────────────────────────────────────────────────────────────────

/// Fetches the CMU ARCTIC x-vector archive from a Hub dataset repository.
pub struct HubXvectorSource {
    pub repo_id: String,
    pub filename: String,
    pub token: Option<String>,
}

impl HubXvectorSource {
    pub fn from_config(config: &EmbeddingConfig, token: Option<String>) -> Self {
        Self {
            repo_id: config.dataset_repo.clone(),
            filename: config.dataset_file.clone(),
            token,
        }
    }
}

impl XvectorSource for HubXvectorSource {
    fn archive_path(&self) -> Result<PathBuf> {
        info!(repo = %self.repo_id, file = %self.filename, "downloading x-vector archive");
        let api = hub_api(self.token.as_deref())?;
        let repo = api.dataset(self.repo_id.clone());
        hf_download(&repo, &self.repo_id, &self.filename)
    }
}
