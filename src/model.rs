//! Neural synthesis: SpeechT5 acoustic model + HiFi-GAN vocoder on ONNX Runtime.
//!
//! The two graphs are run back to back:
//!
//! | Graph     | Inputs                                              | Output                      |
//! |-----------|-----------------------------------------------------|-----------------------------|
//! | acoustic  | `input_ids` `[1, T]` i64, `speaker_embeddings` `[1, 512]` f32 | spectrogram `[frames, 80]` f32 |
//! | vocoder   | spectrogram (shape passed through)                  | waveform `[samples]` f32    |
//!
//! Inputs are positional, in the order above.

use std::{path::Path, sync::Mutex};

use anyhow::{bail, Context, Result};
use ort::{session::Session, value::Tensor};
use serde::Deserialize;

use crate::{
    audio::{Waveform, SAMPLE_RATE},
    embeddings::SpeakerEmbedding,
    error::SynthesisError,
    tokenize::CharTokenizer,
};

/// Turns text plus a speaker embedding into a raw waveform.
///
/// Implementations do one blocking computation per call. The narrator owns
/// the silence check and every fallback decision, so an implementation only
/// reports what went wrong.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(
        &self,
        text: &str,
        embedding: &SpeakerEmbedding,
    ) -> Result<Waveform, SynthesisError>;

    fn sample_rate(&self) -> u32;
}

// ─────────────────────────────────────────────────────────────────────────────
// config.json schema
// ─────────────────────────────────────────────────────────────────────────────

/// Deserialised `config.json` of a model directory or Hub repository.
#[derive(Debug, Deserialize)]
pub struct ModelConfig {
    /// Must be `"SpeechT5"`.
    #[serde(rename = "type")]
    pub model_type: String,

    /// Acoustic graph file name (e.g. `"acoustic_model.onnx"`).
    pub acoustic_model: String,

    /// Vocoder graph file name (e.g. `"vocoder.onnx"`).
    pub vocoder_model: String,

    /// Tokenizer vocabulary file name.
    #[serde(default = "default_vocab")]
    pub vocab: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

fn default_vocab() -> String {
    "vocab.json".to_string()
}

fn default_sample_rate() -> u32 {
    SAMPLE_RATE
}

impl ModelConfig {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let config: ModelConfig =
            serde_json::from_slice(bytes).context("Failed to parse config.json")?;
        if config.model_type != "SpeechT5" {
            bail!("Unsupported model type '{}', expected SpeechT5", config.model_type);
        }
        Ok(config)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SpeechT5Onnx
// ─────────────────────────────────────────────────────────────────────────────

/// SpeechT5 text-to-speech on ONNX Runtime.
///
/// ORT sessions need `&mut` to run, so each sits behind its own mutex. Calls
/// from several threads therefore take turns on the model while tokenising,
/// post-processing and encoding still run in parallel.
pub struct SpeechT5Onnx {
    acoustic: Mutex<Session>,
    vocoder: Mutex<Session>,
    tokenizer: CharTokenizer,
    sample_rate: u32,
}

impl SpeechT5Onnx {
    /// Load both graphs and the tokenizer vocabulary.
    pub fn load(
        acoustic_path: &Path,
        vocoder_path: &Path,
        vocab_path: &Path,
        max_tokens: usize,
    ) -> Result<Self> {
        let acoustic = Session::builder()
            .context("Failed to create ORT session builder")?
            .commit_from_file(acoustic_path)
            .with_context(|| format!("Cannot load acoustic model: {}", acoustic_path.display()))?;

        let vocoder = Session::builder()
            .context("Failed to create ORT session builder")?
            .commit_from_file(vocoder_path)
            .with_context(|| format!("Cannot load vocoder: {}", vocoder_path.display()))?;

        let tokenizer = CharTokenizer::from_vocab_json(vocab_path, max_tokens)?;

        Ok(Self {
            acoustic: Mutex::new(acoustic),
            vocoder: Mutex::new(vocoder),
            tokenizer,
            sample_rate: SAMPLE_RATE,
        })
    }

    /// Load from a directory holding `config.json` and the files it names.
    pub fn from_dir(dir: &Path, max_tokens: usize) -> Result<Self> {
        let config_path = dir.join("config.json");
        let bytes = std::fs::read(&config_path)
            .with_context(|| format!("Cannot read config: {}", config_path.display()))?;
        let config = ModelConfig::from_slice(&bytes)?;
        Ok(Self::load(
            &dir.join(&config.acoustic_model),
            &dir.join(&config.vocoder_model),
            &dir.join(&config.vocab),
            max_tokens,
        )?
        .with_sample_rate(config.sample_rate))
    }

    /// Override the vocoder output rate (if a repository's config declares one).
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        if sample_rate > 0 {
            self.sample_rate = sample_rate;
        }
        self
    }

    pub fn tokenizer(&self) -> &CharTokenizer {
        &self.tokenizer
    }

    /// Acoustic pass: token ids + embedding → (spectrogram shape, data).
    fn spectrogram(
        &self,
        ids: Vec<i64>,
        embedding: &SpeakerEmbedding,
    ) -> Result<(Vec<i64>, Vec<f32>), SynthesisError> {
        let seq_len = ids.len();
        let dim = embedding.dim();

        let t_input_ids = Tensor::<i64>::from_array(([1usize, seq_len], ids))
            .map_err(|e| inference("input_ids tensor", e))?;
        let t_speaker = Tensor::<f32>::from_array(([1usize, dim], embedding.as_slice().to_vec()))
            .map_err(|e| inference("speaker_embeddings tensor", e))?;

        let mut session = self
            .acoustic
            .lock()
            .map_err(|_| SynthesisError::Inference("acoustic session mutex poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![t_input_ids, t_speaker])
            .map_err(|e| inference("acoustic model", e))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| inference("spectrogram extraction", e))?;
        Ok((shape.iter().copied().collect(), data.to_vec()))
    }

    /// Vocoder pass: spectrogram → flat waveform samples.
    fn vocode(&self, dims: Vec<i64>, spectrogram: Vec<f32>) -> Result<Vec<f32>, SynthesisError> {
        let t_spec = Tensor::<f32>::from_array((dims, spectrogram))
            .map_err(|e| inference("spectrogram tensor", e))?;

        let mut session = self
            .vocoder
            .lock()
            .map_err(|_| SynthesisError::Inference("vocoder session mutex poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![t_spec])
            .map_err(|e| inference("vocoder", e))?;

        let (_shape, audio) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| inference("waveform extraction", e))?;
        Ok(audio.to_vec())
    }
}

fn inference(stage: &str, err: impl std::fmt::Display) -> SynthesisError {
    SynthesisError::Inference(format!("{}: {}", stage, err))
}

impl SpeechSynthesizer for SpeechT5Onnx {
    fn synthesize(
        &self,
        text: &str,
        embedding: &SpeakerEmbedding,
    ) -> Result<Waveform, SynthesisError> {
        let ids = self.tokenizer.encode(text);
        if ids.is_empty() {
            return Err(SynthesisError::Tokenization);
        }

        let (dims, spectrogram) = self.spectrogram(ids, embedding)?;
        if spectrogram.is_empty() {
            return Err(SynthesisError::EmptyOutput);
        }

        let samples = self.vocode(dims, spectrogram)?;
        if samples.is_empty() {
            return Err(SynthesisError::EmptyOutput);
        }
        Ok(Waveform::new(samples, self.sample_rate))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// UnavailableModel
// ─────────────────────────────────────────────────────────────────────────────

/// Stands in for a model that failed to load, so every narration falls back.
#[derive(Debug, Clone)]
pub struct UnavailableModel {
    reason: String,
}

impl UnavailableModel {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl SpeechSynthesizer for UnavailableModel {
    fn synthesize(&self, _: &str, _: &SpeakerEmbedding) -> Result<Waveform, SynthesisError> {
        Err(SynthesisError::Inference(format!("model not loaded: {}", self.reason)))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}
