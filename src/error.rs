//! Error types for each stage of the narration pipeline.
//!
//! Only [`EncodeError`] ever leaves [`crate::Narrator`]; the others are
//! recovered inside the stage that owns them and logged where the recovery
//! decision is made.

use thiserror::Error;

/// Failures while acquiring or validating speaker embeddings.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// An embedding does not have the store's declared dimensionality.
    #[error("embedding for voice {voice} has dimension {actual}, expected {expected}")]
    DimensionMismatch { voice: u32, expected: usize, actual: usize },

    /// The store would not contain the default voice.
    #[error("embedding set has no entry for the default voice {0}")]
    MissingDefault(u32),

    /// The embedding dimension itself is unusable.
    #[error("embedding dimension must be non-zero")]
    ZeroDimension,

    /// The x-vector archive could not be fetched or read.
    #[error("x-vector dataset unavailable: {0}")]
    Dataset(String),

    /// The archive holds no `.npy` members.
    #[error("x-vector archive contains no vectors")]
    EmptyDataset,

    /// Reading or writing the NPZ cache failed.
    #[error("embedding cache {path}: {message}")]
    Cache { path: String, message: String },
}

/// Failures inside the synthesis engine.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Text produced no model tokens.
    #[error("tokenization produced no input for the model")]
    Tokenization,

    /// ONNX Runtime raised (resource exhaustion, malformed input, lock poisoning).
    #[error("inference failed: {0}")]
    Inference(String),

    /// The model returned a zero-length waveform.
    #[error("model returned an empty waveform")]
    EmptyOutput,

    /// The model returned audio that is effectively silent.
    #[error("model output is effectively silent (peak {peak:.2e})")]
    Silent { peak: f32 },
}

/// Failures turning a waveform into WAV bytes (or back).
#[derive(Debug, Error)]
pub enum EncodeError {
    /// A NaN or infinite sample reached the encoder.
    #[error("non-finite sample at index {index}")]
    NonFiniteSample { index: usize },

    /// Sample rate of zero cannot be written to a WAV header.
    #[error("invalid sample rate {0}")]
    InvalidSampleRate(u32),

    /// Decoded container is not mono 16-bit integer PCM.
    #[error("unsupported WAV layout: {channels} channel(s), {bits} bits, {format}")]
    UnsupportedFormat { channels: u16, bits: u16, format: &'static str },

    /// Error from the WAV codec itself.
    #[error("WAV codec error: {0}")]
    Wav(#[from] hound::Error),
}

/// Failures talking to the hosted rewriting model.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("rewrite request failed: {0}")]
    Transport(String),

    #[error("rewrite endpoint returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("rewrite response unreadable: {0}")]
    Response(String),

    #[error("rewrite produced no text")]
    Empty,
}

impl From<ureq::Error> for RewriteError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, resp) => RewriteError::Status {
                status,
                message: resp.into_string().unwrap_or_default(),
            },
            ureq::Error::Transport(transport) => RewriteError::Transport(transport.to_string()),
        }
    }
}
