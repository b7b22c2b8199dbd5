//! # echoverse
//!
//! Text-to-audiobook narration: optional tone rewriting, SpeechT5 synthesis
//! on ONNX Runtime, speed adjustment and WAV output, with a deterministic
//! fallback tone whenever the model cannot deliver.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use echoverse::{download, AppConfig, EmbeddingStore, Narrator, VoiceId};
//!
//! let config = AppConfig::default().apply_env();
//! let engine = download::load_model(&config.model, config.narrator.max_tokens).unwrap();
//!
//! // Cached speaker vectors, else the CMU ARCTIC x-vectors from the Hub,
//! // else random voices.
//! let xvectors = download::HubXvectorSource::from_config(&config.embeddings, None);
//! let store = EmbeddingStore::initialize(&config.embeddings, &xvectors).unwrap();
//!
//! let narrator = Narrator::new(Box::new(engine), Arc::new(store), config.narrator);
//! let wav: Vec<u8> = narrator.generate_speech("Hello from Rust!", VoiceId(1), 1.0).unwrap();
//! std::fs::write("hello.wav", wav).unwrap();
//! ```
//!
//! ## Pipeline
//! 1. **Validate**: text cut to 1000 characters, unknown voices mapped to
//!    the default, speed clamped to `[0.5, 2.0]`.
//! 2. **Embedding lookup**: 512-dim speaker x-vector for the voice.
//! 3. **Synthesis**: character tokens → acoustic model → vocoder (16 kHz).
//! 4. **Fallback**: on any error or a silent result, a 440 Hz tone lasting
//!    0.1 s per character.
//! 5. **Speed**: pitch-preserving time stretch (or plain resampling).
//! 6. **Encode**: 16-bit mono WAV.
//!
//! Only step 6 can fail, and only when the fallback audio itself cannot be
//! encoded.

pub mod audio;
pub mod config;

// Hub downloads are desktop-only: mobile apps bundle the model files and
// load them through SpeechT5Onnx::from_dir().
#[cfg(not(any(target_os = "ios", target_os = "android")))]
pub mod download;

pub mod embeddings;
pub mod error;
pub mod fallback;

// C FFI for iOS / Android: echoverse_narrator_load / generate_speech / free.
pub mod ffi;

pub mod history;
pub mod model;
pub mod narrator;
pub mod npz;
pub mod rewrite;
pub mod speed;
pub mod tokenize;
pub mod voice;
pub mod wav;

// ─── Re-exports for convenience ─────────────────────────────────────────────

pub use audio::{Waveform, SAMPLE_RATE};
pub use config::{AppConfig, NarratorConfig};
pub use embeddings::{EmbeddingStore, SpeakerEmbedding};
pub use error::{EmbeddingError, EncodeError, RewriteError, SynthesisError};
pub use fallback::FallbackGenerator;
pub use history::{NarrationHistory, NarrationRecord};
pub use model::{SpeechSynthesizer, SpeechT5Onnx, UnavailableModel};
pub use narrator::{AudioSource, FallbackReason, Narration, Narrator, SpeechRequest};
pub use rewrite::{Tone, ToneRewriter};
pub use speed::{SpeedAdjuster, SpeedMode};
pub use voice::{VoiceId, VoiceProfile};
