//! Synthesis orchestration: the one entry point callers use.
//!
//! Per call: validate → embedding lookup → synthesize → (fallback) →
//! speed adjust → encode. Every failure before encoding degrades to the
//! fallback tone; the narrator logs once, at the point it decides to fall back.

use std::{borrow::Cow, fmt, sync::Arc, time::Instant};

use tracing::{debug, info, warn};

/// Hard limits on the speed multiplier, whatever the configuration says.
const MIN_SPEED: f32 = 0.5;
const MAX_SPEED: f32 = 2.0;

use crate::{
    audio::Waveform,
    config::NarratorConfig,
    embeddings::EmbeddingStore,
    error::{EncodeError, SynthesisError},
    fallback::FallbackGenerator,
    model::SpeechSynthesizer,
    speed::SpeedAdjuster,
    voice::VoiceId,
    wav,
};

/// Input to one narration.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: VoiceId,
    pub speed: f32,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), voice: VoiceId::DEFAULT, speed: 1.0 }
    }

    pub fn with_voice(mut self, voice: VoiceId) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }
}

/// Why the fallback tone was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// The engine returned an error.
    SynthesisFailed(String),
    /// The engine "succeeded" with effectively silent audio.
    SilentOutput,
    /// The model waveform could not be encoded.
    EncodingFailed(String),
    /// The caller gave up waiting (see the server's synthesis timeout).
    TimedOut,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::SynthesisFailed(e) => write!(f, "synthesis failed: {}", e),
            FallbackReason::SilentOutput => f.write_str("model output was silent"),
            FallbackReason::EncodingFailed(e) => write!(f, "encoding failed: {}", e),
            FallbackReason::TimedOut => f.write_str("synthesis timed out"),
        }
    }
}

/// Which path produced a narration's audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    Model,
    Fallback(FallbackReason),
}

impl AudioSource {
    pub fn is_fallback(&self) -> bool {
        matches!(self, AudioSource::Fallback(_))
    }

    /// Short label for headers and logs.
    pub fn label(&self) -> &'static str {
        match self {
            AudioSource::Model => "model",
            AudioSource::Fallback(_) => "fallback",
        }
    }
}

/// Encoded audio plus the path that produced it.
#[derive(Debug, Clone)]
pub struct Narration {
    /// WAV bytes (mono, 16-bit PCM).
    pub audio: Vec<u8>,
    pub source: AudioSource,
    /// Voice actually used after default substitution.
    pub voice: VoiceId,
    /// Speed actually applied after clamping.
    pub speed: f32,
    pub duration_secs: f32,
}

pub struct Narrator {
    engine: Box<dyn SpeechSynthesizer>,
    store: Arc<EmbeddingStore>,
    adjuster: Box<dyn SpeedAdjuster>,
    fallback: FallbackGenerator,
    config: NarratorConfig,
}

impl Narrator {
    /// Speed bounds outside `[0.5, 2.0]` are narrowed to it; an inverted or
    /// non-finite range is replaced by the defaults.
    pub fn new(
        engine: Box<dyn SpeechSynthesizer>,
        store: Arc<EmbeddingStore>,
        mut config: NarratorConfig,
    ) -> Self {
        (config.min_speed, config.max_speed) = speed_bounds(config.min_speed, config.max_speed);
        Self {
            engine,
            store,
            adjuster: config.speed_mode.adjuster(),
            fallback: FallbackGenerator::new(config.fallback.clone()),
            config,
        }
    }

    /// Replace the configured speed strategy.
    pub fn with_speed_adjuster(mut self, adjuster: Box<dyn SpeedAdjuster>) -> Self {
        self.adjuster = adjuster;
        self
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    pub fn config(&self) -> &NarratorConfig {
        &self.config
    }

    pub fn fallback_generator(&self) -> &FallbackGenerator {
        &self.fallback
    }

    /// Narrate `text` and return WAV bytes.
    ///
    /// Only an encoding failure of the fallback audio itself is returned as an
    /// error; everything else degrades to the fallback tone.
    pub fn generate_speech(
        &self,
        text: &str,
        voice: VoiceId,
        speed: f32,
    ) -> Result<Vec<u8>, EncodeError> {
        let request = SpeechRequest { text: text.to_string(), voice, speed };
        self.narrate(&request).map(|n| n.audio)
    }

    /// Same as [`generate_speech`](Self::generate_speech), reporting which
    /// path produced the audio.
    pub fn narrate(&self, request: &SpeechRequest) -> Result<Narration, EncodeError> {
        let started = Instant::now();
        let text = truncate_chars(&request.text, self.config.max_chars);
        let voice = self.store.resolve(request.voice);
        let speed = self.clamp_speed(request.speed);
        debug!(chars = text.chars().count(), %voice, speed, "narration requested");

        let embedding = self.store.get(voice);
        let narration = match self.engine.synthesize(&text, embedding) {
            Ok(waveform) if waveform.is_effectively_silent() => {
                let err = SynthesisError::Silent { peak: waveform.peak() };
                warn!(error = %err, %voice, "falling back to tone");
                self.fallback_narration(&text, voice, speed, FallbackReason::SilentOutput)?
            }
            Ok(waveform) => match self.finish(&waveform, speed) {
                Ok((audio, duration_secs)) => {
                    Narration { audio, source: AudioSource::Model, voice, speed, duration_secs }
                }
                Err(e) => {
                    warn!(error = %e, %voice, "model audio could not be encoded; falling back to tone");
                    let reason = FallbackReason::EncodingFailed(e.to_string());
                    self.fallback_narration(&text, voice, speed, reason)?
                }
            },
            Err(e) => {
                warn!(error = %e, %voice, "synthesis failed; falling back to tone");
                let reason = FallbackReason::SynthesisFailed(e.to_string());
                self.fallback_narration(&text, voice, speed, reason)?
            }
        };

        info!(
            source = narration.source.label(),
            %voice,
            speed,
            duration_secs = narration.duration_secs,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "narration complete"
        );
        Ok(narration)
    }

    /// Fallback audio for `text`, post-processed like model audio.
    ///
    /// Also used by callers that abandon a synthesis (timeouts) and need a
    /// substitute with the same shape.
    pub fn fallback_narration(
        &self,
        text: &str,
        voice: VoiceId,
        speed: f32,
        reason: FallbackReason,
    ) -> Result<Narration, EncodeError> {
        let speed = self.clamp_speed(speed);
        let waveform = self.fallback.generate(&truncate_chars(text, self.config.max_chars));
        let (audio, duration_secs) = self.finish(&waveform, speed)?;
        Ok(Narration { audio, source: AudioSource::Fallback(reason), voice, speed, duration_secs })
    }

    /// Sanitize, speed-adjust and encode.
    fn finish(&self, waveform: &Waveform, speed: f32) -> Result<(Vec<u8>, f32), EncodeError> {
        let adjusted = self.adjuster.adjust(&waveform.sanitized(), speed);
        let audio = wav::encode(&adjusted)?;
        Ok((audio, adjusted.duration_secs()))
    }

    fn clamp_speed(&self, speed: f32) -> f32 {
        if !speed.is_finite() {
            return 1.0;
        }
        speed.clamp(self.config.min_speed, self.config.max_speed)
    }
}

fn speed_bounds(min: f32, max: f32) -> (f32, f32) {
    let (lo, hi) = (min.max(MIN_SPEED), max.min(MAX_SPEED));
    if min.is_finite() && max.is_finite() && lo <= hi {
        return (lo, hi);
    }
    warn!(min_speed = min, max_speed = max, "invalid speed range; using defaults");
    (MIN_SPEED, MAX_SPEED)
}

/// Keep at most `max_chars` characters, marking a cut with `"..."`.
pub fn truncate_chars(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => Cow::Owned(format!("{}...", &text[..byte_idx])),
        None => Cow::Borrowed(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::SAMPLE_RATE, embeddings::SpeakerEmbedding, speed::SpeedMode};

    struct ToneEngine;

    impl SpeechSynthesizer for ToneEngine {
        fn synthesize(&self, text: &str, _: &SpeakerEmbedding) -> Result<Waveform, SynthesisError> {
            // 0.05 s of a 200 Hz tone per character.
            let n = text.chars().count() * 800;
            let samples = (0..n)
                .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 200.0 * i as f32 / 16_000.0).sin())
                .collect();
            Ok(Waveform::new(samples, SAMPLE_RATE))
        }

        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }
    }

    struct NanEngine;

    impl SpeechSynthesizer for NanEngine {
        fn synthesize(&self, _: &str, _: &SpeakerEmbedding) -> Result<Waveform, SynthesisError> {
            Ok(Waveform::new(vec![0.5, f32::NAN, -0.5, f32::INFINITY], SAMPLE_RATE))
        }

        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }
    }

    fn narrator(engine: Box<dyn SpeechSynthesizer>) -> Narrator {
        let store = Arc::new(EmbeddingStore::random(8).unwrap());
        Narrator::new(engine, store, NarratorConfig::default())
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel...");
        assert_eq!(truncate_chars("héllo", 2), "hé...");
        assert!(matches!(truncate_chars("abc", 3), Cow::Borrowed(_)));
    }

    #[test]
    fn test_model_path() {
        let n = narrator(Box::new(ToneEngine));
        let out = n.narrate(&SpeechRequest::new("Hello world")).unwrap();
        assert_eq!(out.source, AudioSource::Model);
        assert!((out.duration_secs - 0.55).abs() < 1e-3);
        assert!(wav::is_valid(&out.audio));
    }

    #[test]
    fn test_speed_is_clamped() {
        let n = narrator(Box::new(ToneEngine));
        let fast = n.narrate(&SpeechRequest::new("Hello world").with_speed(10.0)).unwrap();
        assert_eq!(fast.speed, 2.0);
        let slow = n.narrate(&SpeechRequest::new("Hello world").with_speed(0.0)).unwrap();
        assert_eq!(slow.speed, 0.5);
        let nan = n.narrate(&SpeechRequest::new("Hello world").with_speed(f32::NAN)).unwrap();
        assert_eq!(nan.speed, 1.0);
    }

    fn narrator_with_speeds(min_speed: f32, max_speed: f32) -> Narrator {
        let store = Arc::new(EmbeddingStore::random(8).unwrap());
        let config = NarratorConfig { min_speed, max_speed, ..NarratorConfig::default() };
        Narrator::new(Box::new(ToneEngine), store, config)
    }

    #[test]
    fn test_inverted_speed_range_uses_defaults() {
        let n = narrator_with_speeds(2.0, 0.5);
        assert_eq!((n.config().min_speed, n.config().max_speed), (0.5, 2.0));
        let out = n.narrate(&SpeechRequest::new("abc").with_speed(1.5)).unwrap();
        assert_eq!(out.speed, 1.5);
    }

    #[test]
    fn test_nan_speed_range_uses_defaults() {
        let n = narrator_with_speeds(f32::NAN, 2.0);
        assert_eq!((n.config().min_speed, n.config().max_speed), (0.5, 2.0));
        let out = n.narrate(&SpeechRequest::new("abc").with_speed(0.1)).unwrap();
        assert_eq!(out.speed, 0.5);

        let n = narrator_with_speeds(0.5, f32::INFINITY);
        assert_eq!(n.config().max_speed, 2.0);
    }

    #[test]
    fn test_speed_range_is_narrowed_to_limits() {
        let n = narrator_with_speeds(0.1, 8.0);
        assert_eq!((n.config().min_speed, n.config().max_speed), (0.5, 2.0));
        let out = n.narrate(&SpeechRequest::new("abc").with_speed(8.0)).unwrap();
        assert_eq!(out.speed, 2.0);

        let n = narrator_with_speeds(0.8, 1.2);
        let out = n.narrate(&SpeechRequest::new("abc").with_speed(2.0)).unwrap();
        assert_eq!(out.speed, 1.2);
    }

    #[test]
    fn test_speed_changes_duration() {
        let n = narrator(Box::new(ToneEngine));
        // 40 chars → 2.0 s of model audio.
        let text = "a".repeat(40);
        let out = n.narrate(&SpeechRequest::new(text).with_speed(2.0)).unwrap();
        assert!((out.duration_secs - 1.0).abs() < 0.01, "{}", out.duration_secs);
    }

    #[test]
    fn test_long_text_is_truncated_before_synthesis() {
        let n = narrator(Box::new(ToneEngine));
        let out = n.narrate(&SpeechRequest::new("x".repeat(5_000))).unwrap();
        // 1000 chars + "..." at 0.05 s each.
        assert!((out.duration_secs - 50.15).abs() < 0.01, "{}", out.duration_secs);
    }

    #[test]
    fn test_non_finite_samples_are_sanitized() {
        let n = narrator(Box::new(NanEngine));
        let out = n.narrate(&SpeechRequest::new("hi")).unwrap();
        assert_eq!(out.source, AudioSource::Model);
        let decoded = wav::decode(&out.audio).unwrap();
        assert_eq!(decoded.len(), 4);
        assert_eq!(decoded.samples[1], 0.0);
    }

    #[test]
    fn test_resample_mode_is_used() {
        let store = Arc::new(EmbeddingStore::random(8).unwrap());
        let config = NarratorConfig { speed_mode: SpeedMode::Resample, ..NarratorConfig::default() };
        let n = Narrator::new(Box::new(ToneEngine), store, config);
        let out = n.narrate(&SpeechRequest::new("abcd").with_speed(2.0)).unwrap();
        assert_eq!(wav::decode(&out.audio).unwrap().len(), 1_600);
    }

    #[test]
    fn test_fallback_reason_display() {
        assert_eq!(FallbackReason::SilentOutput.to_string(), "model output was silent");
        assert_eq!(
            FallbackReason::SynthesisFailed("boom".into()).to_string(),
            "synthesis failed: boom"
        );
        assert_eq!(AudioSource::Fallback(FallbackReason::TimedOut).label(), "fallback");
    }
}
