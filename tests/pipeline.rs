//! End-to-end narration with stand-in engines.

use std::{
    collections::HashMap,
    f32::consts::PI,
    sync::{Arc, Mutex},
};

use echoverse::{
    config::EmbeddingConfig,
    embeddings::{NoArchive, EMBEDDING_DIM},
    wav, AudioSource, EmbeddingStore, FallbackReason, Narrator, NarratorConfig, SpeakerEmbedding,
    SpeechRequest, SpeechSynthesizer, SynthesisError, VoiceId, VoiceProfile, Waveform,
    SAMPLE_RATE,
};

/// Always errors.
struct Broken;

impl SpeechSynthesizer for Broken {
    fn synthesize(&self, _: &str, _: &SpeakerEmbedding) -> Result<Waveform, SynthesisError> {
        Err(SynthesisError::Inference("vocoder: out of memory".into()))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// "Succeeds" with near-silence.
struct Mute;

impl SpeechSynthesizer for Mute {
    fn synthesize(&self, _: &str, _: &SpeakerEmbedding) -> Result<Waveform, SynthesisError> {
        Ok(Waveform::new(vec![1e-6; 16_000], SAMPLE_RATE))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// A fixed-length 300 Hz tone; remembers the embeddings and text it saw.
#[derive(Default)]
struct Recording {
    seconds: f32,
    embeddings: Mutex<Vec<Vec<f32>>>,
    texts: Mutex<Vec<String>>,
}

impl Recording {
    fn new(seconds: f32) -> Self {
        Self { seconds, ..Self::default() }
    }
}

impl SpeechSynthesizer for Recording {
    fn synthesize(&self, text: &str, embedding: &SpeakerEmbedding) -> Result<Waveform, SynthesisError> {
        self.embeddings.lock().unwrap().push(embedding.as_slice().to_vec());
        self.texts.lock().unwrap().push(text.to_string());
        let n = (self.seconds * SAMPLE_RATE as f32) as usize;
        let samples = (0..n)
            .map(|i| 0.6 * (2.0 * PI * 300.0 * i as f32 / SAMPLE_RATE as f32).sin())
            .collect();
        Ok(Waveform::new(samples, SAMPLE_RATE))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Forwards to a shared [`Recording`] so the test can inspect it afterwards.
struct Shared(Arc<Recording>);

impl SpeechSynthesizer for Shared {
    fn synthesize(&self, text: &str, embedding: &SpeakerEmbedding) -> Result<Waveform, SynthesisError> {
        self.0.synthesize(text, embedding)
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

fn random_store() -> Arc<EmbeddingStore> {
    Arc::new(EmbeddingStore::random(EMBEDDING_DIM).unwrap())
}

fn narrator(engine: impl SpeechSynthesizer + 'static) -> Narrator {
    Narrator::new(Box::new(engine), random_store(), NarratorConfig::default())
}

#[test]
fn broken_engine_yields_fallback_audio() {
    let n = narrator(Broken);
    let bytes = n.generate_speech("Hello world", VoiceId::DEFAULT, 1.0).unwrap();

    let decoded = wav::decode(&bytes).unwrap();
    assert_eq!(decoded.sample_rate, 16_000);
    assert_eq!(decoded.len(), 17_600);
    assert!((wav::duration_secs(&bytes) - 1.1).abs() < 1e-6);
    // 0.1 amplitude tone, quantised.
    assert!((decoded.peak() - 0.1).abs() < 1e-3);
}

#[test]
fn silent_engine_yields_fallback_audio() {
    let n = narrator(Mute);
    let narration = n.narrate(&SpeechRequest::new("Quiet")).unwrap();

    assert_eq!(narration.source, AudioSource::Fallback(FallbackReason::SilentOutput));
    assert!((narration.duration_secs - 0.5).abs() < 1e-6);
    assert!(!wav::decode(&narration.audio).unwrap().is_effectively_silent());
}

#[test]
fn broken_engine_reports_reason() {
    let n = narrator(Broken);
    let narration = n.narrate(&SpeechRequest::new("x")).unwrap();
    match narration.source {
        AudioSource::Fallback(FallbackReason::SynthesisFailed(msg)) => {
            assert!(msg.contains("out of memory"), "{}", msg)
        }
        other => panic!("unexpected source {:?}", other),
    }
}

#[test]
fn fallback_duration_is_deterministic_and_monotonic() {
    let n = narrator(Broken);
    let mut last = 0.0;
    for len in [0usize, 1, 5, 12, 40, 200] {
        let text = "a".repeat(len);
        let first = n.generate_speech(&text, VoiceId::DEFAULT, 1.0).unwrap();
        let second = n.generate_speech(&text, VoiceId::DEFAULT, 1.0).unwrap();
        assert_eq!(first, second);

        let secs = wav::duration_secs(&first);
        assert!(secs >= last, "{} chars: {} < {}", len, secs, last);
        last = secs;
    }
}

#[test]
fn never_fails_on_odd_input() {
    let n = narrator(Broken);
    let long = "word ".repeat(2_000);
    let inputs: [(&str, u32, f32); 6] = [
        ("", 0, 1.0),
        ("   ", 3, 1.0),
        ("🎧 émigré — naïve", 6, 1.0),
        (long.as_str(), 1, 1.0),
        ("speed", 2, f32::NAN),
        ("speed", 999_999, -4.0),
    ];
    for (text, voice, speed) in inputs {
        let bytes = n.generate_speech(text, VoiceId(voice), speed).unwrap();
        assert!(wav::is_valid(&bytes));
        assert!(wav::duration_secs(&bytes) > 0.0);
    }
}

#[test]
fn long_text_fallback_uses_truncated_text() {
    let n = narrator(Broken);
    let bytes = n.generate_speech(&"a".repeat(5_000), VoiceId::DEFAULT, 1.0).unwrap();
    // 1000 characters plus "...".
    assert!((wav::duration_secs(&bytes) - 100.3).abs() < 1e-3);
}

#[test]
fn unknown_voice_uses_default_embedding() {
    let recording = Arc::new(Recording::new(0.5));
    let n = narrator(Shared(Arc::clone(&recording)));

    let known = n.narrate(&SpeechRequest::new("hi").with_voice(VoiceId::DEFAULT)).unwrap();
    let unknown = n.narrate(&SpeechRequest::new("hi").with_voice(VoiceId(999_999))).unwrap();

    assert_eq!(known.source, AudioSource::Model);
    assert_eq!(unknown.voice, VoiceId::DEFAULT);
    let seen = recording.embeddings.lock().unwrap();
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[0].len(), EMBEDDING_DIM);
}

#[test]
fn each_catalogue_voice_has_its_own_embedding() {
    let store = random_store();
    let mut seen: HashMap<Vec<u32>, VoiceId> = HashMap::new();
    for profile in VoiceProfile::all() {
        let vector = store.get(profile.id).as_slice();
        assert_eq!(vector.len(), EMBEDDING_DIM);
        let key = vector.iter().map(|v| v.to_bits()).collect();
        assert!(seen.insert(key, profile.id).is_none(), "duplicate vector for {}", profile.id);
    }
}

#[test]
fn model_audio_is_speed_adjusted() {
    let n = narrator(Recording::new(2.0));
    let fast = n.narrate(&SpeechRequest::new("story").with_speed(2.0)).unwrap();
    assert_eq!(fast.source, AudioSource::Model);
    assert!((fast.duration_secs - 1.0).abs() < 0.01, "{}", fast.duration_secs);

    let slow = n.narrate(&SpeechRequest::new("story").with_speed(0.5)).unwrap();
    assert!((slow.duration_secs - 4.0).abs() < 0.01, "{}", slow.duration_secs);
}

#[test]
fn engine_sees_truncated_text() {
    let recording = Arc::new(Recording::new(0.1));
    let n = narrator(Shared(Arc::clone(&recording)));
    n.generate_speech(&"b".repeat(1_500), VoiceId::DEFAULT, 1.0).unwrap();

    let texts = recording.texts.lock().unwrap();
    assert_eq!(texts[0].chars().count(), 1_003);
    assert!(texts[0].ends_with("b..."));
}

#[test]
fn cache_round_trip_through_initialize() {
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("speaker_embeddings.npz");

    let first = EmbeddingStore::random(EMBEDDING_DIM).unwrap();
    first.persist(&cache_path).unwrap();

    let config = EmbeddingConfig { cache_path, ..EmbeddingConfig::default() };
    let second = EmbeddingStore::initialize(&config, &NoArchive).unwrap();

    assert_eq!(second.source(), echoverse::embeddings::EmbeddingSource::Cache);
    for profile in VoiceProfile::all() {
        assert_eq!(first.get(profile.id), second.get(profile.id));
    }
}

#[test]
fn missing_everything_still_initializes() {
    let dir = tempfile::tempdir().unwrap();
    let config = EmbeddingConfig {
        cache_path: dir.path().join("absent.npz"),
        ..EmbeddingConfig::default()
    };
    let store = EmbeddingStore::initialize(&config, &NoArchive).unwrap();
    assert_eq!(store.len(), VoiceProfile::all().len());
    assert_eq!(store.dim(), EMBEDDING_DIM);
    // Random vectors are never written to the cache.
    assert!(!config.cache_path.exists());
}
