//! Narrate a line of text to a WAV file.
//!
//! Usage:
//!   cargo run --example narrate
//!   cargo run --example narrate -- --voice 4 --tone suspenseful --text "The door creaked open."
//!
//! Requirements:
//!   - SpeechT5 ONNX files in `models/speecht5` (or ECHOVERSE_MODEL_REPO set)
//!   - Internet access for the first run (x-vectors are cached afterwards)
//!   - HUGGINGFACE_TOKEN for tone rewriting (otherwise the text is used as is)

use std::sync::Arc;

use echoverse::{
    download, rewrite, AppConfig, EmbeddingStore, Narrator, SpeechRequest, SpeechSynthesizer,
    Tone, UnavailableModel, VoiceId, VoiceProfile,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber_init();

    // ── Parse simple CLI arguments ───────────────────────────────────────────
    let mut args = std::env::args().skip(1).peekable();

    let mut voice  = VoiceId::DEFAULT;
    let mut tone   = Tone::Neutral;
    let mut text   = "Every story begins with a single word.".to_string();
    let mut output = "narration.wav".to_string();
    let mut speed  = 1.0f32;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--voice"  => { if let Some(v) = args.next() { voice = VoiceId(v.parse().unwrap_or(0)); } }
            "--tone"   => { if let Some(v) = args.next() { tone  = v.parse().unwrap_or_default(); } }
            "--text"   => { if let Some(v) = args.next() { text   = v; } }
            "--output" => { if let Some(v) = args.next() { output = v; } }
            "--speed"  => { if let Some(v) = args.next() { speed  = v.parse().unwrap_or(1.0); } }
            "--help"   => {
                println!(
                    "Usage: narrate [--voice ID] [--tone neutral|suspenseful|inspiring] \
                     [--text TEXT] [--output FILE] [--speed FLOAT]"
                );
                for profile in VoiceProfile::all() {
                    println!("  {:>2}  {:<9} {}", profile.id, profile.name, profile.description);
                }
                return Ok(());
            }
            _ => {}
        }
    }

    let config = AppConfig::default().apply_env();

    // ── Rewrite ──────────────────────────────────────────────────────────────
    let mut rewriter_config = config.rewriter.clone();
    rewriter_config.enabled &= rewriter_config.token.is_some();
    let rewriter = rewrite::from_config(&rewriter_config);
    let rewritten = rewriter.rewrite(&text, tone, rewriter_config.max_length);

    println!("Voice  : {}", VoiceProfile::lookup(voice).name);
    println!("Tone   : {}", tone);
    println!("Text   : {:?}", rewritten);
    println!("Speed  : {}", speed);
    println!("Output : {}", output);
    println!();

    // ── Load model and voices ────────────────────────────────────────────────
    let narrator = {
        let xvectors =
            download::HubXvectorSource::from_config(&config.embeddings, config.model.token.clone());
        let store = Arc::new(EmbeddingStore::initialize(&config.embeddings, &xvectors)?);
        let engine: Box<dyn SpeechSynthesizer> =
            match download::load_model(&config.model, config.narrator.max_tokens) {
                Ok(model) => Box::new(model),
                Err(e) => {
                    eprintln!("Model unavailable ({e:#}); writing the fallback tone instead.");
                    Box::new(UnavailableModel::new(format!("{e:#}")))
                }
            };
        Narrator::new(engine, store, config.narrator)
    };

    // ── Generate audio ───────────────────────────────────────────────────────
    println!("Narrating…");
    let request = SpeechRequest::new(rewritten).with_voice(voice).with_speed(speed);
    let narration = narrator.narrate(&request)?;
    std::fs::write(&output, &narration.audio)?;

    println!(
        "Done! {:.2}s of audio from the {}.",
        narration.duration_secs,
        narration.source.label()
    );
    Ok(())
}

fn tracing_subscriber_init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
