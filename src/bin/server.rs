//! echoverse HTTP server: narration, voices and session history over JSON.
//!
//! Starts an axum server with structured logging and graceful shutdown on
//! SIGTERM/SIGINT. Synthesis runs on the blocking pool; a request that takes
//! longer than `--synthesis-timeout-secs` is answered with the fallback tone.
//!
//! ```text
//! GET    /health
//! GET    /v1/voices
//! POST   /v1/narrations        {"text", "tone"?, "voice_id"?, "speed"?} → audio/wav
//! GET    /v1/history
//! DELETE /v1/history
//! GET    /v1/history/export    → text/plain
//! ```

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use echoverse::{
    download, rewrite, AppConfig, EmbeddingStore, EncodeError, FallbackReason,
    NarrationHistory, NarrationRecord, Narrator, SpeechRequest, SpeechSynthesizer, Tone,
    ToneRewriter, UnavailableModel, VoiceId, VoiceProfile,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

const X_AUDIO_SOURCE: HeaderName = HeaderName::from_static("x-audio-source");

#[derive(Debug, Parser)]
#[command(name = "echoverse-server", about = "Text-to-audiobook narration server")]
struct Args {
    /// JSON configuration file (missing file = defaults).
    #[arg(long, env = "ECHOVERSE_CONFIG", default_value = "echoverse.json")]
    config: PathBuf,

    #[arg(long, env = "ECHOVERSE_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Seconds to wait for the model before answering with fallback audio.
    /// 0 waits forever.
    #[arg(long, default_value_t = 120)]
    synthesis_timeout_secs: u64,

    /// Skip tone rewriting regardless of the config file.
    #[arg(long)]
    no_rewrite: bool,
}

#[derive(Clone)]
struct AppState {
    narrator: Arc<Narrator>,
    rewriter: Arc<dyn ToneRewriter>,
    history: Arc<NarrationHistory>,
    rewrite_max_length: usize,
    synthesis_timeout: Option<Duration>,
}

// ─── Errors ──────────────────────────────────────────────────────────────────

enum ApiError {
    BadRequest(String),
    Encode(EncodeError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Encode(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_voices() -> Json<&'static [VoiceProfile]> {
    Json(VoiceProfile::all())
}

#[derive(Debug, Deserialize)]
struct NarrationBody {
    text: String,
    #[serde(default)]
    tone: Tone,
    voice_id: Option<u32>,
    speed: Option<f32>,
}

async fn create_narration(
    State(state): State<AppState>,
    Json(body): Json<NarrationBody>,
) -> Result<Response, ApiError> {
    if body.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".into()));
    }

    let original = body.text;
    let tone = body.tone;

    let rewritten = {
        let rewriter = Arc::clone(&state.rewriter);
        let text = original.clone();
        let max_length = state.rewrite_max_length;
        tokio::task::spawn_blocking(move || rewriter.rewrite(&text, tone, max_length))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "rewrite task failed; using original text");
                original.clone()
            })
    };

    let request = SpeechRequest::new(rewritten.clone())
        .with_voice(VoiceId(body.voice_id.unwrap_or(VoiceId::DEFAULT.0)))
        .with_speed(body.speed.unwrap_or(1.0));

    let narration = synthesize(&state, request).await.map_err(ApiError::Encode)?;

    let record = NarrationRecord::new(original, rewritten, tone, &narration);
    let disposition = format!(
        "attachment; filename=\"{}\"",
        record.filename.replace(|c: char| !c.is_ascii(), "")
    );
    state.history.add(record);

    let headers = [
        (header::CONTENT_TYPE, "audio/wav".to_string()),
        (header::CONTENT_DISPOSITION, disposition),
        (X_AUDIO_SOURCE, narration.source.label().to_string()),
    ];
    Ok((headers, narration.audio).into_response())
}

/// Narrate on the blocking pool, substituting fallback audio on timeout or panic.
async fn synthesize(
    state: &AppState,
    request: SpeechRequest,
) -> Result<echoverse::Narration, EncodeError> {
    let narrator = Arc::clone(&state.narrator);
    let task = {
        let request = request.clone();
        tokio::task::spawn_blocking(move || narrator.narrate(&request))
    };

    let reason = match state.synthesis_timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(Ok(result)) => return result,
            Ok(Err(join)) => FallbackReason::SynthesisFailed(join.to_string()),
            Err(_) => FallbackReason::TimedOut,
        },
        None => match task.await {
            Ok(result) => return result,
            Err(join) => FallbackReason::SynthesisFailed(join.to_string()),
        },
    };

    tracing::warn!(%reason, "narration task did not finish; answering with fallback audio");
    let voice = state.narrator.store().resolve(request.voice);
    state.narrator.fallback_narration(&request.text, voice, request.speed, reason)
}

async fn list_history(State(state): State<AppState>) -> Json<Vec<NarrationRecord>> {
    Json(state.history.list())
}

async fn clear_history(State(state): State<AppState>) -> StatusCode {
    state.history.clear();
    StatusCode::NO_CONTENT
}

async fn export_history(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.history.export_text(),
    )
}

/// Builds the application router with all routes.
fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/voices", get(list_voices))
        .route("/v1/narrations", post(create_narration))
        .route("/v1/history", get(list_history).delete(clear_history))
        .route("/v1/history/export", get(export_history))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Startup ─────────────────────────────────────────────────────────────────

fn build_state(config: AppConfig, args: &Args) -> anyhow::Result<AppState> {
    let engine: Box<dyn SpeechSynthesizer> =
        match download::load_model(&config.model, config.narrator.max_tokens) {
            Ok(model) => Box::new(model),
            Err(e) => {
                let reason = format!("{e:#}");
                tracing::error!(error = %reason, "model unavailable; serving fallback audio only");
                Box::new(UnavailableModel::new(reason))
            }
        };

    let xvectors =
        download::HubXvectorSource::from_config(&config.embeddings, config.model.token.clone());
    let store = EmbeddingStore::initialize(&config.embeddings, &xvectors)
        .context("failed to build speaker embeddings")?;
    tracing::info!(voices = store.len(), source = ?store.source(), "speaker embeddings ready");

    let mut rewriter_config = config.rewriter.clone();
    if args.no_rewrite {
        rewriter_config.enabled = false;
    }

    Ok(AppState {
        narrator: Arc::new(Narrator::new(engine, Arc::new(store), config.narrator)),
        rewriter: Arc::from(rewrite::from_config(&rewriter_config)),
        history: Arc::new(NarrationHistory::with_capacity(config.history.capacity)),
        rewrite_max_length: rewriter_config.max_length,
        synthesis_timeout: (args.synthesis_timeout_secs > 0)
            .then(|| Duration::from_secs(args.synthesis_timeout_secs)),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let config = AppConfig::load(&args.config)?.apply_env();
    tracing::info!(path = %args.config.display(), "loaded configuration");

    // Model loading and the x-vector download block.
    let addr = args.addr;
    let state = tokio::task::spawn_blocking(move || build_state(config, &args)).await??;

    tracing::info!(%addr, "starting echoverse server");
    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind to address, is another process using this port?")?;

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("echoverse server shut down");
    Ok(())
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
